use protocol::ChainId;
use thiserror::Error;

/// Failure talking to a chain endpoint
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("No endpoints configured for chain {0}")]
    UnknownChain(ChainId),

    #[error("RPC error from {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("Transport error from {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Invalid response to {operation}: {detail}")]
    InvalidResponse {
        operation: &'static str,
        detail: String,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("{operation} is not available on chain {chain_id}")]
    Unsupported {
        operation: &'static str,
        chain_id: ChainId,
    },
}

const DUPLICATE_MARKERS: &[&str] = &["already known", "known transaction", "already imported"];

const SEQUENCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "replacement transaction underpriced",
    "nonce has already been used",
    "invalid nonce",
];

impl ChainError {
    fn message(&self) -> String {
        match self {
            ChainError::Rpc { message, .. } | ChainError::Transport { message, .. } => {
                message.to_lowercase()
            }
            other => other.to_string().to_lowercase(),
        }
    }

    /// The endpoint already holds this exact signed action
    pub fn is_duplicate_submission(&self) -> bool {
        let msg = self.message();
        DUPLICATE_MARKERS.iter().any(|m| msg.contains(m))
    }

    /// The network's view of the signer's sequence disagrees with ours
    pub fn is_sequence_conflict(&self) -> bool {
        let msg = self.message();
        SEQUENCE_CONFLICT_MARKERS.iter().any(|m| msg.contains(m))
    }
}
