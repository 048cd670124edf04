//! Signal bus messages
//!
//! The bus carries a closed set of message kinds. Receivers match
//! exhaustively; there is no untyped payload.

use crate::ids::{ChainId, CorrelationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message exchanged between the supervisor and a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// Worker → Supervisor: request the next sequence number for a chain
    Reserve {
        chain_id: ChainId,
        correlation_id: CorrelationId,
    },
    /// Supervisor → requesting worker: the reserved sequence number
    Grant {
        chain_id: ChainId,
        correlation_id: CorrelationId,
        sequence: u64,
    },
    /// Supervisor → requesting worker: the reservation cannot be served
    Reject {
        chain_id: ChainId,
        correlation_id: CorrelationId,
        reason: RejectReason,
    },
    /// Worker → Supervisor → every other worker: act now on this chain
    Signal {
        chain_id: ChainId,
        hint: Option<SignalHint>,
    },
    /// Worker → Supervisor: the network disagrees with the granted sequence
    Resync { chain_id: ChainId },
}

impl BusMessage {
    pub fn chain_id(&self) -> ChainId {
        match self {
            BusMessage::Reserve { chain_id, .. }
            | BusMessage::Grant { chain_id, .. }
            | BusMessage::Reject { chain_id, .. }
            | BusMessage::Signal { chain_id, .. }
            | BusMessage::Resync { chain_id } => *chain_id,
        }
    }

    /// Short tag for logs
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Reserve { .. } => "RESERVE",
            BusMessage::Grant { .. } => "GRANT",
            BusMessage::Reject { .. } => "REJECT",
            BusMessage::Signal { .. } => "SIGNAL",
            BusMessage::Resync { .. } => "RESYNC",
        }
    }
}

/// Why a reservation was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// No sequence record exists and initialization failed or timed out
    ChainNotReady { detail: String },
    /// The authority task is gone (supervisor shutting down)
    AuthorityUnavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ChainNotReady { detail } => write!(f, "chain not ready: {}", detail),
            RejectReason::AuthorityUnavailable => write!(f, "sequence authority unavailable"),
        }
    }
}

/// Optional description of the event that triggered a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalHint {
    NewBlock { number: u64 },
    Swap {
        tx_hash: Option<[u8; 32]>,
        /// Largest leg of the swap in raw token units, saturated to u128
        largest_amount: u128,
    },
}

impl fmt::Display for SignalHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalHint::NewBlock { number } => write!(f, "block #{}", number),
            SignalHint::Swap { largest_amount, .. } => write!(f, "swap ({} units)", largest_amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_and_kind() {
        let correlation_id = CorrelationId::new();
        let msg = BusMessage::Grant {
            chain_id: ChainId(8453),
            correlation_id,
            sequence: 42,
        };
        assert_eq!(msg.chain_id(), ChainId(8453));
        assert_eq!(msg.kind(), "GRANT");

        let resync = BusMessage::Resync {
            chain_id: ChainId(1),
        };
        assert_eq!(resync.chain_id(), ChainId(1));
        assert_eq!(resync.kind(), "RESYNC");
    }
}
