//! Telemetry event vocabulary

use ethers_core::types::{I256, U256};
use protocol::{ChainId, DispatchKind, Roles, SignalHint, WorkerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    WorkerStarted {
        worker: WorkerId,
        chain_id: ChainId,
        network: String,
        roles: Roles,
    },
    SignalEmitted {
        worker: WorkerId,
        chain_id: ChainId,
        hint: Option<SignalHint>,
    },
    StrikeAborted {
        worker: WorkerId,
        chain_id: ChainId,
        reason: AbortReason,
    },
    StrikeDispatched {
        worker: WorkerId,
        chain_id: ChainId,
        sequence: u64,
        net_value_wei: U256,
        outcome: DispatchOutcome,
    },
    WorkerExited {
        worker: WorkerId,
        status: String,
    },
    WorkerRespawned {
        worker: WorkerId,
        restarts: u64,
    },
}

/// Why a strike invocation stopped before dispatch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbortReason {
    #[error("all {candidates} candidates rejected in simulation")]
    SimulationRejected { candidates: usize },

    #[error("net value {net_value_wei} wei does not clear margin {margin_wei} wei")]
    BelowMargin { net_value_wei: I256, margin_wei: U256 },

    #[error("{operation} failed: {detail}")]
    ChainCall {
        operation: &'static str,
        detail: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("sequence reservation failed: {detail}")]
    ReservationFailed { detail: String },

    #[error("signing failed: {detail}")]
    SigningFailed { detail: String },
}

impl AbortReason {
    /// Expected market outcomes, logged at debug level
    pub fn is_quiet(&self) -> bool {
        matches!(
            self,
            AbortReason::SimulationRejected { .. } | AbortReason::BelowMargin { .. }
        )
    }
}

/// Result of handing a signed action to the network
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Accepted {
        channel: DispatchKind,
        endpoint: String,
        /// The endpoint already knew the action
        duplicate: bool,
    },
    /// Submission deliberately not attempted (e.g. relay pre-validation failed)
    Skipped { reason: String },
    Failed {
        errors: Vec<String>,
        /// At least one endpoint reported a sequence conflict
        sequence_conflict: bool,
    },
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted { .. })
    }
}
