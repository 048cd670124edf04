//! Worker end of the signal bus
//!
//! Outbound messages go on an unbounded FIFO drained to the supervisor.
//! Reservations are matched to replies by correlation id; a reply that
//! arrives after its request timed out finds no entry and is discarded,
//! leaving a gap in the sequence.

use async_trait::async_trait;
use parking_lot::Mutex;
use protocol::{BusMessage, ChainId, CorrelationId, RejectReason, SignalHint};
use std::collections::HashMap;
use std::time::Duration;
use telemetry::LogEmoji;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("reservation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("reservation rejected: {0}")]
    Rejected(RejectReason),

    #[error("signal bus closed")]
    BusClosed,
}

/// Source of sequence numbers for the strike pipeline
#[async_trait]
pub trait SequenceReserver: Send + Sync {
    async fn reserve(&self, chain: ChainId) -> Result<u64, ReserveError>;

    /// Report that the network disagrees with a granted sequence
    fn resync(&self, chain: ChainId);
}

type Reply = Result<u64, RejectReason>;

pub struct BusClient {
    outbound: mpsc::UnboundedSender<BusMessage>,
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Reply>>>,
    reservation_timeout: Duration,
}

impl BusClient {
    pub fn new(outbound: mpsc::UnboundedSender<BusMessage>, reservation_timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            reservation_timeout,
        }
    }

    /// Resolve a pending reservation. Returns false for messages that are
    /// not reservation replies or whose requester is gone.
    pub fn handle_reply(&self, msg: BusMessage) -> bool {
        let (correlation_id, reply) = match msg {
            BusMessage::Grant {
                correlation_id,
                sequence,
                ..
            } => (correlation_id, Ok(sequence)),
            BusMessage::Reject {
                correlation_id,
                reason,
                ..
            } => (correlation_id, Err(reason)),
            _ => return false,
        };

        let waiter = self.pending.lock().remove(&correlation_id);
        match waiter {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                warn!(
                    "{} Discarding reply for unknown or expired reservation {}: {:?}",
                    LogEmoji::LOCK,
                    correlation_id, reply
                );
                false
            }
        }
    }

    /// Send SIGNAL for fan-out. Returns false if the bus is closed.
    pub fn emit_signal(&self, chain_id: ChainId, hint: Option<SignalHint>) -> bool {
        self.outbound
            .send(BusMessage::Signal { chain_id, hint })
            .is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl SequenceReserver for BusClient {
    async fn reserve(&self, chain_id: ChainId) -> Result<u64, ReserveError> {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id, tx);

        if self
            .outbound
            .send(BusMessage::Reserve {
                chain_id,
                correlation_id,
            })
            .is_err()
        {
            self.pending.lock().remove(&correlation_id);
            return Err(ReserveError::BusClosed);
        }

        match timeout(self.reservation_timeout, rx).await {
            Ok(Ok(Ok(sequence))) => {
                debug!("{} chain {} granted sequence {}", LogEmoji::LOCK, chain_id, sequence);
                Ok(sequence)
            }
            Ok(Ok(Err(reason))) => Err(ReserveError::Rejected(reason)),
            Ok(Err(_)) => Err(ReserveError::BusClosed),
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                Err(ReserveError::Timeout {
                    timeout_ms: self.reservation_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn resync(&self, chain_id: ChainId) {
        if self.outbound.send(BusMessage::Resync { chain_id }).is_err() {
            debug!("Resync for chain {} dropped: bus closed", chain_id);
        }
    }
}
