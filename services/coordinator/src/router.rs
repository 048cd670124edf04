//! Supervisor-side message router
//!
//! One task owns the table of connected workers. RESERVE goes to the
//! Sequence Authority and the answer goes back to the requester only;
//! SIGNAL is copied to every other connected worker.

use crate::authority::AuthorityHandle;
use protocol::{BusMessage, WorkerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telemetry::LogEmoji;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum RouterEvent {
    Connected {
        worker: WorkerId,
        outbound: mpsc::UnboundedSender<BusMessage>,
    },
    Disconnected {
        worker: WorkerId,
    },
    Inbound {
        worker: WorkerId,
        msg: BusMessage,
    },
}

#[derive(Debug, Default)]
pub struct RouterStats {
    signals_received: AtomicU64,
    signals_relayed: AtomicU64,
    grants: AtomicU64,
    rejects: AtomicU64,
    resyncs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub signals_received: u64,
    pub signals_relayed: u64,
    pub grants: u64,
    pub rejects: u64,
    pub resyncs: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            signals_received: self.signals_received.load(Ordering::Relaxed),
            signals_relayed: self.signals_relayed.load(Ordering::Relaxed),
            grants: self.grants.load(Ordering::Relaxed),
            rejects: self.rejects.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct RouterHandle {
    events: mpsc::UnboundedSender<RouterEvent>,
    stats: Arc<RouterStats>,
}

impl RouterHandle {
    pub fn connect(&self, worker: WorkerId, outbound: mpsc::UnboundedSender<BusMessage>) {
        let _ = self.events.send(RouterEvent::Connected { worker, outbound });
    }

    pub fn disconnect(&self, worker: WorkerId) {
        let _ = self.events.send(RouterEvent::Disconnected { worker });
    }

    pub fn inbound(&self, worker: WorkerId, msg: BusMessage) {
        let _ = self.events.send(RouterEvent::Inbound { worker, msg });
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct SignalRouter {
    authority: AuthorityHandle,
    workers: HashMap<WorkerId, mpsc::UnboundedSender<BusMessage>>,
    stats: Arc<RouterStats>,
}

impl SignalRouter {
    /// Start the router; it stops once every handle is dropped
    pub fn spawn(authority: AuthorityHandle) -> (RouterHandle, JoinHandle<()>) {
        let (events, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RouterStats::default());

        let router = Self {
            authority,
            workers: HashMap::new(),
            stats: stats.clone(),
        };
        let task = tokio::spawn(router.run(rx));

        (RouterHandle { events, stats }, task)
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RouterEvent::Connected { worker, outbound } => {
                    debug!("Worker {} connected to router", worker);
                    self.workers.insert(worker, outbound);
                }
                RouterEvent::Disconnected { worker } => {
                    debug!("Worker {} disconnected from router", worker);
                    self.workers.remove(&worker);
                }
                RouterEvent::Inbound { worker, msg } => self.route(worker, msg),
            }
        }
    }

    fn route(&mut self, from: WorkerId, msg: BusMessage) {
        match msg {
            BusMessage::Reserve {
                chain_id,
                correlation_id,
            } => {
                let Some(reply_to) = self.workers.get(&from).cloned() else {
                    warn!("{} RESERVE from unconnected worker {}", LogEmoji::WARNING, from);
                    return;
                };
                let authority = self.authority.clone();
                let stats = self.stats.clone();

                tokio::spawn(async move {
                    // Dropping the request when the link closes keeps the number unconsumed
                    let result = tokio::select! {
                        result = authority.reserve(chain_id) => result,
                        _ = reply_to.closed() => {
                            debug!("RESERVE from {} abandoned: link closed", from);
                            return;
                        }
                    };
                    let reply = match result {
                        Ok(sequence) => {
                            stats.grants.fetch_add(1, Ordering::Relaxed);
                            debug!("{} grant {} on chain {} to {}", LogEmoji::LOCK, sequence, chain_id, from);
                            BusMessage::Grant {
                                chain_id,
                                correlation_id,
                                sequence,
                            }
                        }
                        Err(e) => {
                            stats.rejects.fetch_add(1, Ordering::Relaxed);
                            warn!("{} RESERVE from {} rejected: {}", LogEmoji::WARNING, from, e);
                            BusMessage::Reject {
                                chain_id,
                                correlation_id,
                                reason: e.reject_reason(),
                            }
                        }
                    };
                    // Closed after the grant: the number stays consumed
                    let _ = reply_to.send(reply);
                });
            }
            BusMessage::Signal { .. } => {
                self.stats.signals_received.fetch_add(1, Ordering::Relaxed);
                let mut relayed = 0;
                for (worker, outbound) in &self.workers {
                    if *worker != from && outbound.send(msg.clone()).is_ok() {
                        relayed += 1;
                    }
                }
                self.stats.signals_relayed.fetch_add(relayed, Ordering::Relaxed);
            }
            BusMessage::Resync { chain_id } => {
                self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
                debug!("{} worker {} requested resync of chain {}", LogEmoji::PROCESS, from, chain_id);
                self.authority.resync(chain_id);
            }
            BusMessage::Grant { .. } | BusMessage::Reject { .. } => {
                warn!("{} worker {} sent {}, ignoring", LogEmoji::WARNING, from, msg.kind());
            }
        }
    }
}
