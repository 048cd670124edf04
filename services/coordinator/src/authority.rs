//! Sequence Authority
//!
//! Single-owner actor for the per-chain sequence records. Every mutation
//! goes through the command channel, so grants for one chain are strictly
//! sequential and never repeat. A chain without a record is initialized on
//! first use from a [`SequenceBaseSource`]; reservations arriving meanwhile
//! queue behind that fetch in arrival order while other chains keep going.

use async_trait::async_trait;
use protocol::{ChainId, RejectReason};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use strike::{ChainClient, ChainError};
use telemetry::LogEmoji;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a chain's first usable sequence number comes from
#[async_trait]
pub trait SequenceBaseSource: Send + Sync + 'static {
    async fn fetch_base(&self, chain: ChainId) -> Result<u64, ChainError>;
}

/// Pending-transaction count of the treasury signer
pub struct ChainBaseSource {
    client: Arc<dyn ChainClient>,
}

impl ChainBaseSource {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SequenceBaseSource for ChainBaseSource {
    async fn fetch_base(&self, chain: ChainId) -> Result<u64, ChainError> {
        let address = self.client.signer_address();
        self.client.sequence_base(chain, address).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("Chain {chain_id} not ready: {detail}")]
    ChainNotReady { chain_id: ChainId, detail: String },

    #[error("Sequence authority stopped")]
    Stopped,
}

impl AuthorityError {
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            AuthorityError::ChainNotReady { detail, .. } => RejectReason::ChainNotReady {
                detail: detail.clone(),
            },
            AuthorityError::Stopped => RejectReason::AuthorityUnavailable,
        }
    }
}

type Reply = oneshot::Sender<Result<u64, AuthorityError>>;

enum Command {
    Reserve { chain_id: ChainId, reply: Reply },
    Prime { chain_id: ChainId, reply: Reply },
    Initialize {
        chain_id: ChainId,
        base: u64,
        reply: oneshot::Sender<bool>,
    },
    Resync { chain_id: ChainId },
    Snapshot {
        reply: oneshot::Sender<HashMap<ChainId, u64>>,
    },
}

struct Fetched {
    chain_id: ChainId,
    result: Result<u64, String>,
    resync: bool,
}

/// Queued request behind an initialization fetch
struct Waiter {
    reply: Reply,
    consume: bool,
}

enum Record {
    Ready { next: u64 },
    Loading { waiters: VecDeque<Waiter> },
}

/// Cloneable front door to the authority task
#[derive(Clone)]
pub struct AuthorityHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl AuthorityHandle {
    /// Grant the next sequence number for `chain_id`
    pub async fn reserve(&self, chain_id: ChainId) -> Result<u64, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Reserve { chain_id, reply })
            .map_err(|_| AuthorityError::Stopped)?;
        rx.await.unwrap_or(Err(AuthorityError::Stopped))
    }

    /// Fetch the base for `chain_id` now instead of on first reservation.
    /// Returns the next value that would be granted, without consuming it.
    pub async fn prime(&self, chain_id: ChainId) -> Result<u64, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Prime { chain_id, reply })
            .map_err(|_| AuthorityError::Stopped)?;
        rx.await.unwrap_or(Err(AuthorityError::Stopped))
    }

    /// Install `base` for a chain with no record. Returns false (and changes
    /// nothing) when the chain is already initialized.
    pub async fn initialize(&self, chain_id: ChainId, base: u64) -> Result<bool, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Initialize {
                chain_id,
                base,
                reply,
            })
            .map_err(|_| AuthorityError::Stopped)?;
        rx.await.map_err(|_| AuthorityError::Stopped)
    }

    /// Re-read the base and move forward to it if the chain is ahead of us
    pub fn resync(&self, chain_id: ChainId) {
        let _ = self.commands.send(Command::Resync { chain_id });
    }

    pub async fn snapshot(&self) -> Result<HashMap<ChainId, u64>, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| AuthorityError::Stopped)?;
        rx.await.map_err(|_| AuthorityError::Stopped)
    }
}

pub struct SequenceAuthority {
    source: Arc<dyn SequenceBaseSource>,
    init_timeout: Duration,
    records: HashMap<ChainId, Record>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
}

impl SequenceAuthority {
    /// Start the actor. It stops once every handle has been dropped.
    pub fn spawn(
        source: Arc<dyn SequenceBaseSource>,
        init_timeout: Duration,
    ) -> (AuthorityHandle, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();

        let authority = Self {
            source,
            init_timeout,
            records: HashMap::new(),
            fetched_tx,
        };
        let task = tokio::spawn(authority.run(command_rx, fetched_rx));

        (AuthorityHandle { commands }, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut fetched: mpsc::UnboundedReceiver<Fetched>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(result) = fetched.recv() => self.handle_fetched(result),
            }
        }
        debug!("Sequence authority stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Reserve { chain_id, reply } => self.request(chain_id, reply, true),
            Command::Prime { chain_id, reply } => self.request(chain_id, reply, false),
            Command::Initialize {
                chain_id,
                base,
                reply,
            } => {
                let installed = self.initialize(chain_id, base);
                let _ = reply.send(installed);
            }
            Command::Resync { chain_id } => match self.records.get(&chain_id) {
                Some(Record::Ready { .. }) => self.start_fetch(chain_id, true),
                _ => debug!("Resync for chain {} ignored: not initialized", chain_id),
            },
            Command::Snapshot { reply } => {
                let snapshot = self
                    .records
                    .iter()
                    .filter_map(|(chain, record)| match record {
                        Record::Ready { next } => Some((*chain, *next)),
                        Record::Loading { .. } => None,
                    })
                    .collect();
                let _ = reply.send(snapshot);
            }
        }
    }

    fn request(&mut self, chain_id: ChainId, reply: Reply, consume: bool) {
        match self.records.get_mut(&chain_id) {
            Some(Record::Ready { next }) => {
                // Requester already gone: nothing would ever sign this number
                if reply.is_closed() {
                    debug!("Dropping abandoned request for chain {}", chain_id);
                    return;
                }
                let value = *next;
                if consume {
                    *next += 1;
                }
                let _ = reply.send(Ok(value));
            }
            Some(Record::Loading { waiters }) => waiters.push_back(Waiter { reply, consume }),
            None => {
                let mut waiters = VecDeque::new();
                waiters.push_back(Waiter { reply, consume });
                self.records.insert(chain_id, Record::Loading { waiters });
                self.start_fetch(chain_id, false);
            }
        }
    }

    fn initialize(&mut self, chain_id: ChainId, base: u64) -> bool {
        match self.records.remove(&chain_id) {
            Some(Record::Ready { next }) => {
                self.records.insert(chain_id, Record::Ready { next });
                false
            }
            Some(Record::Loading { waiters }) => {
                self.install(chain_id, base, waiters);
                true
            }
            None => {
                self.install(chain_id, base, VecDeque::new());
                true
            }
        }
    }

    /// Create the record and serve everything queued behind it, in order
    fn install(&mut self, chain_id: ChainId, base: u64, waiters: VecDeque<Waiter>) {
        let mut next = base;
        for waiter in waiters {
            if waiter.reply.is_closed() {
                continue;
            }
            let _ = waiter.reply.send(Ok(next));
            if waiter.consume {
                next += 1;
            }
        }
        info!("{} Sequence record for chain {} starts at {}", LogEmoji::LOCK, chain_id, base);
        self.records.insert(chain_id, Record::Ready { next });
    }

    fn start_fetch(&self, chain_id: ChainId, resync: bool) {
        let source = self.source.clone();
        let fetched_tx = self.fetched_tx.clone();
        let init_timeout = self.init_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(init_timeout, source.fetch_base(chain_id)).await
            {
                Ok(Ok(base)) => Ok(base),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "sequence base fetch timed out after {}ms",
                    init_timeout.as_millis()
                )),
            };
            let _ = fetched_tx.send(Fetched {
                chain_id,
                result,
                resync,
            });
        });
    }

    fn handle_fetched(&mut self, fetched: Fetched) {
        let Fetched {
            chain_id,
            result,
            resync,
        } = fetched;

        match (self.records.remove(&chain_id), result) {
            (Some(Record::Loading { waiters }), Ok(base)) => self.install(chain_id, base, waiters),
            (Some(Record::Loading { waiters }), Err(detail)) => {
                warn!(
                    "{} Chain {} initialization failed, rejecting {} queued request(s): {}",
                    LogEmoji::WARNING,
                    chain_id,
                    waiters.len(),
                    detail
                );
                for waiter in waiters {
                    let _ = waiter.reply.send(Err(AuthorityError::ChainNotReady {
                        chain_id,
                        detail: detail.clone(),
                    }));
                }
            }
            (Some(Record::Ready { next }), Ok(base)) if resync => {
                let moved = next.max(base);
                if moved != next {
                    info!(
                        "{} Chain {} resynced from {} to {}",
                        LogEmoji::PROCESS,
                        chain_id,
                        next,
                        moved
                    );
                } else if base < next {
                    // Granted numbers missing on chain stay consumed; a gap here
                    // holds later actions until the supervisor restarts
                    warn!(
                        "{} Chain {} reports {} but {} is next: {} granted number(s) not seen on chain",
                        LogEmoji::WARNING,
                        chain_id,
                        base,
                        next,
                        next - base
                    );
                }
                self.records.insert(chain_id, Record::Ready { next: moved });
            }
            (Some(Record::Ready { next }), Err(detail)) if resync => {
                warn!("{} Chain {} resync failed: {}", LogEmoji::WARNING, chain_id, detail);
                self.records.insert(chain_id, Record::Ready { next });
            }
            // A stale init fetch after exogenous initialization
            (Some(record), _) => {
                self.records.insert(chain_id, record);
            }
            (None, _) => {}
        }
    }
}
