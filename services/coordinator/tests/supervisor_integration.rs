//! Supervisor, router and authority wired together with in-process workers

use async_trait::async_trait;
use coordinator::{
    LaunchError, SequenceAuthority, SequenceBaseSource, SignalRouter, Supervisor,
    SupervisorHandle, WorkerLauncher, WorkerLink,
};
use coordinator_config::SupervisorSettings;
use parking_lot::Mutex;
use proptest::prelude::*;
use protocol::{BusMessage, ChainId, CorrelationId, SignalHint, WorkerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use strike::ChainError;
use telemetry::{MemorySink, TelemetryEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// The test's side of one launched worker
struct TestWorker {
    id: WorkerId,
    launched_at: Instant,
    inbox: mpsc::UnboundedReceiver<BusMessage>,
    outbox: mpsc::UnboundedSender<BusMessage>,
    exit: oneshot::Sender<String>,
}

impl TestWorker {
    fn crash(self, status: &str) {
        let _ = self.exit.send(status.to_string());
    }

    async fn reserve(&mut self, chain_id: ChainId) -> u64 {
        let correlation_id = CorrelationId::new();
        self.outbox
            .send(BusMessage::Reserve {
                chain_id,
                correlation_id,
            })
            .unwrap();
        loop {
            match self.inbox.recv().await.unwrap() {
                BusMessage::Grant {
                    correlation_id: id,
                    sequence,
                    ..
                } if id == correlation_id => return sequence,
                BusMessage::Signal { .. } => continue,
                other => panic!("worker {} got {:?}", self.id, other),
            }
        }
    }
}

struct ChannelLauncher {
    launched: mpsc::UnboundedSender<TestWorker>,
    failures_left: Mutex<usize>,
}

#[async_trait]
impl WorkerLauncher for ChannelLauncher {
    async fn launch(&self, worker: WorkerId) -> Result<WorkerLink, LaunchError> {
        {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LaunchError::Unavailable("scripted failure".into()));
            }
        }

        let (to_worker, inbox) = mpsc::unbounded_channel();
        let (outbox, from_worker) = mpsc::unbounded_channel();
        let (exit, exit_rx) = oneshot::channel();

        let _ = self.launched.send(TestWorker {
            id: worker,
            launched_at: Instant::now(),
            inbox,
            outbox,
            exit,
        });

        Ok(WorkerLink {
            outbound: to_worker,
            inbound: from_worker,
            exit: Box::pin(async move { exit_rx.await.unwrap_or_else(|_| "dropped".into()) }),
        })
    }
}

struct Bases(HashMap<ChainId, u64>);

#[async_trait]
impl SequenceBaseSource for Bases {
    async fn fetch_base(&self, chain: ChainId) -> Result<u64, ChainError> {
        self.0
            .get(&chain)
            .copied()
            .ok_or(ChainError::UnknownChain(chain))
    }
}

struct Harness {
    supervisor: SupervisorHandle,
    launched: mpsc::UnboundedReceiver<TestWorker>,
    telemetry: Arc<MemorySink>,
    started: Instant,
}

fn start(workers: usize, launch_failures: usize) -> Harness {
    let bases = Bases([(ChainId(8453), 42), (ChainId(1), 0)].into_iter().collect());
    let (authority, _) = SequenceAuthority::spawn(Arc::new(bases), Duration::from_secs(5));
    let (router, _) = SignalRouter::spawn(authority);

    let (launched_tx, launched) = mpsc::unbounded_channel();
    let launcher = ChannelLauncher {
        launched: launched_tx,
        failures_left: Mutex::new(launch_failures),
    };
    let telemetry = Arc::new(MemorySink::new());

    let settings = SupervisorSettings {
        stagger_ms: 1_500,
        respawn_delay_ms: 3_000,
        ..SupervisorSettings::default()
    };
    let supervisor = Supervisor::new(
        Arc::new(launcher),
        router,
        telemetry.clone(),
        &settings,
        workers,
    )
    .start();

    Harness {
        supervisor,
        launched,
        telemetry,
        started: Instant::now(),
    }
}

impl Harness {
    async fn next_launch(&mut self) -> TestWorker {
        self.launched.recv().await.unwrap()
    }

    async fn launch_all(&mut self, n: usize) -> Vec<TestWorker> {
        let mut workers = Vec::with_capacity(n);
        for _ in 0..n {
            workers.push(self.next_launch().await);
        }
        // Paused clock only advances once every task is idle, so the
        // router has seen every connection by the time this returns
        tokio::time::sleep(Duration::from_millis(1)).await;
        workers
    }
}

#[tokio::test(start_paused = true)]
async fn workers_start_staggered_in_id_order() {
    let mut h = start(4, 0);
    let workers = h.launch_all(4).await;

    for (index, worker) in workers.iter().enumerate() {
        assert_eq!(worker.id, WorkerId(index as u32 + 1));
        assert_eq!(
            worker.launched_at - h.started,
            Duration::from_millis(1_500) * index as u32
        );
    }
    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_worker_is_replaced_once_after_delay() {
    let mut h = start(2, 0);
    let mut workers = h.launch_all(2).await;

    let crashed = workers.remove(1);
    let crashed_at = Instant::now();
    crashed.crash("exit status: 101");

    let replacement = h.next_launch().await;
    assert_eq!(replacement.id, WorkerId(2));
    assert_eq!(replacement.launched_at - crashed_at, Duration::from_millis(3_000));

    // Exactly one replacement
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.launched.try_recv().is_err());

    let events = h.telemetry.events();
    assert!(events.contains(&TelemetryEvent::WorkerExited {
        worker: WorkerId(2),
        status: "exit status: 101".into(),
    }));
    assert!(events.contains(&TelemetryEvent::WorkerRespawned {
        worker: WorkerId(2),
        restarts: 1,
    }));
    drop(replacement);
    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_launch_is_retried() {
    let mut h = start(1, 2);
    let worker = h.next_launch().await;

    assert_eq!(worker.id, WorkerId(1));
    assert_eq!(worker.launched_at - h.started, Duration::from_millis(6_000));
    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn signal_reaches_all_other_workers_once() {
    let mut h = start(4, 0);
    let mut workers = h.launch_all(4).await;

    let signal = BusMessage::Signal {
        chain_id: ChainId(8453),
        hint: Some(SignalHint::NewBlock { number: 1_000 }),
    };
    workers[0].outbox.send(signal.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    for worker in workers.iter_mut().skip(1) {
        assert_eq!(worker.inbox.try_recv().ok(), Some(signal.clone()));
        assert!(worker.inbox.try_recv().is_err());
    }
    assert!(workers[0].inbox.try_recv().is_err());
    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_reservations_across_workers_are_unique() {
    let mut h = start(2, 0);
    let mut workers = h.launch_all(2).await;
    let mut second = workers.pop().unwrap();
    let mut first = workers.pop().unwrap();

    let (a, b) = tokio::join!(first.reserve(ChainId(8453)), second.reserve(ChainId(8453)));
    let mut granted = vec![a, b];
    granted.sort_unstable();
    assert_eq!(granted, vec![42, 43]);

    assert_eq!(first.reserve(ChainId(8453)).await, 44);
    assert_eq!(second.reserve(ChainId(1)).await, 0);
    h.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replacement_continues_the_sequence() {
    let mut h = start(1, 0);
    let mut worker = h.next_launch().await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(worker.reserve(ChainId(8453)).await, 42);
    worker.crash("signal: 9 (SIGKILL)");

    let mut replacement = h.next_launch().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(replacement.reserve(ChainId(8453)).await, 43);
    h.supervisor.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Grants per chain are exactly base..base+n, each requester sees them increase
    #[test]
    fn grants_are_unique_and_monotonic(
        plan in prop::collection::vec((0usize..4, prop::bool::ANY), 1..60)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let per_requester = runtime.block_on(async {
            let bases = Bases([(ChainId(8453), 42), (ChainId(1), 7)].into_iter().collect());
            let (authority, _) =
                SequenceAuthority::spawn(Arc::new(bases), Duration::from_secs(5));

            let mut queues: Vec<Vec<ChainId>> = vec![Vec::new(); 4];
            for (requester, base_chain) in &plan {
                let chain = if *base_chain { ChainId(8453) } else { ChainId(1) };
                queues[*requester].push(chain);
            }

            let tasks = queues.into_iter().map(|chains| {
                let authority = authority.clone();
                async move {
                    let mut grants = Vec::new();
                    for chain in chains {
                        grants.push((chain, authority.reserve(chain).await.unwrap()));
                    }
                    grants
                }
            });
            futures::future::join_all(tasks).await
        });

        let mut by_chain: HashMap<ChainId, Vec<u64>> = HashMap::new();
        for grants in &per_requester {
            let mut last: HashMap<ChainId, u64> = HashMap::new();
            for (chain, sequence) in grants {
                if let Some(previous) = last.insert(*chain, *sequence) {
                    prop_assert!(*sequence > previous);
                }
                by_chain.entry(*chain).or_default().push(*sequence);
            }
        }

        for (chain, mut values) in by_chain {
            let base = if chain == ChainId(8453) { 42 } else { 7 };
            let unique: HashSet<u64> = values.iter().copied().collect();
            prop_assert_eq!(unique.len(), values.len());
            values.sort_unstable();
            let expected: Vec<u64> = (base..base + values.len() as u64).collect();
            prop_assert_eq!(values, expected);
        }
    }
}
