//! Worker runtime
//!
//! Composes the detector, gate, pipeline and bus client for one worker
//! slot. The runtime lives as long as its inbound bus; when the supervisor
//! side closes, the worker exits.

use crate::bus_client::BusClient;
use crate::chain::ChainClient;
use crate::detector::OpportunityDetector;
use crate::events::{run_event_feed, EventSource};
use crate::gate::ExecutionGate;
use crate::pipeline::{PipelineContext, StrikePipeline};
use crate::price::{spawn_price_heartbeat, PriceCache};
use coordinator_config::{ConfigError, CoordinatorConfig, WorkerAssignment};
use protocol::{BusMessage, SignalHint};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{LogEmoji, TelemetryEvent, TelemetrySink};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 1_024;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid worker configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Single-flight entry into the pipeline
#[derive(Clone)]
struct Striker {
    gate: Arc<ExecutionGate>,
    pipeline: Arc<StrikePipeline>,
}

impl Striker {
    /// Start a strike unless one is in flight or cooling down
    fn trigger(&self, hint: Option<&SignalHint>) -> bool {
        match self.gate.try_begin() {
            Ok(permit) => {
                let pipeline = self.pipeline.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    pipeline.run().await;
                });
                true
            }
            Err(rejection) => {
                debug!("Trigger {:?} dropped: {}", hint, rejection);
                false
            }
        }
    }
}

pub struct WorkerRuntime {
    assignment: WorkerAssignment,
    bus: Arc<BusClient>,
    striker: Striker,
    detector: OpportunityDetector,
    client: Arc<dyn ChainClient>,
    price: Arc<PriceCache>,
    telemetry: Arc<dyn TelemetrySink>,
    event_source: Option<Arc<dyn EventSource>>,
    reconnect_delay: Duration,
    price_refresh: Duration,
    call_timeout: Duration,
}

impl WorkerRuntime {
    pub fn new(
        assignment: WorkerAssignment,
        config: &CoordinatorConfig,
        client: Arc<dyn ChainClient>,
        outbound: mpsc::UnboundedSender<BusMessage>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, WorkerError> {
        let strike = &config.strike;
        let bus = Arc::new(BusClient::new(outbound, strike.reservation_timeout()));
        let price = Arc::new(PriceCache::new());

        let pipeline = StrikePipeline::new(
            assignment.id,
            assignment.network.clone(),
            strike,
            PipelineContext {
                client: client.clone(),
                reserver: bus.clone(),
                price: price.clone(),
                telemetry: telemetry.clone(),
            },
        )?;

        Ok(Self {
            detector: OpportunityDetector::from_settings(&config.detector)?,
            striker: Striker {
                gate: ExecutionGate::new(strike.cooldown()),
                pipeline: Arc::new(pipeline),
            },
            assignment,
            bus,
            client,
            price,
            telemetry,
            event_source: None,
            reconnect_delay: config.detector.reconnect_delay(),
            price_refresh: strike.price_refresh(),
            call_timeout: strike.call_timeout(),
        })
    }

    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    pub fn gate(&self) -> Arc<ExecutionGate> {
        self.striker.gate.clone()
    }

    pub fn price(&self) -> Arc<PriceCache> {
        self.price.clone()
    }

    /// Run until the inbound bus closes
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<BusMessage>) -> Result<(), WorkerError> {
        let id = self.assignment.id;
        let chain_id = self.assignment.network.chain_id;
        let roles = self.assignment.roles;

        self.telemetry.record(TelemetryEvent::WorkerStarted {
            worker: id,
            chain_id,
            network: self.assignment.network.name.clone(),
            roles,
        });

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if roles.executor {
            tasks.push(spawn_price_heartbeat(
                self.client.clone(),
                chain_id,
                self.price.clone(),
                self.price_refresh,
                self.call_timeout,
            ));
        }

        if roles.observer {
            tasks.extend(self.spawn_observer());
        }

        while let Some(msg) = inbound.recv().await {
            match msg {
                BusMessage::Grant { .. } | BusMessage::Reject { .. } => {
                    self.bus.handle_reply(msg);
                }
                BusMessage::Signal {
                    chain_id: signal_chain,
                    hint,
                } => {
                    if roles.executor && signal_chain == chain_id {
                        self.striker.trigger(hint.as_ref());
                    }
                }
                BusMessage::Reserve { .. } | BusMessage::Resync { .. } => {
                    warn!("{} worker {} ignoring {} from supervisor", LogEmoji::WARNING, id, msg.kind());
                }
            }
        }

        info!("Worker {} bus closed, shutting down", id);
        for task in tasks {
            task.abort();
        }
        Ok(())
    }

    fn spawn_observer(&self) -> Vec<JoinHandle<()>> {
        let source = match &self.event_source {
            Some(source) => source.clone(),
            None => {
                warn!(
                    "{} worker {} holds the observer role but has no event source",
                    LogEmoji::WARNING,
                    self.assignment.id
                );
                return Vec::new();
            }
        };

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let feed = tokio::spawn(run_event_feed(source, tx, self.reconnect_delay));

        let detector = self.detector.clone();
        let bus = self.bus.clone();
        let telemetry = self.telemetry.clone();
        let striker = self.striker.clone();
        let id = self.assignment.id;
        let chain_id = self.assignment.network.chain_id;
        let executes = self.assignment.roles.executor;

        let observer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(hint) = detector.evaluate(&event) else {
                    continue;
                };
                debug!("{} worker {} detected {}", LogEmoji::SEARCH, id, hint);

                if !bus.emit_signal(chain_id, Some(hint.clone())) {
                    break;
                }
                telemetry.record(TelemetryEvent::SignalEmitted {
                    worker: id,
                    chain_id,
                    hint: Some(hint.clone()),
                });

                if executes {
                    striker.trigger(Some(&hint));
                }
            }
        });

        vec![feed, observer]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Simulation;
    use crate::error::ChainError;
    use crate::events::ChainEvent;
    use crate::gate::GateState;
    use crate::testing::MockChainClient;
    use async_trait::async_trait;
    use coordinator_config::assign;
    use ethers::types::U256;
    use protocol::{ChainId, WorkerId};
    use telemetry::MemorySink;

    struct ScriptedSource {
        events: Vec<ChainEvent>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn stream(&self, sink: &mpsc::Sender<ChainEvent>) -> Result<(), ChainError> {
            for event in &self.events {
                if sink.send(event.clone()).await.is_err() {
                    return Ok(());
                }
            }
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    fn config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::with_default_networks();
        config.strike.cooldown_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_executor_strikes_on_signal_for_its_chain() {
        let config = config();
        let assignment = assign(WorkerId(3), &config).unwrap();
        assert_eq!(assignment.network.chain_id, ChainId(8453));
        assert!(assignment.roles.executor);
        let client = Arc::new(MockChainClient::new());
        client.set_simulation(0, Ok(Simulation::Return(U256::exp10(18))));
        let sink = Arc::new(MemorySink::new());

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let runtime =
            WorkerRuntime::new(assignment, &config, client.clone(), out_tx, sink.clone()).unwrap();
        let gate = runtime.gate();
        let handle = tokio::spawn(runtime.run(in_rx));

        // Other chain: ignored
        in_tx
            .send(BusMessage::Signal {
                chain_id: ChainId(1),
                hint: None,
            })
            .unwrap();
        in_tx
            .send(BusMessage::Signal {
                chain_id: ChainId(8453),
                hint: None,
            })
            .unwrap();

        let correlation_id = match out_rx.recv().await.unwrap() {
            BusMessage::Reserve {
                chain_id,
                correlation_id,
            } => {
                assert_eq!(chain_id, ChainId(8453));
                correlation_id
            }
            other => panic!("unexpected {:?}", other),
        };

        // Busy: a second signal is dropped, not queued
        in_tx
            .send(BusMessage::Signal {
                chain_id: ChainId(8453),
                hint: None,
            })
            .unwrap();

        in_tx
            .send(BusMessage::Grant {
                chain_id: ChainId(8453),
                correlation_id,
                sequence: 7,
            })
            .unwrap();

        while gate.state() == GateState::Busy {
            tokio::task::yield_now().await;
        }

        drop(in_tx);
        handle.await.unwrap().unwrap();

        assert_eq!(gate.stats().accepted, 1);
        assert_eq!(gate.stats().dropped_busy, 1);
        assert_eq!(client.signed_requests()[0].sequence, 7);
        assert_eq!(
            sink.count(|e| matches!(e, TelemetryEvent::StrikeDispatched { sequence: 7, .. })),
            1
        );
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_observer_emits_signals_without_striking() {
        let config = config();
        let assignment = assign(WorkerId(2), &config).unwrap();
        assert!(assignment.roles.observer && !assignment.roles.executor);

        let client = Arc::new(MockChainClient::new());
        let sink = Arc::new(MemorySink::new());
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let runtime = WorkerRuntime::new(assignment, &config, client.clone(), out_tx, sink.clone())
            .unwrap()
            .with_event_source(Arc::new(ScriptedSource {
                events: vec![
                    ChainEvent::NewBlock { number: 10 },
                    ChainEvent::Swap {
                        tx_hash: None,
                        amounts: [U256::from(1u64); 4],
                    },
                    ChainEvent::NewBlock { number: 11 },
                ],
            }));
        let handle = tokio::spawn(runtime.run(in_rx));

        for expected in [10u64, 11] {
            match out_rx.recv().await.unwrap() {
                BusMessage::Signal {
                    chain_id,
                    hint: Some(SignalHint::NewBlock { number }),
                } => {
                    assert_eq!(chain_id, ChainId(1));
                    assert_eq!(number, expected);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        drop(in_tx);
        handle.await.unwrap().unwrap();
        assert_eq!(client.count_calls("simulate"), 0);
        assert_eq!(
            sink.count(|e| matches!(e, TelemetryEvent::SignalEmitted { .. })),
            2
        );
    }
}
