use crate::emoji::LogEmoji;
use crate::event::{DispatchOutcome, TelemetryEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination for telemetry events. Must not block or fail.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn record(&self, event: TelemetryEvent) {
        (**self).record(event)
    }
}

/// Renders events as structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::WorkerStarted {
                worker,
                chain_id,
                network,
                roles,
            } => {
                info!(
                    worker = %worker,
                    chain_id = chain_id.0,
                    roles = %roles,
                    "{} Worker started on {}",
                    LogEmoji::SUCCESS,
                    network
                );
            }
            TelemetryEvent::SignalEmitted {
                worker,
                chain_id,
                hint,
            } => {
                let hint = hint.map(|h| h.to_string()).unwrap_or_default();
                info!(
                    worker = %worker,
                    chain_id = chain_id.0,
                    hint = %hint,
                    "{} Signal emitted",
                    LogEmoji::SIGNAL
                );
            }
            TelemetryEvent::StrikeAborted {
                worker,
                chain_id,
                reason,
            } => {
                if reason.is_quiet() {
                    debug!(worker = %worker, chain_id = chain_id.0, "Strike aborted: {}", reason);
                } else {
                    warn!(
                        worker = %worker,
                        chain_id = chain_id.0,
                        "{} Strike aborted: {}",
                        LogEmoji::WARNING,
                        reason
                    );
                }
            }
            TelemetryEvent::StrikeDispatched {
                worker,
                chain_id,
                sequence,
                net_value_wei,
                outcome,
            } => match outcome {
                DispatchOutcome::Accepted {
                    channel,
                    endpoint,
                    duplicate,
                } => {
                    info!(
                        worker = %worker,
                        chain_id = chain_id.0,
                        sequence,
                        net_value_wei = %net_value_wei,
                        channel = %channel,
                        duplicate,
                        "{} Strike dispatched via {}",
                        LogEmoji::EXECUTE,
                        endpoint
                    );
                }
                DispatchOutcome::Skipped { reason } => {
                    info!(
                        worker = %worker,
                        chain_id = chain_id.0,
                        sequence,
                        "Strike skipped: {}",
                        reason
                    );
                }
                DispatchOutcome::Failed {
                    errors,
                    sequence_conflict,
                } => {
                    warn!(
                        worker = %worker,
                        chain_id = chain_id.0,
                        sequence,
                        sequence_conflict,
                        "{} Strike dispatch failed: {}",
                        LogEmoji::ERROR,
                        errors.join("; ")
                    );
                }
            },
            TelemetryEvent::WorkerExited { worker, status } => {
                warn!(worker = %worker, "{} Worker exited ({})", LogEmoji::PROCESS, status);
            }
            TelemetryEvent::WorkerRespawned { worker, restarts } => {
                info!(
                    worker = %worker,
                    restarts,
                    "{} Worker respawned",
                    LogEmoji::PROCESS
                );
            }
        }
    }
}

/// Captures events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TelemetryEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards every event to each inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for FanoutSink {
    fn record(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}
