//! Execution gate: at most one strike in flight per worker
//!
//! ```text
//! IDLE ──try_begin──▶ BUSY ──permit dropped──▶ COOLDOWN ──elapsed──▶ IDLE
//! ```
//!
//! Triggers that arrive while BUSY or COOLDOWN are dropped, never queued.
//! The COOLDOWN → IDLE edge is evaluated lazily on the next query.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
    Cooldown,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Busy,
    Cooldown { until: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("strike already in flight")]
    Busy,
    #[error("cooling down for another {remaining:?}")]
    CoolingDown { remaining: Duration },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub accepted: u64,
    pub dropped_busy: u64,
    pub dropped_cooldown: u64,
}

#[derive(Debug)]
pub struct ExecutionGate {
    phase: Mutex<Phase>,
    cooldown: Duration,
    accepted: AtomicU64,
    dropped_busy: AtomicU64,
    dropped_cooldown: AtomicU64,
}

/// Proof that the holder owns the worker's single strike slot.
/// Dropping it starts the cooldown.
#[derive(Debug)]
pub struct StrikePermit {
    gate: Arc<ExecutionGate>,
}

impl ExecutionGate {
    pub fn new(cooldown: Duration) -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Idle),
            cooldown,
            accepted: AtomicU64::new(0),
            dropped_busy: AtomicU64::new(0),
            dropped_cooldown: AtomicU64::new(0),
        })
    }

    pub fn try_begin(self: &Arc<Self>) -> Result<StrikePermit, GateRejection> {
        let mut phase = self.phase.lock();
        let now = Instant::now();

        match *phase {
            Phase::Busy => {
                self.dropped_busy.fetch_add(1, Ordering::Relaxed);
                Err(GateRejection::Busy)
            }
            Phase::Cooldown { until } if now < until => {
                self.dropped_cooldown.fetch_add(1, Ordering::Relaxed);
                Err(GateRejection::CoolingDown {
                    remaining: until - now,
                })
            }
            Phase::Idle | Phase::Cooldown { .. } => {
                *phase = Phase::Busy;
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(StrikePermit { gate: self.clone() })
            }
        }
    }

    pub fn state(&self) -> GateState {
        match *self.phase.lock() {
            Phase::Idle => GateState::Idle,
            Phase::Busy => GateState::Busy,
            Phase::Cooldown { until } if Instant::now() < until => GateState::Cooldown,
            Phase::Cooldown { .. } => GateState::Idle,
        }
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            dropped_cooldown: self.dropped_cooldown.load(Ordering::Relaxed),
        }
    }

    fn finish(&self) {
        *self.phase.lock() = Phase::Cooldown {
            until: Instant::now() + self.cooldown,
        };
    }
}

impl Drop for StrikePermit {
    fn drop(&mut self) {
        self.gate.finish();
    }
}
