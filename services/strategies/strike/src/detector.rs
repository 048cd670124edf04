//! Opportunity detector
//!
//! Deterministic filter from chain events to signal hints. The same event
//! always produces the same decision.

use crate::events::ChainEvent;
use coordinator_config::{ConfigError, DetectorSettings};
use ethers::types::U256;
use protocol::SignalHint;

#[derive(Debug, Clone)]
pub struct OpportunityDetector {
    signal_on_block: bool,
    signal_on_swap: bool,
    /// Minimum largest swap leg; zero passes every swap
    whale_threshold: U256,
}

impl OpportunityDetector {
    pub fn new(signal_on_block: bool, signal_on_swap: bool, whale_threshold: U256) -> Self {
        Self {
            signal_on_block,
            signal_on_swap,
            whale_threshold,
        }
    }

    pub fn from_settings(settings: &DetectorSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(
            settings.signal_on_block,
            settings.signal_on_swap,
            settings.whale_threshold_units()?,
        ))
    }

    pub fn evaluate(&self, event: &ChainEvent) -> Option<SignalHint> {
        match event {
            ChainEvent::NewBlock { number } if self.signal_on_block => {
                Some(SignalHint::NewBlock { number: *number })
            }
            ChainEvent::Swap { tx_hash, amounts } if self.signal_on_swap => {
                let largest = amounts.iter().copied().max().unwrap_or_default();
                if largest < self.whale_threshold {
                    return None;
                }
                Some(SignalHint::Swap {
                    tx_hash: tx_hash.map(|h| h.0),
                    largest_amount: saturating_u128(largest),
                })
            }
            _ => None,
        }
    }
}

fn saturating_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}
