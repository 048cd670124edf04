//! Native asset price cache, used only for USD display

use crate::chain::ChainClient;
use ethers::types::U256;
use ethers::utils::format_ether;
use parking_lot::RwLock;
use protocol::ChainId;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use telemetry::LogEmoji;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Default)]
pub struct PriceCache {
    usd: RwLock<Option<Decimal>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Decimal> {
        *self.usd.read()
    }

    pub fn update(&self, price: Decimal) {
        *self.usd.write() = Some(price);
    }

    /// USD value of `wei` at the cached price
    pub fn estimate_usd(&self, wei: U256) -> Option<Decimal> {
        let price = self.get()?;
        let ether = Decimal::from_str(&format_ether(wei)).ok()?;
        ether.checked_mul(price).map(|v| v.round_dp(2))
    }
}

/// Refresh `cache` from the chain's price feed every `every`.
/// A failed refresh keeps the previous value.
pub fn spawn_price_heartbeat(
    client: Arc<dyn ChainClient>,
    chain: ChainId,
    cache: Arc<PriceCache>,
    every: Duration,
    call_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match timeout(call_timeout, client.latest_price(chain)).await {
                Ok(Ok(Some(price))) => {
                    debug!("{} chain {} price ${}", LogEmoji::MONEY, chain, price);
                    cache.update(price);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => debug!("Price refresh failed on chain {}: {}", chain, e),
                Err(_) => debug!("Price refresh timed out on chain {}", chain),
            }
        }
    })
}
