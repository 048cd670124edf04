//! Live chain event feed
//!
//! An [`EventSource`] streams events until its connection drops;
//! [`run_event_feed`] owns the reconnect loop around it.

use crate::error::ChainError;
use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Filter, H256, U256};
use ethers::utils::keccak256;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use telemetry::LogEmoji;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Uniswap V2 style swap log
pub const SWAP_EVENT_SIGNATURE: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    NewBlock {
        number: u64,
    },
    Swap {
        tx_hash: Option<H256>,
        /// amount0In, amount1In, amount0Out, amount1Out
        amounts: [U256; 4],
    },
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn describe(&self) -> String;

    /// Stream events into `sink` until the connection ends or `sink` closes
    async fn stream(&self, sink: &mpsc::Sender<ChainEvent>) -> Result<(), ChainError>;
}

/// Keep `source` connected until `sink` is closed
pub async fn run_event_feed(
    source: Arc<dyn EventSource>,
    sink: mpsc::Sender<ChainEvent>,
    reconnect_delay: Duration,
) {
    loop {
        match source.stream(&sink).await {
            Ok(()) => warn!("{} Event feed {} disconnected", LogEmoji::NETWORK, source.describe()),
            Err(e) => warn!("{} Event feed {} failed: {}", LogEmoji::NETWORK, source.describe(), e),
        }

        if sink.is_closed() {
            break;
        }
        sleep(reconnect_delay).await;
        if sink.is_closed() {
            break;
        }
        debug!("Reconnecting event feed {}", source.describe());
    }
}

/// Decode the four amounts from a swap log's data section
pub fn decode_swap_amounts(data: &[u8]) -> Option<[U256; 4]> {
    if data.len() < 128 {
        return None;
    }
    let mut amounts = [U256::zero(); 4];
    for (i, amount) in amounts.iter_mut().enumerate() {
        *amount = U256::from_big_endian(&data[i * 32..(i + 1) * 32]);
    }
    Some(amounts)
}

/// Websocket subscription to new heads and swap logs
pub struct WsEventSource {
    url: String,
}

impl WsEventSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn stream(&self, sink: &mpsc::Sender<ChainEvent>) -> Result<(), ChainError> {
        let transport_error = |message: String| ChainError::Transport {
            endpoint: self.url.clone(),
            message,
        };

        let provider = timeout(CONNECT_TIMEOUT, Provider::<Ws>::connect(self.url.as_str()))
            .await
            .map_err(|_| transport_error("connect timed out".to_string()))?
            .map_err(|e| transport_error(e.to_string()))?;

        let swap_filter = Filter::new().topic0(H256::from(keccak256(SWAP_EVENT_SIGNATURE)));

        let mut blocks = provider
            .subscribe_blocks()
            .await
            .map_err(|e| transport_error(e.to_string()))?;
        let mut swaps = provider
            .subscribe_logs(&swap_filter)
            .await
            .map_err(|e| transport_error(e.to_string()))?;

        info!("{} Subscribed to blocks and swaps on {}", LogEmoji::NETWORK, self.url);

        loop {
            let event = tokio::select! {
                block = blocks.next() => match block {
                    Some(block) => match block.number {
                        Some(number) => ChainEvent::NewBlock { number: number.as_u64() },
                        None => continue,
                    },
                    None => return Ok(()),
                },
                log = swaps.next() => match log {
                    Some(log) => match decode_swap_amounts(&log.data) {
                        Some(amounts) => ChainEvent::Swap {
                            tx_hash: log.transaction_hash,
                            amounts,
                        },
                        None => continue,
                    },
                    None => return Ok(()),
                },
            };

            if sink.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}
