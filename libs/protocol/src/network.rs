//! Network descriptors and worker roles

use crate::ids::ChainId;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How signed actions leave the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// Private block-builder relay targeting the next block
    Bundle,
    /// Concurrent raw submission to the private endpoint and the public pool
    Direct,
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKind::Bundle => write!(f, "bundle"),
            DispatchKind::Direct => write!(f, "direct"),
        }
    }
}

/// Immutable description of one target chain
///
/// Built once at startup from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Human-readable tag used in logs (e.g. `BASE_L2`)
    pub name: String,
    pub chain_id: ChainId,
    /// Websocket endpoint for block and log subscriptions
    pub ws_url: String,
    /// Environment variable that overrides `ws_url` when set
    #[serde(default)]
    pub ws_env: Option<String>,
    /// Private RPC endpoint; primary target for direct dispatch
    #[serde(default)]
    pub private_rpc: Option<String>,
    /// Public RPC pool used for reads and as the direct-dispatch fallback
    #[serde(default)]
    pub public_rpcs: Vec<String>,
    /// Block-builder relay (required for bundle dispatch)
    #[serde(default)]
    pub relay_url: Option<String>,
    /// L1 fee oracle for rollups that charge a settlement surcharge
    #[serde(default)]
    pub fee_oracle: Option<Address>,
    /// Chainlink-style price feed for the native asset
    #[serde(default)]
    pub price_feed: Option<Address>,
    #[serde(default)]
    pub router: Option<Address>,
    pub dispatch: DispatchKind,
}

impl NetworkDescriptor {
    /// Every HTTP endpoint usable for reads, private endpoint first
    pub fn read_endpoints(&self) -> Vec<String> {
        let mut endpoints = Vec::with_capacity(self.public_rpcs.len() + 1);
        if let Some(private) = &self.private_rpc {
            endpoints.push(private.clone());
        }
        for url in &self.public_rpcs {
            if !endpoints.contains(url) {
                endpoints.push(url.clone());
            }
        }
        endpoints
    }
}

/// Roles a worker holds. A worker may hold both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    pub observer: bool,
    pub executor: bool,
}

impl Roles {
    pub const OBSERVER: Roles = Roles {
        observer: true,
        executor: false,
    };
    pub const EXECUTOR: Roles = Roles {
        observer: false,
        executor: true,
    };
    pub const BOTH: Roles = Roles {
        observer: true,
        executor: true,
    };
}

impl fmt::Display for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.observer, self.executor) {
            (true, true) => write!(f, "OBSERVER+EXECUTOR"),
            (true, false) => write!(f, "OBSERVER"),
            (false, true) => write!(f, "EXECUTOR"),
            (false, false) => write!(f, "IDLE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NetworkDescriptor {
        NetworkDescriptor {
            name: "BASE_L2".to_string(),
            chain_id: ChainId(8453),
            ws_url: "wss://base-rpc.publicnode.com".to_string(),
            ws_env: None,
            private_rpc: Some("https://base.merkle.io".to_string()),
            public_rpcs: vec![
                "https://base.merkle.io".to_string(),
                "https://mainnet.base.org".to_string(),
            ],
            relay_url: None,
            fee_oracle: None,
            price_feed: None,
            router: None,
            dispatch: DispatchKind::Direct,
        }
    }

    #[test]
    fn test_read_endpoints_dedupes_private_rpc() {
        let endpoints = base().read_endpoints();
        assert_eq!(
            endpoints,
            vec![
                "https://base.merkle.io".to_string(),
                "https://mainnet.base.org".to_string()
            ]
        );
    }

    #[test]
    fn test_roles_display() {
        assert_eq!(Roles::BOTH.to_string(), "OBSERVER+EXECUTOR");
        assert_eq!(Roles::EXECUTOR.to_string(), "EXECUTOR");
    }
}
