//! Configuration structures, defaults and environment overrides

use crate::error::{ConfigError, Result};
use ethers_core::types::{Address, Bytes, U256};
use ethers_core::utils::parse_ether;
use protocol::{ChainId, DispatchKind, NetworkDescriptor};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "COORDINATOR_CONFIG";

/// Complete coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub supervisor: SupervisorSettings,
    pub strike: StrikeSettings,
    pub detector: DetectorSettings,
    pub networks: Vec<NetworkDescriptor>,
}

/// Process supervision parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Explicit worker count; `None` means one per available core
    pub workers: Option<usize>,
    pub max_workers: usize,
    /// Delay between consecutive worker launches
    pub stagger_ms: u64,
    /// Delay before a replacement is launched after any exit
    pub respawn_delay_ms: u64,
    /// Every `observer_stride`-th worker id is an observer
    pub observer_stride: u32,
    /// Observers also run the strike pipeline when set
    pub observers_execute: bool,
    /// Bound on a single sequence base fetch. Must stay below the worker's
    /// `reservation_timeout_ms` so a reservation queued behind the fetch is
    /// answered before its requester gives up.
    pub sequence_init_timeout_ms: u64,
}

/// Strike pipeline parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrikeSettings {
    pub target_contract: Address,
    /// Opaque calldata payloads, one per candidate action
    pub candidates: Vec<Bytes>,
    /// Gas limit used for cost estimation and signing
    pub gas_limit: u64,
    /// Gas limit passed to the simulation call
    pub simulation_gas_limit: u64,
    /// Minimum net value (in ether) an action must clear
    pub min_margin_eth: Decimal,
    /// Fixed priority fee; `None` asks the node
    pub priority_fee_gwei: Option<Decimal>,
    pub cooldown_ms: u64,
    /// Bound on every chain client call
    pub call_timeout_ms: u64,
    /// Bound on the RESERVE/GRANT round trip
    pub reservation_timeout_ms: u64,
    /// Run the relay's simulation endpoint before submitting a bundle
    pub bundle_prevalidate: bool,
    pub price_refresh_secs: u64,
}

/// Opportunity detector parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub signal_on_block: bool,
    pub signal_on_swap: bool,
    /// Minimum largest swap leg, in ether-denominated 18 decimal units
    pub whale_threshold_eth: Decimal,
    pub reconnect_delay_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            workers: None,
            max_workers: 32,
            stagger_ms: 1_500,
            respawn_delay_ms: 3_000,
            observer_stride: 4,
            observers_execute: false,
            sequence_init_timeout_ms: 5_000,
        }
    }
}

impl Default for StrikeSettings {
    fn default() -> Self {
        Self {
            target_contract: address("0x83EF5c401fAa5B9674BAfAcFb089b30bAc67C9A0"),
            candidates: vec![
                calldata("0x535a720a00000000000000000000000042000000000000000000000000000000000000060000000000000000000000004edbc9ba171790664872997239bc7a3f3a6331900000000000000000000000000000000000000000000000015af1d78b58c40000"),
                calldata("0x535a720a0000000000000000000000004200000000000000000000000000000000000006000000000000000000000000833589fCD6eDb6E08f4c7C32D4f71b54bdA029130000000000000000000000000000000000000000000000000de0b6b3a7640000"),
            ],
            gas_limit: 1_200_000,
            simulation_gas_limit: 1_500_000,
            min_margin_eth: dec!(0.0001),
            priority_fee_gwei: Some(dec!(1000)),
            cooldown_ms: 2_000,
            call_timeout_ms: 3_000,
            reservation_timeout_ms: 6_000,
            bundle_prevalidate: true,
            price_refresh_secs: 30,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            signal_on_block: true,
            signal_on_swap: true,
            whale_threshold_eth: dec!(0.05),
            reconnect_delay_ms: 5_000,
        }
    }
}

/// Base and Ethereum mainnet, as deployed
pub fn default_networks() -> Vec<NetworkDescriptor> {
    vec![
        NetworkDescriptor {
            name: "BASE_L2".to_string(),
            chain_id: ChainId(8453),
            ws_url: "wss://base-rpc.publicnode.com".to_string(),
            ws_env: Some("BASE_WSS".to_string()),
            private_rpc: Some("https://base.merkle.io".to_string()),
            public_rpcs: vec![
                "https://base.merkle.io".to_string(),
                "https://mainnet.base.org".to_string(),
                "https://base.llamarpc.com".to_string(),
                "https://1rpc.io/base".to_string(),
            ],
            relay_url: None,
            fee_oracle: Some(address("0x420000000000000000000000000000000000000F")),
            price_feed: Some(address("0x71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70")),
            router: Some(address("0x2626664c2603336E57B271c5C0b26F421741e481")),
            dispatch: DispatchKind::Direct,
        },
        NetworkDescriptor {
            name: "ETH_MAINNET".to_string(),
            chain_id: ChainId(1),
            ws_url: "wss://ethereum-rpc.publicnode.com".to_string(),
            ws_env: Some("ETH_WSS".to_string()),
            private_rpc: None,
            public_rpcs: vec!["https://rpc.flashbots.net".to_string()],
            relay_url: Some("https://relay.flashbots.net".to_string()),
            fee_oracle: None,
            price_feed: Some(address("0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419")),
            router: Some(address("0xE592427A0AEce92De3Edee1F18E0157C05861564")),
            dispatch: DispatchKind::Bundle,
        },
    ]
}

// Literal constants only; a parse failure here is a typo in this file.
fn address(literal: &str) -> Address {
    Address::from_str(literal).unwrap_or_default()
}

fn calldata(literal: &str) -> Bytes {
    Bytes::from_str(literal).unwrap_or_default()
}

impl CoordinatorConfig {
    /// Defaults with the built-in network table
    pub fn with_default_networks() -> Self {
        Self {
            networks: default_networks(),
            ..Self::default()
        }
    }

    /// Parse a TOML file. Sections that are absent keep their defaults; an
    /// absent `networks` table keeps the built-in networks.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.networks.is_empty() {
            config.networks = default_networks();
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Full startup load: file (explicit path, then `COORDINATOR_CONFIG`,
    /// then built-in defaults), environment overrides, validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let mut config = match path.or(env_path.as_deref().map(Path::new)) {
            Some(p) => Self::from_file(p)?,
            None => {
                info!("No config file given, using built-in defaults");
                Self::with_default_networks()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map)
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("COORDINATOR_WORKERS") {
            match raw.parse::<usize>() {
                Ok(n) => self.supervisor.workers = Some(n),
                Err(_) => warn!("Ignoring COORDINATOR_WORKERS={:?}: not a number", raw),
            }
        }

        if let Some(raw) = lookup("STRIKE_MIN_MARGIN_ETH") {
            match Decimal::from_str(&raw) {
                Ok(v) => self.strike.min_margin_eth = v,
                Err(_) => warn!("Ignoring STRIKE_MIN_MARGIN_ETH={:?}: not a decimal", raw),
            }
        }

        if let Some(raw) = lookup("STRIKE_PRIORITY_FEE_GWEI") {
            match Decimal::from_str(&raw) {
                Ok(v) => self.strike.priority_fee_gwei = Some(v),
                Err(_) => warn!("Ignoring STRIKE_PRIORITY_FEE_GWEI={:?}: not a decimal", raw),
            }
        }

        if let Some(raw) = lookup("STRIKE_COOLDOWN_MS") {
            match raw.parse::<u64>() {
                Ok(v) => self.strike.cooldown_ms = v,
                Err(_) => warn!("Ignoring STRIKE_COOLDOWN_MS={:?}: not a number", raw),
            }
        }

        for network in &mut self.networks {
            if let Some(var) = &network.ws_env {
                if let Some(url) = lookup(var).filter(|u| !u.trim().is_empty()) {
                    network.ws_url = url;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return invalid("at least one network must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.chain_id) {
                return invalid(format!("duplicate chain_id {}", network.chain_id));
            }
            if network.ws_url.is_empty() {
                return invalid(format!("{}: ws_url must be set", network.name));
            }
            if network.read_endpoints().is_empty() {
                return invalid(format!(
                    "{}: needs a private_rpc or at least one public_rpcs entry",
                    network.name
                ));
            }
            if network.dispatch == DispatchKind::Bundle && network.relay_url.is_none() {
                return invalid(format!(
                    "{}: bundle dispatch requires relay_url",
                    network.name
                ));
            }
        }

        let sup = &self.supervisor;
        if sup.max_workers == 0 {
            return invalid("max_workers must be positive");
        }
        if sup.workers == Some(0) {
            return invalid("workers must be positive when set");
        }
        if sup.observer_stride == 0 {
            return invalid("observer_stride must be positive");
        }
        if sup.sequence_init_timeout_ms == 0 {
            return invalid("sequence_init_timeout_ms must be positive");
        }

        let strike = &self.strike;
        if strike.candidates.is_empty() {
            return invalid("at least one candidate payload is required");
        }
        if strike.candidates.iter().any(|c| c.is_empty()) {
            return invalid("candidate payloads must not be empty");
        }
        if strike.target_contract == Address::zero() {
            return invalid("target_contract must be set");
        }
        if strike.gas_limit < 21_000 {
            return invalid("gas_limit must be at least 21000");
        }
        if strike.min_margin_eth < Decimal::ZERO {
            return invalid("min_margin_eth must be non-negative");
        }
        if matches!(strike.priority_fee_gwei, Some(p) if p < Decimal::ZERO) {
            return invalid("priority_fee_gwei must be non-negative");
        }
        if strike.call_timeout_ms == 0 || strike.reservation_timeout_ms == 0 {
            return invalid("timeouts must be positive");
        }
        if strike.reservation_timeout_ms <= sup.sequence_init_timeout_ms {
            return invalid(format!(
                "reservation_timeout_ms ({}) must exceed sequence_init_timeout_ms ({})",
                strike.reservation_timeout_ms, sup.sequence_init_timeout_ms
            ));
        }
        if self.detector.whale_threshold_eth < Decimal::ZERO {
            return invalid("whale_threshold_eth must be non-negative");
        }

        self.strike.min_margin_wei()?;
        self.detector.whale_threshold_units()?;
        self.strike.priority_fee_wei()?;

        Ok(())
    }

    /// Number of worker slots to run
    pub fn worker_count(&self) -> usize {
        let wanted = self.supervisor.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        wanted.clamp(1, self.supervisor.max_workers.max(1))
    }

    pub fn network(&self, chain_id: ChainId) -> Option<&NetworkDescriptor> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(ConfigError::Invalid(msg.into()))
}

fn ether_to_wei(field: &str, value: Decimal) -> Result<U256> {
    parse_ether(value.normalize().to_string())
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
}

impl StrikeSettings {
    pub fn min_margin_wei(&self) -> Result<U256> {
        ether_to_wei("min_margin_eth", self.min_margin_eth)
    }

    /// Configured priority fee in wei, if fixed
    pub fn priority_fee_wei(&self) -> Result<Option<U256>> {
        match self.priority_fee_gwei {
            Some(gwei) => ethers_core::utils::parse_units(gwei.normalize().to_string(), "gwei")
                .map(|v| Some(v.into()))
                .map_err(|e| ConfigError::Invalid(format!("priority_fee_gwei: {}", e))),
            None => Ok(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    pub fn price_refresh(&self) -> Duration {
        Duration::from_secs(self.price_refresh_secs.max(1))
    }
}

impl DetectorSettings {
    pub fn whale_threshold_units(&self) -> Result<U256> {
        ether_to_wei("whale_threshold_eth", self.whale_threshold_eth)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl SupervisorSettings {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(self.respawn_delay_ms)
    }

    pub fn sequence_init_timeout(&self) -> Duration {
        Duration::from_millis(self.sequence_init_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = CoordinatorConfig::with_default_networks();
        assert!(config.validate().is_ok());
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.strike.candidates.len(), 2);
        assert_eq!(config.strike.candidates[0].len(), 100);
    }

    #[test]
    fn test_margin_and_priority_in_wei() {
        let config = CoordinatorConfig::with_default_networks();
        assert_eq!(
            config.strike.min_margin_wei().unwrap(),
            U256::from(100_000_000_000_000u64)
        );
        assert_eq!(
            config.strike.priority_fee_wei().unwrap(),
            Some(U256::from(1_000_000_000_000u64))
        );
        assert_eq!(
            config.detector.whale_threshold_units().unwrap(),
            U256::from(50_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COORDINATOR_WORKERS", "6"),
            ("STRIKE_MIN_MARGIN_ETH", "0.001"),
            ("STRIKE_COOLDOWN_MS", "250"),
            ("BASE_WSS", "wss://example.invalid/base"),
            ("STRIKE_PRIORITY_FEE_GWEI", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = CoordinatorConfig::with_default_networks();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.supervisor.workers, Some(6));
        assert_eq!(config.strike.min_margin_eth, dec!(0.001));
        assert_eq!(config.strike.cooldown_ms, 250);
        assert_eq!(config.strike.priority_fee_gwei, Some(dec!(1000)));
        assert_eq!(config.networks[0].ws_url, "wss://example.invalid/base");
        assert_eq!(config.networks[1].ws_url, "wss://ethereum-rpc.publicnode.com");
    }

    #[test]
    fn test_worker_count_is_capped() {
        let mut config = CoordinatorConfig::with_default_networks();
        config.supervisor.workers = Some(100);
        assert_eq!(config.worker_count(), 32);
        config.supervisor.workers = Some(3);
        assert_eq!(config.worker_count(), 3);
        config.supervisor.workers = None;
        assert!(config.worker_count() >= 1 && config.worker_count() <= 32);
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[supervisor]
workers = 4
stagger_ms = 10

[strike]
min_margin_eth = "0.002"
candidates = ["0xdeadbeef"]
"#
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.supervisor.workers, Some(4));
        assert_eq!(config.supervisor.stagger_ms, 10);
        assert_eq!(config.supervisor.respawn_delay_ms, 3_000);
        assert_eq!(config.strike.min_margin_eth, dec!(0.002));
        assert_eq!(config.strike.candidates.len(), 1);
        assert_eq!(config.strike.gas_limit, 1_200_000);
        assert_eq!(config.networks.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bundle_without_relay() {
        let mut config = CoordinatorConfig::with_default_networks();
        config.networks[1].relay_url = None;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_duplicate_chain() {
        let mut config = CoordinatorConfig::with_default_networks();
        let dup = config.networks[0].clone();
        config.networks.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reservation_outlasts_sequence_init() {
        let mut config = CoordinatorConfig::with_default_networks();
        assert!(
            config.strike.reservation_timeout_ms > config.supervisor.sequence_init_timeout_ms
        );

        config.strike.reservation_timeout_ms = config.supervisor.sequence_init_timeout_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.strike.reservation_timeout_ms = 2_000;
        config.supervisor.sequence_init_timeout_ms = 1_500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[supervisor\nworkers = ").unwrap();
        let err = CoordinatorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
