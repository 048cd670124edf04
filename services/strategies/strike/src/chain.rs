//! Chain client interface
//!
//! The only way the worker touches a network. Implementations must be cheap
//! to share (`Arc<dyn ChainClient>`); callers bound every call with their
//! own timeout.

use crate::error::ChainError;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use protocol::ChainId;
use rust_decimal::Decimal;

/// One configured calldata payload against the target contract
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAction {
    pub index: usize,
    pub target: Address,
    pub payload: Bytes,
    pub simulation_gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Simulation {
    /// Decoded return value (first word of the call result)
    Return(U256),
    Reverted(String),
}

/// Fee data read once per strike invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSnapshot {
    pub base_fee: U256,
    pub priority_fee: U256,
}

impl FeeSnapshot {
    pub fn max_fee_per_gas(&self) -> U256 {
        self.base_fee.saturating_add(self.priority_fee)
    }

    /// `gas_limit × (base + priority)`
    pub fn execution_cost(&self, gas_limit: u64) -> U256 {
        self.max_fee_per_gas()
            .saturating_mul(U256::from(gas_limit))
    }
}

/// Everything needed to sign one EIP-1559 action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub chain_id: ChainId,
    pub to: Address,
    pub payload: Bytes,
    pub gas_limit: u64,
    pub sequence: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Opaque signed action, ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct SignedAction {
    pub chain_id: ChainId,
    pub sequence: u64,
    pub raw: Bytes,
    pub hash: H256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionAck {
    pub endpoint: String,
    /// Transaction or bundle hash reported by the endpoint
    pub reference: Option<String>,
    pub duplicate: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next unused sequence number for `address` as seen by the network
    async fn sequence_base(&self, chain: ChainId, address: Address) -> Result<u64, ChainError>;

    async fn simulate(
        &self,
        chain: ChainId,
        action: &CandidateAction,
    ) -> Result<Simulation, ChainError>;

    async fn fee_snapshot(&self, chain: ChainId) -> Result<FeeSnapshot, ChainError>;

    /// Settlement surcharge for `payload`; zero on chains without one
    async fn surcharge(&self, chain: ChainId, payload: &Bytes) -> Result<U256, ChainError>;

    async fn sign(&self, request: &ActionRequest) -> Result<SignedAction, ChainError>;

    async fn submit_bundle(
        &self,
        chain: ChainId,
        action: &SignedAction,
        target_height: u64,
    ) -> Result<SubmissionAck, ChainError>;

    async fn submit_direct(
        &self,
        chain: ChainId,
        action: &SignedAction,
        endpoint: &str,
    ) -> Result<SubmissionAck, ChainError>;

    async fn block_height(&self, chain: ChainId) -> Result<u64, ChainError>;

    /// Dry-run a bundle at the relay; `Err` means it would not land
    async fn simulate_bundle(
        &self,
        chain: ChainId,
        action: &SignedAction,
        target_height: u64,
    ) -> Result<(), ChainError>;

    /// Native asset price in USD, `None` when the chain has no feed
    async fn latest_price(&self, chain: ChainId) -> Result<Option<Decimal>, ChainError>;

    fn signer_address(&self) -> Address;
}
