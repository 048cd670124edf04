//! In-memory chain client and reserver for unit tests

use crate::bus_client::{ReserveError, SequenceReserver};
use crate::chain::{
    ActionRequest, CandidateAction, ChainClient, FeeSnapshot, SignedAction, Simulation,
    SubmissionAck,
};
use crate::error::ChainError;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use parking_lot::Mutex;
use protocol::ChainId;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct MockChainClient {
    simulations: Mutex<HashMap<usize, Result<Simulation, ChainError>>>,
    fees: Mutex<FeeSnapshot>,
    fee_delay: Mutex<Option<Duration>>,
    surcharge: Mutex<U256>,
    height: Mutex<u64>,
    bundle_simulation: Mutex<Option<ChainError>>,
    direct_failures: Mutex<HashMap<String, ChainError>>,
    bundle_targets: Mutex<Vec<u64>>,
    signed: Mutex<Vec<ActionRequest>>,
    price: Mutex<Option<Decimal>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            simulations: Mutex::new(HashMap::new()),
            fees: Mutex::new(FeeSnapshot {
                base_fee: U256::from(1u64),
                priority_fee: U256::from(1u64),
            }),
            fee_delay: Mutex::new(None),
            surcharge: Mutex::new(U256::zero()),
            height: Mutex::new(100),
            bundle_simulation: Mutex::new(None),
            direct_failures: Mutex::new(HashMap::new()),
            bundle_targets: Mutex::new(Vec::new()),
            signed: Mutex::new(Vec::new()),
            price: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_simulation(&self, index: usize, result: Result<Simulation, ChainError>) {
        self.simulations.lock().insert(index, result);
    }

    pub fn set_fees(&self, base_fee: U256, priority_fee: U256) {
        *self.fees.lock() = FeeSnapshot {
            base_fee,
            priority_fee,
        };
    }

    pub fn delay_fees(&self, delay: Duration) {
        *self.fee_delay.lock() = Some(delay);
    }

    pub fn set_surcharge(&self, surcharge: U256) {
        *self.surcharge.lock() = surcharge;
    }

    pub fn set_height(&self, height: u64) {
        *self.height.lock() = height;
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock() = Some(price);
    }

    pub fn fail_bundle_simulation(&self, error: ChainError) {
        *self.bundle_simulation.lock() = Some(error);
    }

    pub fn fail_direct(&self, endpoint: &str, error: ChainError) {
        self.direct_failures
            .lock()
            .insert(endpoint.to_string(), error);
    }

    pub fn bundle_targets(&self) -> Vec<u64> {
        self.bundle_targets.lock().clone()
    }

    pub fn signed_requests(&self) -> Vec<ActionRequest> {
        self.signed.lock().clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    fn note(&self, name: &'static str) {
        self.calls.lock().push(name);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn sequence_base(&self, _chain: ChainId, _address: Address) -> Result<u64, ChainError> {
        self.note("sequence_base");
        Ok(0)
    }

    async fn simulate(
        &self,
        _chain: ChainId,
        action: &CandidateAction,
    ) -> Result<Simulation, ChainError> {
        self.note("simulate");
        self.simulations
            .lock()
            .get(&action.index)
            .cloned()
            .unwrap_or_else(|| Ok(Simulation::Reverted("no simulation configured".into())))
    }

    async fn fee_snapshot(&self, _chain: ChainId) -> Result<FeeSnapshot, ChainError> {
        self.note("fee_snapshot");
        let delay = *self.fee_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(*self.fees.lock())
    }

    async fn surcharge(&self, _chain: ChainId, _payload: &Bytes) -> Result<U256, ChainError> {
        self.note("surcharge");
        Ok(*self.surcharge.lock())
    }

    async fn sign(&self, request: &ActionRequest) -> Result<SignedAction, ChainError> {
        self.note("sign");
        self.signed.lock().push(request.clone());
        Ok(SignedAction {
            chain_id: request.chain_id,
            sequence: request.sequence,
            raw: Bytes::from(request.sequence.to_be_bytes().to_vec()),
            hash: H256::from_low_u64_be(request.sequence),
        })
    }

    async fn submit_bundle(
        &self,
        _chain: ChainId,
        _action: &SignedAction,
        target_height: u64,
    ) -> Result<SubmissionAck, ChainError> {
        self.note("submit_bundle");
        self.bundle_targets.lock().push(target_height);
        Ok(SubmissionAck {
            endpoint: "relay".to_string(),
            reference: None,
            duplicate: false,
        })
    }

    async fn submit_direct(
        &self,
        _chain: ChainId,
        _action: &SignedAction,
        endpoint: &str,
    ) -> Result<SubmissionAck, ChainError> {
        self.note("submit_direct");
        let failure = self.direct_failures.lock().get(endpoint).cloned();
        match failure {
            Some(error) => Err(error),
            None => Ok(SubmissionAck {
                endpoint: endpoint.to_string(),
                reference: None,
                duplicate: false,
            }),
        }
    }

    async fn block_height(&self, _chain: ChainId) -> Result<u64, ChainError> {
        self.note("block_height");
        Ok(*self.height.lock())
    }

    async fn simulate_bundle(
        &self,
        _chain: ChainId,
        _action: &SignedAction,
        _target_height: u64,
    ) -> Result<(), ChainError> {
        self.note("simulate_bundle");
        match self.bundle_simulation.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn latest_price(&self, _chain: ChainId) -> Result<Option<Decimal>, ChainError> {
        self.note("latest_price");
        Ok(*self.price.lock())
    }

    fn signer_address(&self) -> Address {
        Address::repeat_byte(0x35)
    }
}

/// Reserver with a scripted answer that counts calls
pub struct StubReserver {
    next: Mutex<Result<u64, ReserveError>>,
    reserve_calls: AtomicUsize,
    resyncs: Mutex<Vec<ChainId>>,
}

impl StubReserver {
    pub fn granting(sequence: u64) -> Self {
        Self {
            next: Mutex::new(Ok(sequence)),
            reserve_calls: AtomicUsize::new(0),
            resyncs: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, error: ReserveError) {
        *self.next.lock() = Err(error);
    }

    pub fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }

    pub fn resyncs(&self) -> Vec<ChainId> {
        self.resyncs.lock().clone()
    }
}

#[async_trait]
impl SequenceReserver for StubReserver {
    async fn reserve(&self, _chain: ChainId) -> Result<u64, ReserveError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        let mut next = self.next.lock();
        let current = next.clone();
        if let Ok(sequence) = *next {
            *next = Ok(sequence + 1);
        }
        current
    }

    fn resync(&self, chain: ChainId) {
        self.resyncs.lock().push(chain);
    }
}
