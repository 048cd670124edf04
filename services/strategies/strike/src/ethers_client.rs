//! ethers-rs implementation of [`ChainClient`]
//!
//! Reads go to the network's HTTP endpoints in order (private endpoint
//! first), each bounded by a short stall timeout before falling over to the
//! next one. Submissions are raw JSON-RPC posts over a shared pooled
//! `reqwest` client so the caller controls exactly which endpoint receives
//! them.

use crate::chain::{
    ActionRequest, CandidateAction, ChainClient, FeeSnapshot, SignedAction, Simulation,
    SubmissionAck,
};
use crate::error::ChainError;
use async_trait::async_trait;
use coordinator_config::Credentials;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, H256, I256, U256,
};
use ethers::utils::{id, keccak256};
use protocol::{ChainId, NetworkDescriptor};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use telemetry::LogEmoji;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

/// Per-endpoint bound before a read falls over to the next endpoint
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Chainlink aggregators report USD prices with 8 decimals
const PRICE_FEED_DECIMALS: u32 = 8;

struct NetworkEndpoints {
    descriptor: NetworkDescriptor,
    providers: Vec<(String, Arc<Provider<Http>>)>,
}

pub struct EthersChainClient {
    networks: HashMap<ChainId, NetworkEndpoints>,
    wallet: LocalWallet,
    http: reqwest::Client,
    /// Fixed priority fee; `None` asks the node
    priority_fee: Option<U256>,
    stall_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    #[serde(default)]
    code: i64,
    message: String,
}

impl EthersChainClient {
    pub fn new(
        networks: &[NetworkDescriptor],
        credentials: &Credentials,
        priority_fee: Option<U256>,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ChainError::Transport {
                endpoint: "http-client".to_string(),
                message: e.to_string(),
            })?;

        let wallet = LocalWallet::from_str(credentials.private_key_hex())
            .map_err(|e| ChainError::Signing(format!("invalid signing key: {}", e)))?;

        let mut clients = HashMap::with_capacity(networks.len());
        for descriptor in networks {
            let mut providers = Vec::new();
            for endpoint in descriptor.read_endpoints() {
                let url = Url::parse(&endpoint).map_err(|e| ChainError::Transport {
                    endpoint: endpoint.clone(),
                    message: format!("invalid URL: {}", e),
                })?;
                let transport = Http::new_with_client(url, http.clone());
                providers.push((endpoint, Arc::new(Provider::new(transport))));
            }
            info!(
                "{} {} ({}): {} read endpoints, dispatch={}",
                LogEmoji::NETWORK,
                descriptor.name,
                descriptor.chain_id,
                providers.len(),
                descriptor.dispatch
            );
            clients.insert(
                descriptor.chain_id,
                NetworkEndpoints {
                    descriptor: descriptor.clone(),
                    providers,
                },
            );
        }

        Ok(Self {
            networks: clients,
            wallet,
            http,
            priority_fee,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        })
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    fn network(&self, chain: ChainId) -> Result<&NetworkEndpoints, ChainError> {
        self.networks
            .get(&chain)
            .ok_or(ChainError::UnknownChain(chain))
    }

    /// Run a read against each endpoint in turn until one answers
    async fn read<T, F, Fut>(
        &self,
        chain: ChainId,
        operation: &'static str,
        call: F,
    ) -> Result<T, ChainError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let network = self.network(chain)?;
        let mut last_error = None;

        for (endpoint, provider) in &network.providers {
            match timeout(self.stall_timeout, call(provider.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    debug!("{} via {} failed: {}", operation, endpoint, e);
                    last_error = Some(provider_error(endpoint, e));
                }
                Err(_) => {
                    debug!("{} via {} stalled", operation, endpoint);
                    last_error = Some(ChainError::Transport {
                        endpoint: endpoint.clone(),
                        message: format!(
                            "{} stalled after {}ms",
                            operation,
                            self.stall_timeout.as_millis()
                        ),
                    });
                }
            }
        }

        Err(last_error.unwrap_or(ChainError::UnknownChain(chain)))
    }

    async fn eth_call(
        &self,
        chain: ChainId,
        operation: &'static str,
        to: Address,
        data: Vec<u8>,
    ) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.read(chain, operation, move |provider| {
            let tx = tx.clone();
            async move { provider.call(&tx, None).await }
        })
        .await
    }

    async fn post_json_rpc(
        &self,
        endpoint: &str,
        method: &'static str,
        params: Value,
        sign_body: bool,
    ) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        })
        .to_string();

        let mut request = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/json");

        if sign_body {
            let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
            let signature = self
                .wallet
                .sign_message(digest)
                .await
                .map_err(|e| ChainError::Signing(e.to_string()))?;
            request = request.header(
                "X-Flashbots-Signature",
                format!("{:?}:0x{}", self.wallet.address(), signature),
            );
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ChainError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let envelope: RpcEnvelope = response.json().await.map_err(|e| ChainError::Transport {
            endpoint: endpoint.to_string(),
            message: format!("unreadable response: {}", e),
        })?;

        if let Some(failure) = envelope.error {
            return Err(ChainError::Rpc {
                endpoint: endpoint.to_string(),
                message: format!("{} (code {})", failure.message, failure.code),
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    fn relay_for(&self, chain: ChainId) -> Result<String, ChainError> {
        self.network(chain)?
            .descriptor
            .relay_url
            .clone()
            .ok_or(ChainError::Unsupported {
                operation: "bundle dispatch",
                chain_id: chain,
            })
    }
}

fn provider_error(endpoint: &str, error: ProviderError) -> ChainError {
    match error.as_error_response() {
        Some(response) => ChainError::Rpc {
            endpoint: endpoint.to_string(),
            message: response.message.clone(),
        },
        None => ChainError::Transport {
            endpoint: endpoint.to_string(),
            message: error.to_string(),
        },
    }
}

/// First 32-byte word of a call result
fn decode_return(bytes: &Bytes) -> Simulation {
    if bytes.is_empty() {
        return Simulation::Reverted("empty result".to_string());
    }
    let word = &bytes[..bytes.len().min(32)];
    Simulation::Return(U256::from_big_endian(word))
}

fn decode_price(bytes: &Bytes) -> Result<Option<Decimal>, ChainError> {
    let tokens = abi::decode(
        &[
            ParamType::Uint(80),
            ParamType::Int(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(80),
        ],
        bytes,
    )
    .map_err(|e| ChainError::InvalidResponse {
        operation: "latestRoundData",
        detail: e.to_string(),
    })?;

    let answer = match tokens.get(1) {
        Some(Token::Int(raw)) => I256::from_raw(*raw),
        _ => {
            return Err(ChainError::InvalidResponse {
                operation: "latestRoundData",
                detail: "missing answer".to_string(),
            })
        }
    };

    if answer <= I256::zero() || answer > I256::from(i128::MAX) {
        return Ok(None);
    }

    Ok(Decimal::try_from_i128_with_scale(answer.low_i128(), PRICE_FEED_DECIMALS).ok())
}

fn bundle_params(action: &SignedAction, target_height: u64, simulate: bool) -> Value {
    let raw = format!("0x{}", hex::encode(&action.raw));
    if simulate {
        json!([{
            "txs": [raw],
            "blockNumber": format!("0x{:x}", target_height),
            "stateBlockNumber": "latest",
        }])
    } else {
        json!([{
            "txs": [raw],
            "blockNumber": format!("0x{:x}", target_height),
        }])
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn sequence_base(&self, chain: ChainId, address: Address) -> Result<u64, ChainError> {
        let count = self
            .read(chain, "sequence_base", move |provider| async move {
                provider
                    .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;

        if count > U256::from(u64::MAX) {
            return Err(ChainError::InvalidResponse {
                operation: "sequence_base",
                detail: format!("transaction count {} out of range", count),
            });
        }
        Ok(count.as_u64())
    }

    async fn simulate(
        &self,
        chain: ChainId,
        action: &CandidateAction,
    ) -> Result<Simulation, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(action.target)
            .data(action.payload.clone())
            .gas(action.simulation_gas_limit)
            .into();

        self.read(chain, "simulate", move |provider| {
            let tx = tx.clone();
            async move {
                match provider.call(&tx, None).await {
                    Ok(bytes) => Ok(decode_return(&bytes)),
                    Err(e) => match e.as_error_response() {
                        // A JSON-RPC error on eth_call is the node reporting a revert
                        Some(response) => Ok(Simulation::Reverted(response.message.clone())),
                        None => Err(e),
                    },
                }
            }
        })
        .await
    }

    async fn fee_snapshot(&self, chain: ChainId) -> Result<FeeSnapshot, ChainError> {
        let block = self
            .read(chain, "fee_snapshot", |provider| async move {
                provider.get_block(BlockNumber::Latest).await
            })
            .await?;

        let base_fee = match block.and_then(|b| b.base_fee_per_gas) {
            Some(fee) => fee,
            None => {
                self.read(chain, "gas_price", |provider| async move {
                    provider.get_gas_price().await
                })
                .await?
            }
        };

        let priority_fee = match self.priority_fee {
            Some(fee) => fee,
            None => {
                self.read(chain, "priority_fee", |provider| async move {
                    provider
                        .request::<_, U256>("eth_maxPriorityFeePerGas", ())
                        .await
                })
                .await?
            }
        };

        debug!(
            "{} chain {} base fee {} wei, priority fee {} wei",
            LogEmoji::GAS,
            chain, base_fee, priority_fee
        );
        Ok(FeeSnapshot {
            base_fee,
            priority_fee,
        })
    }

    async fn surcharge(&self, chain: ChainId, payload: &Bytes) -> Result<U256, ChainError> {
        let oracle = match self.network(chain)?.descriptor.fee_oracle {
            Some(oracle) => oracle,
            None => return Ok(U256::zero()),
        };

        let mut data = id("getL1Fee(bytes)").to_vec();
        data.extend(abi::encode(&[Token::Bytes(payload.to_vec())]));

        let result = self.eth_call(chain, "surcharge", oracle, data).await?;
        match decode_return(&result) {
            Simulation::Return(fee) => Ok(fee),
            Simulation::Reverted(reason) => Err(ChainError::InvalidResponse {
                operation: "getL1Fee",
                detail: reason,
            }),
        }
    }

    async fn sign(&self, request: &ActionRequest) -> Result<SignedAction, ChainError> {
        let tx = Eip1559TransactionRequest::new()
            .from(self.wallet.address())
            .to(request.to)
            .data(request.payload.clone())
            .gas(request.gas_limit)
            .nonce(request.sequence)
            .max_fee_per_gas(request.max_fee_per_gas)
            .max_priority_fee_per_gas(request.max_priority_fee_per_gas)
            .value(U256::zero())
            .chain_id(request.chain_id.0);
        let typed = TypedTransaction::Eip1559(tx);

        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));

        Ok(SignedAction {
            chain_id: request.chain_id,
            sequence: request.sequence,
            raw,
            hash,
        })
    }

    async fn submit_bundle(
        &self,
        chain: ChainId,
        action: &SignedAction,
        target_height: u64,
    ) -> Result<SubmissionAck, ChainError> {
        let relay = self.relay_for(chain)?;
        let result = self
            .post_json_rpc(
                &relay,
                "eth_sendBundle",
                bundle_params(action, target_height, false),
                true,
            )
            .await?;

        Ok(SubmissionAck {
            reference: result
                .get("bundleHash")
                .and_then(Value::as_str)
                .map(str::to_string),
            endpoint: relay,
            duplicate: false,
        })
    }

    async fn submit_direct(
        &self,
        _chain: ChainId,
        action: &SignedAction,
        endpoint: &str,
    ) -> Result<SubmissionAck, ChainError> {
        let raw = format!("0x{}", hex::encode(&action.raw));
        match self
            .post_json_rpc(endpoint, "eth_sendRawTransaction", json!([raw]), false)
            .await
        {
            Ok(result) => Ok(SubmissionAck {
                endpoint: endpoint.to_string(),
                reference: result.as_str().map(str::to_string),
                duplicate: false,
            }),
            Err(e) if e.is_duplicate_submission() => Ok(SubmissionAck {
                endpoint: endpoint.to_string(),
                reference: Some(format!("{:?}", action.hash)),
                duplicate: true,
            }),
            Err(e) => Err(e),
        }
    }

    async fn block_height(&self, chain: ChainId) -> Result<u64, ChainError> {
        let height = self
            .read(chain, "block_height", |provider| async move {
                provider.get_block_number().await
            })
            .await?;
        Ok(height.as_u64())
    }

    async fn simulate_bundle(
        &self,
        chain: ChainId,
        action: &SignedAction,
        target_height: u64,
    ) -> Result<(), ChainError> {
        let relay = self.relay_for(chain)?;
        let result = self
            .post_json_rpc(
                &relay,
                "eth_callBundle",
                bundle_params(action, target_height, true),
                true,
            )
            .await?;

        let failures: Vec<String> = result
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| {
                        r.get("error")
                            .or_else(|| r.get("revert"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ChainError::Rpc {
                endpoint: relay,
                message: failures.join("; "),
            })
        }
    }

    async fn latest_price(&self, chain: ChainId) -> Result<Option<Decimal>, ChainError> {
        let feed = match self.network(chain)?.descriptor.price_feed {
            Some(feed) => feed,
            None => return Ok(None),
        };

        let data = id("latestRoundData()").to_vec();
        let result = self.eth_call(chain, "latest_price", feed, data).await?;
        decode_price(&result)
    }

    fn signer_address(&self) -> Address {
        self.wallet.address()
    }
}
