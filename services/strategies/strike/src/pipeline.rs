//! # Strike Pipeline - Simulate, Then Commit
//!
//! One invocation per accepted trigger:
//!
//! 1. Simulate every candidate (revert, error, timeout or zero → candidate out)
//! 2. One fee snapshot, plus the settlement surcharge per candidate
//! 3. Profitability gate against that same snapshot; best candidate wins
//! 4. Reserve a sequence number (only after 3 passes)
//! 5. Sign
//! 6. Dispatch by network kind
//!
//! A reserved number is never handed back, whatever the dispatch outcome.

use crate::bus_client::SequenceReserver;
use crate::chain::{ActionRequest, CandidateAction, ChainClient, Simulation};
use crate::dispatch::Dispatcher;
use crate::error::ChainError;
use crate::price::PriceCache;
use coordinator_config::{ConfigError, StrikeSettings};
use ethers::types::{I256, U256};
use futures::future::join_all;
use protocol::{NetworkDescriptor, WorkerId};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{AbortReason, DispatchOutcome, LogEmoji, TelemetryEvent, TelemetrySink};
use tokio::time::timeout;
use tracing::{debug, info};

/// Shared collaborators handed to the pipeline
#[derive(Clone)]
pub struct PipelineContext {
    pub client: Arc<dyn ChainClient>,
    pub reserver: Arc<dyn SequenceReserver>,
    pub price: Arc<PriceCache>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrikeReport {
    pub candidate: usize,
    pub net_value_wei: U256,
    pub sequence: u64,
    pub outcome: DispatchOutcome,
    pub usd_estimate: Option<Decimal>,
}

pub struct StrikePipeline {
    worker: WorkerId,
    network: NetworkDescriptor,
    candidates: Vec<CandidateAction>,
    gas_limit: u64,
    min_margin: U256,
    call_timeout: Duration,
    dispatcher: Dispatcher,
    ctx: PipelineContext,
}

impl StrikePipeline {
    pub fn new(
        worker: WorkerId,
        network: NetworkDescriptor,
        settings: &StrikeSettings,
        ctx: PipelineContext,
    ) -> Result<Self, ConfigError> {
        let candidates = settings
            .candidates
            .iter()
            .enumerate()
            .map(|(index, payload)| CandidateAction {
                index,
                target: settings.target_contract,
                payload: payload.clone(),
                simulation_gas_limit: settings.simulation_gas_limit,
            })
            .collect();

        let dispatcher = Dispatcher::new(
            ctx.client.clone(),
            network.clone(),
            settings.call_timeout(),
            settings.bundle_prevalidate,
        );

        Ok(Self {
            worker,
            network,
            candidates,
            gas_limit: settings.gas_limit,
            min_margin: settings.min_margin_wei()?,
            call_timeout: settings.call_timeout(),
            dispatcher,
            ctx,
        })
    }

    /// Execute once and record the outcome to telemetry
    pub async fn run(&self) -> Option<StrikeReport> {
        let chain_id = self.network.chain_id;
        match self.execute().await {
            Ok(report) => {
                self.ctx.telemetry.record(TelemetryEvent::StrikeDispatched {
                    worker: self.worker,
                    chain_id,
                    sequence: report.sequence,
                    net_value_wei: report.net_value_wei,
                    outcome: report.outcome.clone(),
                });
                Some(report)
            }
            Err(reason) => {
                self.ctx.telemetry.record(TelemetryEvent::StrikeAborted {
                    worker: self.worker,
                    chain_id,
                    reason,
                });
                None
            }
        }
    }

    pub async fn execute(&self) -> Result<StrikeReport, AbortReason> {
        let chain = self.network.chain_id;
        let client = &self.ctx.client;

        // 1. Simulate
        let simulations = join_all(self.candidates.iter().map(|candidate| async move {
            let result = self.call("simulate", client.simulate(chain, candidate)).await;
            (candidate, result)
        }))
        .await;

        let mut viable = Vec::with_capacity(simulations.len());
        for (candidate, result) in simulations {
            match result {
                Ok(Simulation::Return(value)) if !value.is_zero() => viable.push((candidate, value)),
                Ok(Simulation::Return(_)) => {
                    debug!("candidate {} simulated to zero", candidate.index)
                }
                Ok(Simulation::Reverted(reason)) => {
                    debug!("candidate {} reverted: {}", candidate.index, reason)
                }
                Err(reason) => debug!("candidate {} not simulated: {}", candidate.index, reason),
            }
        }
        if viable.is_empty() {
            return Err(AbortReason::SimulationRejected {
                candidates: self.candidates.len(),
            });
        }

        // 2. Cost estimate, one snapshot for the whole invocation
        let fees = self.call("fee_snapshot", client.fee_snapshot(chain)).await?;
        let execution_cost = fees.execution_cost(self.gas_limit);

        let surcharges = if self.network.fee_oracle.is_some() {
            join_all(
                viable
                    .iter()
                    .map(|(candidate, _)| self.call("surcharge", client.surcharge(chain, &candidate.payload))),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![U256::zero(); viable.len()]
        };

        // 3. Profitability gate
        let mut best: Option<(&CandidateAction, I256)> = None;
        for ((candidate, simulated), surcharge) in viable.iter().zip(surcharges) {
            let total_cost = execution_cost.saturating_add(surcharge);
            let net = signed_difference(*simulated, total_cost);
            debug!(
                "{} candidate {}: return {} wei, cost {} wei, net {} wei",
                LogEmoji::GAS,
                candidate.index, simulated, total_cost, net
            );
            if best.map_or(true, |(_, best_net)| net > best_net) {
                best = Some((*candidate, net));
            }
        }

        let (candidate, net) = match best {
            Some(best) => best,
            None => {
                return Err(AbortReason::SimulationRejected {
                    candidates: self.candidates.len(),
                })
            }
        };
        if net <= I256::zero() || net.into_raw() <= self.min_margin {
            return Err(AbortReason::BelowMargin {
                net_value_wei: net,
                margin_wei: self.min_margin,
            });
        }
        let net_value_wei = net.into_raw();
        let usd_estimate = self.ctx.price.estimate_usd(net_value_wei);

        info!(
            "{} {} candidate {} clears margin: +{} wei (~${})",
            LogEmoji::MONEY,
            self.network.name,
            candidate.index,
            net_value_wei,
            usd_estimate.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
        );

        // 4. Reserve
        let sequence = self
            .ctx
            .reserver
            .reserve(chain)
            .await
            .map_err(|e| AbortReason::ReservationFailed {
                detail: e.to_string(),
            })?;

        // 5. Sign
        let request = ActionRequest {
            chain_id: chain,
            to: candidate.target,
            payload: candidate.payload.clone(),
            gas_limit: self.gas_limit,
            sequence,
            max_fee_per_gas: fees.max_fee_per_gas(),
            max_priority_fee_per_gas: fees.priority_fee,
        };
        let signed = self
            .call("sign", client.sign(&request))
            .await
            .map_err(|reason| match reason {
                AbortReason::ChainCall { detail, .. } => AbortReason::SigningFailed { detail },
                other => other,
            })?;

        // 6. Dispatch
        let outcome = self.dispatcher.dispatch(&signed).await;
        if let DispatchOutcome::Failed {
            sequence_conflict: true,
            ..
        } = outcome
        {
            info!(
                "{} chain {} rejected sequence {}, requesting resync",
                LogEmoji::LOCK,
                chain, sequence
            );
            self.ctx.reserver.resync(chain);
        }

        Ok(StrikeReport {
            candidate: candidate.index,
            net_value_wei,
            sequence,
            outcome,
            usd_estimate,
        })
    }

    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, AbortReason>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        match timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AbortReason::ChainCall {
                operation,
                detail: e.to_string(),
            }),
            Err(_) => Err(AbortReason::Timeout {
                operation,
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }
}

/// `a - b` as a signed value, saturating at the I256 range
fn signed_difference(a: U256, b: U256) -> I256 {
    if a >= b {
        I256::try_from(a - b).unwrap_or(I256::MAX)
    } else {
        I256::try_from(b - a).map(|v| -v).unwrap_or(I256::MIN)
    }
}
