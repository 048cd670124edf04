//! Dispatch of signed actions by network kind

use crate::chain::{ChainClient, SignedAction, SubmissionAck};
use crate::error::ChainError;
use protocol::{DispatchKind, NetworkDescriptor};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{DispatchOutcome, LogEmoji};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

pub struct Dispatcher {
    client: Arc<dyn ChainClient>,
    network: NetworkDescriptor,
    call_timeout: Duration,
    bundle_prevalidate: bool,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        network: NetworkDescriptor,
        call_timeout: Duration,
        bundle_prevalidate: bool,
    ) -> Self {
        Self {
            client,
            network,
            call_timeout,
            bundle_prevalidate,
        }
    }

    pub async fn dispatch(&self, action: &SignedAction) -> DispatchOutcome {
        match self.network.dispatch {
            DispatchKind::Bundle => self.dispatch_bundle(action).await,
            DispatchKind::Direct => self.dispatch_direct(action).await,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ChainError>
    where
        F: std::future::Future<Output = Result<T, ChainError>>,
    {
        match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Transport {
                endpoint: self.network.name.clone(),
                message: format!(
                    "{} timed out after {}ms",
                    operation,
                    self.call_timeout.as_millis()
                ),
            }),
        }
    }

    async fn dispatch_bundle(&self, action: &SignedAction) -> DispatchOutcome {
        let chain = self.network.chain_id;

        let height = match self
            .bounded("block_height", self.client.block_height(chain))
            .await
        {
            Ok(height) => height,
            Err(e) => return failed(vec![e]),
        };
        let target = height + 1;

        if self.bundle_prevalidate {
            if let Err(e) = self
                .bounded(
                    "simulate_bundle",
                    self.client.simulate_bundle(chain, action, target),
                )
                .await
            {
                if e.is_sequence_conflict() {
                    return failed(vec![e]);
                }
                return DispatchOutcome::Skipped {
                    reason: format!("bundle pre-validation failed: {}", e),
                };
            }
        }

        match self
            .bounded(
                "submit_bundle",
                self.client.submit_bundle(chain, action, target),
            )
            .await
        {
            Ok(ack) => {
                debug!(
                    "{} Bundle for block {} accepted by {}",
                    LogEmoji::BUNDLE,
                    target,
                    ack.endpoint
                );
                accepted(DispatchKind::Bundle, ack)
            }
            Err(e) => failed(vec![e]),
        }
    }

    /// Fire at every endpoint at once; the first acceptance wins and the
    /// remaining submissions keep running in the background.
    async fn dispatch_direct(&self, action: &SignedAction) -> DispatchOutcome {
        let endpoints = self.network.read_endpoints();
        if endpoints.is_empty() {
            return failed(vec![ChainError::Unsupported {
                operation: "direct dispatch",
                chain_id: self.network.chain_id,
            }]);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        for endpoint in endpoints {
            let client = self.client.clone();
            let action = action.clone();
            let tx = tx.clone();
            let chain = self.network.chain_id;
            let call_timeout = self.call_timeout;

            tokio::spawn(async move {
                let result =
                    match timeout(call_timeout, client.submit_direct(chain, &action, &endpoint))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ChainError::Transport {
                            endpoint: endpoint.clone(),
                            message: format!(
                                "submission timed out after {}ms",
                                call_timeout.as_millis()
                            ),
                        }),
                    };
                let _ = tx.send((endpoint, result));
            });
        }
        drop(tx);

        let mut errors = Vec::new();
        while let Some((endpoint, result)) = rx.recv().await {
            match result {
                Ok(ack) => return accepted(DispatchKind::Direct, ack),
                Err(e) if e.is_duplicate_submission() => {
                    return accepted(
                        DispatchKind::Direct,
                        SubmissionAck {
                            endpoint,
                            reference: None,
                            duplicate: true,
                        },
                    )
                }
                Err(e) => {
                    debug!("Direct submission via {} failed: {}", endpoint, e);
                    errors.push(e);
                }
            }
        }

        failed(errors)
    }
}

fn accepted(channel: DispatchKind, ack: SubmissionAck) -> DispatchOutcome {
    DispatchOutcome::Accepted {
        channel,
        endpoint: ack.endpoint,
        duplicate: ack.duplicate,
    }
}

fn failed(errors: Vec<ChainError>) -> DispatchOutcome {
    DispatchOutcome::Failed {
        sequence_conflict: errors.iter().any(ChainError::is_sequence_conflict),
        errors: errors.iter().map(ToString::to_string).collect(),
    }
}
