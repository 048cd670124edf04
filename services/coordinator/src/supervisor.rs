//! Process supervisor
//!
//! One slot task per worker id. A slot waits out its stagger, launches the
//! worker, pumps its messages into the router until it exits, then waits
//! the respawn delay and launches a replacement with the same id. Slots
//! never give up.

use crate::launcher::{WorkerLauncher, WorkerLink};
use crate::router::RouterHandle;
use coordinator_config::SupervisorSettings;
use protocol::WorkerId;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{LogEmoji, TelemetryEvent, TelemetrySink};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    router: RouterHandle,
    telemetry: Arc<dyn TelemetrySink>,
    workers: usize,
    stagger: Duration,
    respawn_delay: Duration,
}

/// Running slots; dropping this does not stop them, [`SupervisorHandle::shutdown`] does
pub struct SupervisorHandle {
    slots: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Abort every slot. Process-backed links kill their child on drop.
    pub async fn shutdown(self) {
        for slot in &self.slots {
            slot.abort();
        }
        for slot in self.slots {
            let _ = slot.await;
        }
    }
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        router: RouterHandle,
        telemetry: Arc<dyn TelemetrySink>,
        settings: &SupervisorSettings,
        workers: usize,
    ) -> Self {
        Self {
            launcher,
            router,
            telemetry,
            workers,
            stagger: settings.stagger(),
            respawn_delay: settings.respawn_delay(),
        }
    }

    pub fn start(self) -> SupervisorHandle {
        info!(
            "{} Supervising {} workers (stagger {:?}, respawn delay {:?})",
            LogEmoji::PROCESS,
            self.workers,
            self.stagger,
            self.respawn_delay
        );

        let slots = (0..self.workers)
            .map(|index| {
                let slot = Slot {
                    worker: WorkerId(index as u32 + 1),
                    launcher: self.launcher.clone(),
                    router: self.router.clone(),
                    telemetry: self.telemetry.clone(),
                    respawn_delay: self.respawn_delay,
                };
                let start_after = self.stagger * index as u32;
                tokio::spawn(async move {
                    sleep(start_after).await;
                    slot.run().await;
                })
            })
            .collect();

        SupervisorHandle { slots }
    }
}

struct Slot {
    worker: WorkerId,
    launcher: Arc<dyn WorkerLauncher>,
    router: RouterHandle,
    telemetry: Arc<dyn TelemetrySink>,
    respawn_delay: Duration,
}

impl Slot {
    async fn run(self) {
        let mut restarts: u64 = 0;
        loop {
            match self.launcher.launch(self.worker).await {
                Ok(link) => {
                    if restarts > 0 {
                        self.telemetry.record(TelemetryEvent::WorkerRespawned {
                            worker: self.worker,
                            restarts,
                        });
                    }
                    let status = self.attach(link).await;
                    self.telemetry.record(TelemetryEvent::WorkerExited {
                        worker: self.worker,
                        status,
                    });
                }
                Err(e) => {
                    error!("{} Launch of worker {} failed: {}", LogEmoji::ERROR, self.worker, e);
                }
            }

            sleep(self.respawn_delay).await;
            restarts += 1;
        }
    }

    /// Route the worker's traffic until it has exited and its stream drained
    async fn attach(&self, link: WorkerLink) -> String {
        let WorkerLink {
            outbound,
            mut inbound,
            exit,
        } = link;

        self.router.connect(self.worker, outbound);

        let pump = async {
            while let Some(msg) = inbound.recv().await {
                self.router.inbound(self.worker, msg);
            }
        };
        let (status, ()) = tokio::join!(exit, pump);

        self.router.disconnect(self.worker);
        warn!("{} Worker {} exited ({})", LogEmoji::WARNING, self.worker, status);
        status
    }
}
