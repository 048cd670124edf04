//! Worker launchers
//!
//! A launch yields a [`WorkerLink`]: the supervisor's two bus channels to
//! the worker plus a future that resolves when the worker is gone.

use crate::bridge::FrameBridge;
use async_trait::async_trait;
use futures::future::BoxFuture;
use protocol::{BusMessage, WorkerId};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

pub struct WorkerLink {
    pub outbound: mpsc::UnboundedSender<BusMessage>,
    pub inbound: mpsc::UnboundedReceiver<BusMessage>,
    /// Resolves with a printable exit status
    pub exit: BoxFuture<'static, String>,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {worker} has no {pipe} pipe")]
    MissingPipe { worker: WorkerId, pipe: &'static str },

    #[error("Launcher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, worker: WorkerId) -> Result<WorkerLink, LaunchError>;
}

/// Re-executes a binary as `<program> worker --id N [--config PATH]`
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            config_path,
        }
    }

    /// Launch copies of the running executable
    pub fn current_exe(config_path: Option<PathBuf>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config_path))
    }

    fn command(&self, worker: WorkerId) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("worker").arg("--id").arg(worker.0.to_string());
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, worker: WorkerId) -> Result<WorkerLink, LaunchError> {
        let mut child = self
            .command(worker)
            .spawn()
            .map_err(|source| LaunchError::Spawn { worker, source })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::MissingPipe { worker, pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::MissingPipe { worker, pipe: "stdout" })?;

        debug!("Spawned worker {} as pid {:?}", worker, child.id());
        let bridge = FrameBridge::spawn(format!("worker {}", worker), stdout, stdin);

        let exit = Box::pin(async move {
            match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            }
        });

        Ok(WorkerLink {
            outbound: bridge.outbound,
            inbound: bridge.inbound,
            exit,
        })
    }
}
