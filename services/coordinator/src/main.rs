//! Coordinator binary
//!
//! Usage:
//!   coordinator supervise [--config coordinator.toml] [--workers 8]
//!   coordinator worker --id 3 [--config coordinator.toml]
//!
//! `worker` is what `supervise` launches; it expects the bus on stdin/stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordinator::{
    logging, ChainBaseSource, FrameBridge, ProcessLauncher, SequenceAuthority, SignalRouter,
    Supervisor,
};
use coordinator_config::{assign, CoordinatorConfig, Credentials};
use futures::future::join_all;
use protocol::WorkerId;
use std::path::PathBuf;
use std::sync::Arc;
use strike::{EthersChainClient, WsEventSource, WorkerRuntime};
use telemetry::{LogEmoji, TracingSink};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Distributed execution coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the supervisor, sequence authority and signal router
    Supervise {
        /// Path to configuration file (defaults to $COORDINATOR_CONFIG, then built-ins)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of workers, overriding configuration
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Run a single worker over stdin/stdout
    Worker {
        #[arg(long)]
        id: u32,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging()?;

    match cli.command {
        Commands::Supervise { config, workers } => supervise(config, workers).await,
        Commands::Worker { id, config } => worker(WorkerId(id), config).await,
    }
}

async fn supervise(config_path: Option<PathBuf>, workers: Option<usize>) -> Result<()> {
    info!("{} Starting coordinator supervisor", LogEmoji::START);

    let mut config =
        CoordinatorConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if workers.is_some() {
        config.supervisor.workers = workers;
        config.validate().context("Invalid --workers")?;
    }

    // Workers would fail the same way; refuse before launching any
    let credentials = Credentials::from_env().context("Treasury credentials unavailable")?;
    let priority_fee = config.strike.priority_fee_wei()?;
    let client = Arc::new(
        EthersChainClient::new(&config.networks, &credentials, priority_fee)
            .context("Failed to build chain client")?,
    );

    let (authority, _authority_task) = SequenceAuthority::spawn(
        Arc::new(ChainBaseSource::new(client)),
        config.supervisor.sequence_init_timeout(),
    );

    let priming = join_all(config.networks.iter().map(|network| {
        let authority = authority.clone();
        async move { (network, authority.prime(network.chain_id).await) }
    }))
    .await;
    for (network, result) in priming {
        match result {
            Ok(next) => info!(
                "{} {} (chain {}) sequence starts at {}",
                LogEmoji::LOCK,
                network.name,
                network.chain_id,
                next
            ),
            Err(e) => warn!(
                "{} {} not primed, will initialize on first reservation: {}",
                LogEmoji::WARNING,
                network.name,
                e
            ),
        }
    }

    let (router, _router_task) = SignalRouter::spawn(authority);
    let launcher =
        ProcessLauncher::current_exe(config_path).context("Cannot locate own executable")?;

    let count = config.worker_count();
    let supervisor = Supervisor::new(
        Arc::new(launcher),
        router.clone(),
        Arc::new(TracingSink),
        &config.supervisor,
        count,
    )
    .start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping {} workers", supervisor.slot_count());

    supervisor.shutdown().await;
    let stats = router.stats();
    info!(
        "{} Signals relayed: {}, grants: {}, rejects: {}, resyncs: {}",
        LogEmoji::SIGNAL,
        stats.signals_relayed,
        stats.grants,
        stats.rejects,
        stats.resyncs
    );
    Ok(())
}

async fn worker(id: WorkerId, config_path: Option<PathBuf>) -> Result<()> {
    let config =
        CoordinatorConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    let credentials = Credentials::from_env().context("Treasury credentials unavailable")?;
    let assignment = assign(id, &config).context("No networks configured")?;

    info!(
        "{} Worker {} starting on {} as {}",
        LogEmoji::START,
        id, assignment.network.name, assignment.roles
    );

    let client = Arc::new(
        EthersChainClient::new(
            std::slice::from_ref(&assignment.network),
            &credentials,
            config.strike.priority_fee_wei()?,
        )
        .context("Failed to build chain client")?,
    );

    let bus = FrameBridge::spawn(
        "supervisor".to_string(),
        tokio::io::stdin(),
        tokio::io::stdout(),
    );

    let ws_url = assignment.network.ws_url.clone();
    let observer = assignment.roles.observer;
    let mut runtime = WorkerRuntime::new(
        assignment,
        &config,
        client,
        bus.outbound,
        Arc::new(TracingSink),
    )?;
    if observer {
        runtime = runtime.with_event_source(Arc::new(WsEventSource::new(ws_url)));
    }

    runtime.run(bus.inbound).await?;
    Ok(())
}
