//! Margin Account Liquidator
//!
//! Two roles from one binary:
//! - `scan`: walks every margin account of an exchange on a fixed interval and
//!   publishes liquidation candidates to the bus
//! - `execute`: consumes candidates, re-verifies each against fresh ledger
//!   state and submits the liquidation
//!
//! Usage: `liquidator <scan|execute>`

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_bus::{ConsumerOptions, FileBus, FileBusConfig};
use liquidator_chain::{LiquidationSubmitter, ProviderManager, TransactionSender};
use liquidator_core::{
    config, init_config, BotConfig, Detector, DetectorConfig, ExecuteEnv, Executor, ExecutorConfig,
    MaintenanceMarginEvaluator, Role, ScanEnv,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")),
        )
        .init();

    // Load and initialize bot config before any core component reads it
    // Use BOT_PROFILE env var to select: default, testing, production, or a TOML path
    let bot_config = BotConfig::try_from_env()?;
    bot_config.log_config();
    init_config(bot_config);

    let role: Role = std::env::args()
        .nth(1)
        .context("Missing role argument, expected 'scan' or 'execute'")?
        .parse()?;

    info!(role = %role, "Starting liquidator");

    let shutdown = shutdown_signal();

    match role {
        Role::Scan => run_scanner(ScanEnv::from_env()?, shutdown).await,
        Role::Execute => run_executor(ExecuteEnv::from_env()?, shutdown).await,
    }
}

async fn run_scanner(env: ScanEnv, shutdown: watch::Receiver<bool>) -> Result<()> {
    let cfg = config();

    let provider = Arc::new(ProviderManager::new(&env.rpc_url, cfg.scanner.fetch_concurrency).await?);
    let bus = Arc::new(open_bus(&env.bus_dir).await?);

    let mut detector_config = DetectorConfig::new(env.exchange);
    if let Some(interval) = env.interval {
        detector_config = detector_config.with_interval(interval);
    }

    let detector = Detector::new(
        provider,
        bus,
        Arc::new(MaintenanceMarginEvaluator),
        detector_config,
    );

    detector.run(shutdown).await
}

async fn run_executor(env: ExecuteEnv, shutdown: watch::Receiver<bool>) -> Result<()> {
    let cfg = config();

    let provider = Arc::new(ProviderManager::new(&env.rpc_url, cfg.scanner.fetch_concurrency).await?);

    // Transaction sender (for signing and sending liquidation transactions)
    let tx_sender = Arc::new(TransactionSender::new(&env.private_key, &env.rpc_url)?);
    info!(address = %tx_sender.address, "Transaction sender initialized");
    let submitter = Arc::new(LiquidationSubmitter::new(tx_sender));

    let bus = open_bus(&env.bus_dir).await?;
    let consumer = bus
        .subscribe(ConsumerOptions {
            group: cfg.bus.group.clone(),
            partitions: env.partitions.clone(),
            from_beginning: cfg.bus.from_beginning,
            replay: env.replay,
            poll_interval: cfg.bus.poll_interval(),
        })
        .await?;

    let executor = Executor::new(
        provider,
        submitter,
        Arc::new(MaintenanceMarginEvaluator),
        ExecutorConfig::new(env.liquidator_account),
    );

    let stats = executor.run(consumer, shutdown).await;
    info!(
        liquidated = stats.liquidated,
        rejected = stats.rejected,
        malformed = stats.malformed,
        inconsistent = stats.inconsistent,
        unevaluable = stats.unevaluable,
        abandoned = stats.abandoned,
        "Executor finished"
    );
    Ok(())
}

async fn open_bus(dir: &std::path::Path) -> Result<FileBus> {
    let bus_config = FileBusConfig::new(dir).with_partitions(config().bus.partitions);
    FileBus::open(bus_config)
        .await
        .with_context(|| format!("Failed to open candidate bus at {}", dir.display()))
}

/// Flip a watch channel to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            // Receivers treat a closed channel as shutdown; hold the sender
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Margin Account Liquidator v0.1.0
    "#);
}
