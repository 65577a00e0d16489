#![doc = include_str!("../README.md")]

mod config;
mod load;
mod telemetry;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use surge::CancellationToken;
use telemetry::init_telemetry;
use tokio::signal;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let token = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(token.clone()));

    let report = load::run(&config, token).await;
    signals.abort();
    let report = report?;

    tracing::info!(
        "Emitted {}/{} items ({} sent) in {:?}: {:.0} items/s, peak concurrency {}",
        report.emitted,
        report.expected,
        report.sent,
        report.elapsed,
        report.throughput(),
        report.peak
    );

    if report.cancelled {
        tracing::warn!("Run was cancelled before the input was exhausted");
    } else if report.shortfall() > 0 {
        tracing::warn!("{} items were not emitted", report.shortfall());
    }

    Ok(())
}

fn log_startup_info(config: &LoadConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load run with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load run: {} items, {:?} work each",
            config.items,
            config.work
        );
    }
}

/// Cancels `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {:?}", err);
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {:?}", err);
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, cancelling the run...");
    token.cancel();
}
