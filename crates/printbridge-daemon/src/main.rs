// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintBridge: local print daemon for CUPS queues and Brother QL label
// printers.
//
// Entry point. Initialises logging, loads the config, wires the print
// service and runs periodic discovery until interrupted.

use std::process::ExitCode;
use std::time::Duration;

use printbridge_core::DaemonConfig;
use printbridge_core::error::Result;

use printbridge_daemon::PrintService;
use printbridge_daemon::services::data_dir;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("PrintBridge starting");

    let config_path = data_dir::config_path();
    let config = match DaemonConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "cannot load config");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "cannot start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "PrintBridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    let service = PrintService::init(config)?;

    let summary = service.refresh().await;
    tracing::info!(
        cups = summary.queue_found,
        brother_ql = summary.raster_found,
        bind = %service.config().bind_address(),
        "print service ready"
    );

    let mut ticker =
        tokio::time::interval(service.config().refresh_interval().max(Duration::from_secs(1)));
    // The first tick completes immediately; discovery just ran.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.refresh().await;
                match service.prune() {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "pruned expired jobs"),
                    Err(e) => tracing::warn!(error = %e, "job pruning failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}
