//! NTRIP caster daemon.
//!
//! Usage:
//!   caster --host 0.0.0.0 --port 2101
//!   caster --config /etc/ntrip/caster.conf --stderr

use std::process;

use clap::Parser;
use log::{error, info};
use ntrip_core::config::{CasterArgs, CasterConfig};
use ntrip_core::source_service::SourceService;
use ntrip_core::supervisor::CancellationToken;
use ntrip_core::{caster, parse_log_level, setup_logging, util};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let cfg = match CasterConfig::resolve(CasterArgs::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("caster: config error: {e}");
            process::exit(1);
        }
    };

    setup_logging("caster", !cfg.stderr, parse_log_level(&cfg.log_level)).expect("failed to set up logging");

    if let Err(e) = util::write_pid_file(&cfg.pid_file) {
        error!("cannot write PID file {}: {e}", cfg.pid_file.display());
    }

    let listener = match TcpListener::bind((cfg.host.as_str(), cfg.port)).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("caster: cannot bind {}:{}: {e}", cfg.host, cfg.port);
            process::exit(1);
        }
    };

    let service = std::sync::Arc::new(SourceService::default());
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("caster received shutdown signal");
        shutdown.cancel();
    });

    if let Err(e) = caster::run(service, listener, cancel).await {
        error!("caster accept loop ended: {e}");
    }

    util::remove_pid_file(&cfg.pid_file);
    info!("caster shut down cleanly");
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
