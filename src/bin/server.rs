//! NTRIP server publisher daemon: pushes a DataSource (serial or file) to a
//! caster mount, reconnecting on failure.
//!
//! Usage:
//!   server --host caster.example.com --port 2101 --mountpoint BASE1 \
//!          --user alice --password secret --file /dev/ttyUSB0

use std::process;

use clap::Parser;
use log::{error, info};
use ntrip_core::bytestream::{DataSource, SerialConfig};
use ntrip_core::config::{ServerArgs, ServerConfig};
use ntrip_core::server_loop::{self, ServerTarget};
use ntrip_core::supervisor::CancellationToken;
use ntrip_core::{parse_log_level, setup_logging, util};

#[tokio::main]
async fn main() {
    let cfg = match ServerConfig::resolve(ServerArgs::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("server: config error: {e}");
            process::exit(1);
        }
    };

    setup_logging("server", !cfg.stderr, parse_log_level(&cfg.log_level)).expect("failed to set up logging");

    if let Err(e) = util::write_pid_file(&cfg.pid_file) {
        error!("cannot write PID file {}: {e}", cfg.pid_file.display());
    }

    let Some(path) = cfg.file.clone() else {
        eprintln!("server: -file is required (serial device or replay file)");
        process::exit(1);
    };
    // `-file` doubles as either a live serial device or a plain replay file.
    // A `:` marks an explicit serial spec (`port:baud:...`); otherwise an
    // existing regular file is replayed, and anything else is treated as a
    // bare serial device path at the default baud.
    let spec = path.to_string_lossy().into_owned();
    let source = if spec.contains(':') {
        match SerialConfig::parse(&spec) {
            Ok(serial) => DataSource::Serial(serial),
            Err(e) => {
                eprintln!("server: bad serial spec '{spec}': {e}");
                process::exit(1);
            }
        }
    } else if path.is_file() {
        DataSource::File(path)
    } else {
        match SerialConfig::parse(&spec) {
            Ok(serial) => DataSource::Serial(serial),
            Err(e) => {
                eprintln!("server: bad -file value '{spec}': {e}");
                process::exit(1);
            }
        }
    };

    let target = ServerTarget {
        host: cfg.host.clone(),
        port: cfg.port,
        mount: cfg.mountpoint.clone(),
        user: cfg.user.clone(),
        password: cfg.password.clone(),
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("server received shutdown signal");
        shutdown.cancel();
    });

    server_loop::run(target, source, cancel).await;

    util::remove_pid_file(&cfg.pid_file);
    info!("server shut down cleanly");
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
