//! RTK rover daemon: an NTRIP-client downlink plus a GGA uplink, bridging a
//! GNSS serial receiver and a caster mount.
//!
//! Usage:
//!   rover --server caster.example.com --port 2101 --mountpoint VRS1 \
//!         --user alice --password secret --gnss /dev/ttyACM0 --baud 38400

use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use ntrip_core::bytestream::{open_serial, SerialConfig};
use ntrip_core::config::{RoverArgs, RoverConfig};
use ntrip_core::ntrip_client::{NtripSession, NtripTarget};
use ntrip_core::rover::Rover;
use ntrip_core::supervisor::CancellationToken;
use ntrip_core::{parse_log_level, setup_logging, util};

#[tokio::main]
async fn main() {
    let cfg = match RoverConfig::resolve(RoverArgs::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("rover: config error: {e}");
            process::exit(1);
        }
    };

    let level = if cfg.verbose {
        log::LevelFilter::Debug
    } else {
        parse_log_level(&cfg.log_level)
    };
    setup_logging("rover", !cfg.stderr, level).expect("failed to set up logging");

    if let Err(e) = util::write_pid_file(&cfg.pid_file) {
        error!("cannot write PID file {}: {e}", cfg.pid_file.display());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("rover received shutdown signal");
        shutdown.cancel();
    });

    let rover = Rover::new();
    let mut handles = Vec::new();

    if !cfg.server.is_empty() && !cfg.gnss.is_empty() {
        let target = NtripTarget {
            host: cfg.server.clone(),
            port: cfg.port,
            mount: cfg.mountpoint.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        };

        loop {
            match NtripSession::connect(&target).await {
                Ok(downlink_session) => {
                    handles.push(rover.spawn_downlink(downlink_session, cancel.child_token()));
                    break;
                }
                Err(e) if cfg.reconnect => {
                    error!("rover: initial connect failed, retrying: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(cfg.reconnect_interval)) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    eprintln!("rover: cannot connect to {}:{}: {e}", cfg.server, cfg.port);
                    process::exit(1);
                }
            }
        }

        match NtripSession::connect(&target).await {
            Ok(uplink_session) => {
                let serial_cfg = SerialConfig {
                    port: cfg.gnss.clone(),
                    baud: cfg.baud,
                    data_bits: 8,
                    parity: 'N',
                    stop_bits: 1,
                    flow: 'N',
                };
                match open_serial(&serial_cfg) {
                    Ok(serial) => {
                        handles.push(rover.spawn_uplink(
                            serial,
                            uplink_session,
                            Duration::from_secs(5),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => error!("rover: cannot open GNSS serial port {}: {e}", cfg.gnss),
                }
            }
            Err(e) => error!("rover: cannot open uplink session: {e}"),
        }
    }

    if cfg.duration > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cfg.duration)) => {
                info!("rover: configured duration elapsed, shutting down");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    } else {
        cancel.cancelled().await;
    }

    for handle in handles {
        let _ = handle.await;
    }

    util::remove_pid_file(&cfg.pid_file);
    info!("rover shut down cleanly");
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
