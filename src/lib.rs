//! NTRIP infrastructure core: a caster, a server publisher loop, and an RTK
//! rover coordinator, sharing NMEA/RTCM codecs, a byte-stream abstraction,
//! and a mount registry.

pub mod bytestream;
pub mod caster;
pub mod config;
pub mod error;
pub mod nmea;
pub mod ntrip_client;
pub mod rover;
pub mod rtcm;
pub mod server_loop;
pub mod source_service;
pub mod sourcetable;
pub mod supervisor;
pub mod util;

use std::process;

/// Install either a syslog or an `env_logger` stderr sink, matching the
/// level configured for the binary. Shared by all three entry points.
pub fn setup_logging(process_name: &str, use_syslog: bool, level: log::LevelFilter) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: process_name.to_string(),
            pid: process::id(),
        };
        let logger =
            syslog::unix(formatter).map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
    Ok(())
}

/// Parse a `-log-level` CLI string into a `log::LevelFilter`, defaulting to
/// `Info` on anything unrecognized.
pub fn parse_log_level(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}
