//! Layered configuration for the three binaries: compiled-in defaults,
//! overlaid by an optional flat `key=value` config file, overlaid by
//! explicit CLI flags (CLI wins).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::{NtripError, Result};

/// Parse a flat `key=value` configuration file: `#`-comments and blank lines
/// skipped, unknown keys ignored by the caller.
fn load_key_values(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| NtripError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if !val.is_empty() {
            map.insert(key, val);
        }
    }
    Ok(map)
}

fn pick<T: Clone>(cli: &Option<T>, file: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    if let Some(v) = cli {
        return v.clone();
    }
    if let Some(raw) = file.get(key) {
        if let Ok(v) = raw.parse() {
            return v;
        }
    }
    default
}

fn pick_string(cli: &Option<String>, file: &HashMap<String, String>, key: &str, default: &str) -> String {
    if let Some(v) = cli {
        return v.clone();
    }
    if let Some(v) = file.get(key) {
        return v.clone();
    }
    default.to_string()
}

fn pick_flag(cli: bool, file: &HashMap<String, String>, key: &str) -> bool {
    if cli {
        return true;
    }
    matches!(file.get(key).map(String::as_str), Some("1" | "true" | "yes"))
}

// ── caster ───────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "caster", about = "NTRIP caster: publisher/subscriber multiplexer")]
pub struct CasterArgs {
    #[arg(long = "host")]
    pub host: Option<String>,
    #[arg(long = "port")]
    pub port: Option<u16>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[arg(long = "stderr")]
    pub stderr: bool,
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CasterConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub stderr: bool,
    pub pid_file: PathBuf,
}

impl CasterConfig {
    pub fn resolve(args: CasterArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_key_values(path)?,
            None => HashMap::new(),
        };
        let cfg = Self {
            host: pick_string(&args.host, &file, "host", "0.0.0.0"),
            port: pick(&args.port, &file, "port", 2101),
            log_level: pick_string(&args.log_level, &file, "log_level", "info"),
            stderr: pick_flag(args.stderr, &file, "stderr"),
            pid_file: PathBuf::from(pick_string(
                &args.pid_file.map(|p| p.to_string_lossy().into_owned()),
                &file,
                "pid_file",
                "/var/run/ntrip-caster.pid",
            )),
        };
        if cfg.port == 0 {
            return Err(NtripError::Config("port must be nonzero".into()));
        }
        Ok(cfg)
    }
}

// ── server ───────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "server", about = "NTRIP server: publish a DataSource to a caster mount")]
pub struct ServerArgs {
    #[arg(long = "host")]
    pub host: Option<String>,
    #[arg(long = "port")]
    pub port: Option<u16>,
    #[arg(long = "user")]
    pub user: Option<String>,
    #[arg(long = "password")]
    pub password: Option<String>,
    #[arg(long = "mountpoint")]
    pub mountpoint: Option<String>,
    #[arg(long = "file")]
    pub file: Option<PathBuf>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[arg(long = "stderr")]
    pub stderr: bool,
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mountpoint: String,
    pub file: Option<PathBuf>,
    pub log_level: String,
    pub stderr: bool,
    pub pid_file: PathBuf,
}

impl ServerConfig {
    pub fn resolve(args: ServerArgs) -> Result<Self> {
        let file_kv = match &args.config {
            Some(path) => load_key_values(path)?,
            None => HashMap::new(),
        };
        let mountpoint = pick_string(&args.mountpoint, &file_kv, "mountpoint", "");
        if mountpoint.is_empty() {
            return Err(NtripError::Config("mountpoint is required".into()));
        }
        let data_file = args
            .file
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| file_kv.get("file").cloned())
            .map(PathBuf::from);

        Ok(Self {
            host: pick_string(&args.host, &file_kv, "host", ""),
            port: pick(&args.port, &file_kv, "port", 2101),
            user: pick_string(&args.user, &file_kv, "user", ""),
            password: pick_string(&args.password, &file_kv, "password", ""),
            mountpoint,
            file: data_file,
            log_level: pick_string(&args.log_level, &file_kv, "log_level", "info"),
            stderr: pick_flag(args.stderr, &file_kv, "stderr"),
            pid_file: PathBuf::from(pick_string(
                &args.pid_file.map(|p| p.to_string_lossy().into_owned()),
                &file_kv,
                "pid_file",
                "/var/run/ntrip-server.pid",
            )),
        })
    }
}

// ── rover ────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "rover", about = "RTK rover: NTRIP client + GNSS serial coordinator")]
pub struct RoverArgs {
    #[arg(long = "server")]
    pub server: Option<String>,
    #[arg(long = "port")]
    pub port: Option<u16>,
    #[arg(long = "user")]
    pub user: Option<String>,
    #[arg(long = "password")]
    pub password: Option<String>,
    #[arg(long = "mountpoint")]
    pub mountpoint: Option<String>,
    #[arg(long = "gnss")]
    pub gnss: Option<String>,
    #[arg(long = "baud")]
    pub baud: Option<u32>,
    #[arg(long = "duration")]
    pub duration: Option<u64>,
    #[arg(long = "verbose")]
    pub verbose: bool,
    #[arg(long = "reconnect")]
    pub reconnect: bool,
    #[arg(long = "reconnect-interval")]
    pub reconnect_interval: Option<u64>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[arg(long = "stderr")]
    pub stderr: bool,
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mountpoint: String,
    pub gnss: String,
    pub baud: u32,
    pub duration: u64,
    pub verbose: bool,
    pub reconnect: bool,
    pub reconnect_interval: u64,
    pub log_level: String,
    pub stderr: bool,
    pub pid_file: PathBuf,
}

impl RoverConfig {
    pub fn resolve(args: RoverArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_key_values(path)?,
            None => HashMap::new(),
        };
        let server = pick_string(&args.server, &file, "server", "");
        let gnss = pick_string(&args.gnss, &file, "gnss", "");
        if server.is_empty() && gnss.is_empty() {
            return Err(NtripError::Config(
                "rover requires at least one of -server or -gnss to be reachable".into(),
            ));
        }
        Ok(Self {
            server,
            port: pick(&args.port, &file, "port", 2101),
            user: pick_string(&args.user, &file, "user", ""),
            password: pick_string(&args.password, &file, "password", ""),
            mountpoint: pick_string(&args.mountpoint, &file, "mountpoint", ""),
            gnss,
            baud: pick(&args.baud, &file, "baud", crate::bytestream::DEFAULT_BAUD),
            duration: pick(&args.duration, &file, "duration", 0),
            verbose: pick_flag(args.verbose, &file, "verbose"),
            reconnect: pick_flag(args.reconnect, &file, "reconnect"),
            reconnect_interval: pick(&args.reconnect_interval, &file, "reconnect_interval", 5),
            log_level: pick_string(&args.log_level, &file, "log_level", "info"),
            stderr: pick_flag(args.stderr, &file, "stderr"),
            pid_file: PathBuf::from(pick_string(
                &args.pid_file.map(|p| p.to_string_lossy().into_owned()),
                &file,
                "pid_file",
                "/var/run/ntrip-rover.pid",
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caster_defaults_without_config_file() {
        let args = CasterArgs {
            host: None,
            port: None,
            log_level: None,
            stderr: false,
            config: None,
            pid_file: None,
        };
        let cfg = CasterConfig::resolve(args).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 2101);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn cli_overrides_file_value() {
        let path = std::env::temp_dir().join("ntrip_core_config_test_caster.conf");
        fs::write(&path, "port=9999\nhost=10.0.0.1\n").unwrap();
        let args = CasterArgs {
            host: None,
            port: Some(2105),
            log_level: None,
            stderr: false,
            config: Some(path.clone()),
            pid_file: None,
        };
        let cfg = CasterConfig::resolve(args).unwrap();
        assert_eq!(cfg.port, 2105); // CLI wins
        assert_eq!(cfg.host, "10.0.0.1"); // file wins over default
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rover_requires_server_or_gnss() {
        let args = RoverArgs {
            server: None,
            port: None,
            user: None,
            password: None,
            mountpoint: None,
            gnss: None,
            baud: None,
            duration: None,
            verbose: false,
            reconnect: false,
            reconnect_interval: None,
            log_level: None,
            stderr: false,
            config: None,
            pid_file: None,
        };
        assert!(matches!(RoverConfig::resolve(args), Err(NtripError::Config(_))));
    }

    #[test]
    fn server_requires_mountpoint() {
        let args = ServerArgs {
            host: None,
            port: None,
            user: None,
            password: None,
            mountpoint: None,
            file: None,
            log_level: None,
            stderr: false,
            config: None,
            pid_file: None,
        };
        assert!(matches!(ServerConfig::resolve(args), Err(NtripError::Config(_))));
    }

    #[test]
    fn config_file_parser_skips_comments_and_blanks() {
        let path = std::env::temp_dir().join("ntrip_core_config_test_kv.conf");
        fs::write(&path, "# a comment\n\nport=1234\nunknown_key=ignored\n").unwrap();
        let kv = load_key_values(&path).unwrap();
        assert_eq!(kv.get("port").map(String::as_str), Some("1234"));
        assert_eq!(kv.get("unknown_key").map(String::as_str), Some("ignored"));
        let _ = fs::remove_file(&path);
    }
}
