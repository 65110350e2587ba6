//! Process-lifecycle utilities shared by all three binaries.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::warn;

/// Write the current process PID to `path`.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(path)?;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

/// Remove the PID file (best-effort, logs a warning on failure).
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to remove PID file {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_removes_pid_file() {
        let path = std::env::temp_dir().join("ntrip_core_util_test.pid");
        write_pid_file(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        remove_pid_file(&path);
        assert!(!path.exists());
    }
}
