//! Configuration for the presence scanner.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Config file looked up when `--config` is not given (any extension the
/// `config` crate understands, e.g. `presence.toml`).
pub const DEFAULT_CONFIG_PREFIX: &str = "presence";

/// Top-level scan configuration.
///
/// Loaded from the `[scan]` section of the config file, then overridden by
/// `PRESENCE__SCAN__*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    /// SQLite database holding devices and sessions.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Maximum number of cycles in flight at once. With 1, cycles never overlap.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_cycles: usize,

    /// Abandon a probe after this many seconds. Unset means wait indefinitely.
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,

    /// Refuse to scan without root (ARP replies carry no MAC otherwise).
    #[serde(default = "default_true")]
    pub require_root: bool,
}

impl ScanConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist and parse. Without one, a `presence.*`
    /// file in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PREFIX).required(false),
        };

        let cfg = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("PRESENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ScanError::Config(e.to_string()))?;

        match cfg.get::<ScanConfig>("scan") {
            Ok(c) => c.validated(),
            Err(config::ConfigError::NotFound(_)) => Ok(ScanConfig::default()),
            Err(e) => Err(ScanError::Config(e.to_string())),
        }
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_secs.map(Duration::from_secs)
    }

    fn validated(self) -> Result<Self> {
        if self.max_concurrent_cycles == 0 {
            return Err(ScanError::Config(
                "scan.max_concurrent_cycles must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_secs == Some(0) {
            return Err(ScanError::Config(
                "scan.probe_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

fn default_database_path() -> String {
    "presence.db".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            nmap_path: default_nmap_path(),
            max_concurrent_cycles: default_max_concurrent(),
            probe_timeout_secs: None,
            require_root: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.database_path, "presence.db");
        assert_eq!(config.nmap_path, "nmap");
        assert_eq!(config.max_concurrent_cycles, 1);
        assert_eq!(config.probe_timeout(), None);
        assert!(config.require_root);
    }

    #[test]
    fn test_load_from_file() {
        let (_dir, path) = write_config(
            r#"
[scan]
database_path = "/var/lib/presence/presence.db"
nmap_path = "/usr/local/bin/nmap"
probe_timeout_secs = 30
"#,
        );

        let config = ScanConfig::load(Some(&path)).unwrap();
        assert_eq!(config.database_path, "/var/lib/presence/presence.db");
        assert_eq!(config.nmap_path, "/usr/local/bin/nmap");
        assert_eq!(config.probe_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_concurrent_cycles, 1);
    }

    #[test]
    fn test_file_without_scan_section_uses_defaults() {
        let (_dir, path) = write_config("[other]\nkey = 1\n");
        let config = ScanConfig::load(Some(&path)).unwrap();
        assert_eq!(config.nmap_path, "nmap");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScanConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let (_dir, path) = write_config("[scan\nnmap_path = ");
        assert!(ScanConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let (_dir, path) = write_config("[scan]\nmax_concurrent_cycles = 0\n");
        let err = ScanConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_cycles"));
    }
}
