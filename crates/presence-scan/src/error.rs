//! Error types for the presence-scan crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Invalid address range {range:?}: expected an IPv4 CIDR block or address")]
    InvalidTarget { range: String },

    #[error("Probe of {target} did not finish within {timeout_secs}s")]
    ProbeTimeout { target: String, timeout_secs: u64 },

    #[error("Store error: {0}")]
    Store(#[from] presence_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cycle task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ScanError>;
