use thiserror::Error;

/// Top-level error type for presence-core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
