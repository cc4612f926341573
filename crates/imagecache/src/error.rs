//! Error types for imagecache

use std::io;

use thiserror::Error;

/// Result type alias for imagecache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum Error {
    /// A loader failed to produce a result handle
    #[error(transparent)]
    Stream(#[from] imagestream::Error),

    /// Configuration could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    /// Configuration was read but is not valid
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
