//! Error types for imagestream

use thiserror::Error;

/// Result type alias for image stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while loading or decoding an image.
///
/// A completer keeps the last reported error and replays it to listeners that
/// attach later, so the error is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The encoded bytes could not be obtained
    #[error("failed to load image: {0}")]
    Load(String),

    /// The encoded bytes could not be decoded into a frame
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// A frame was produced with unusable dimensions
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidImage {
        /// Reported width in pixels
        width: u32,
        /// Reported height in pixels
        height: u32,
    },
}
