//! Decoded frame descriptions

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Bytes per decoded pixel (RGBA8)
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded image frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    width: u32,
    height: u32,
}

impl Image {
    /// Create a frame with the given pixel dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Create a frame, rejecting zero-sized dimensions
    pub fn try_new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage { width, height });
        }
        Ok(Self::new(width, height))
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decoded footprint in bytes, saturating at `usize::MAX`
    pub fn size_bytes(&self) -> usize {
        let bytes = u64::from(self.width)
            .saturating_mul(u64::from(self.height))
            .saturating_mul(BYTES_PER_PIXEL as u64);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}\u{d7}{}]", self.width, self.height)
    }
}

/// One frame emitted by an image stream, with the scale it was decoded at
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    image: Arc<Image>,
    scale: f32,
}

impl ImageInfo {
    /// Wrap a frame at scale 1.0
    pub fn new(image: Image) -> Self {
        Self::with_scale(image, 1.0)
    }

    /// Wrap a frame decoded at `scale`
    pub fn with_scale(image: Image, scale: f32) -> Self {
        Self {
            image: Arc::new(image),
            scale,
        }
    }

    /// The decoded frame
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Device pixel scale
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Decoded footprint of the frame in bytes
    pub fn size_bytes(&self) -> usize {
        self.image.size_bytes()
    }
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}x", self.image, self.scale)
    }
}
