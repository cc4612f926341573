//! Cache keys

use std::fmt;
use std::hash::Hash;

/// Bounds required of anything used to key an [`ImageCache`](crate::ImageCache)
///
/// Two keys that compare equal always refer to the same entry, however they
/// were constructed.
pub trait CacheKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Identity of a decode request: where the bytes come from and how to decode them
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    locator: String,
    width: Option<u32>,
    height: Option<u32>,
    /// Bit pattern of the `f32` scale, so the key can be `Eq + Hash`
    scale_bits: u32,
}

impl ImageKey {
    /// Key for `locator` decoded at its intrinsic size and scale 1.0
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            width: None,
            height: None,
            scale_bits: 1.0f32.to_bits(),
        }
    }

    /// Request a decode at a target size
    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Request a decode at a device pixel scale
    pub fn with_scale(mut self, scale: f32) -> Self {
        // -0.0 and 0.0 must not become distinct keys
        let scale = if scale == 0.0 { 0.0 } else { scale };
        self.scale_bits = scale.to_bits();
        self
    }

    /// Resource locator
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Target decode width
    pub fn width(&self) -> Option<u32> {
        self.width
    }

    /// Target decode height
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Device pixel scale
    pub fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.locator)?;
        match (self.width, self.height) {
            (None, None) => {}
            (w, h) => {
                let dim = |d: Option<u32>| d.map_or_else(|| "auto".to_string(), |d| d.to_string());
                write!(f, " ({}x{})", dim(w), dim(h))?;
            }
        }
        write!(f, " @ {}x", self.scale())
    }
}
