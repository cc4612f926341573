//! # imagecache
//!
//! In-memory cache of decoded image loads.
//!
//! ## Architecture
//! - **Pending**: in-flight loads, so concurrent requests share one loader call
//! - **Cached**: completed loads under count and byte budgets, evicted LRU first
//! - **Live**: loads something still listens to, kept outside the budgets
//!
//! A request checks the tables in that order and invokes the loader only
//! when none of them knows the key. Handles are
//! [`ImageStreamCompleter`]s from the `imagestream` crate.

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod key;
mod lru;
mod policy;
mod stats;
mod status;
mod tables;

pub use cache::ImageCache;
pub use config::{CacheConfig, DEFAULT_MAXIMUM_SIZE, DEFAULT_MAXIMUM_SIZE_BYTES};
pub use error::{Error, Result};
pub use imagestream::{Image, ImageInfo, ImageStreamCompleter, ImageStreamListener};
pub use key::{CacheKey, ImageKey};
pub use stats::CacheStats;
pub use status::ImageCacheStatus;
