//! # imagestream
//!
//! Result handles for decoded images.
//!
//! ## Architecture
//! - **Image / ImageInfo**: frame dimensions and decoded byte footprint
//! - **ImageStreamCompleter**: shared multi-listener handle driven by the decode pipeline
//! - **Last-listener callbacks**: one-shot notification when nobody observes a stream

#![warn(missing_docs)]

mod completer;
mod error;
mod image;

pub use completer::{
    CallbackId, ImageStreamCompleter, ImageStreamListener, ListenerId, WeakImageStreamCompleter,
};
pub use error::{Error, Result};
pub use image::{Image, ImageInfo, BYTES_PER_PIXEL};
