//! Frame sources.
//!
//! This module provides the sources the source stage pulls images from:
//! - Synthetic scenes (`stub://` URIs, testing and demos)
//! - Directories of still images (one file per frame, sorted by name)
//! - In-memory image lists
//! - Local video files (feature: ingest-ffmpeg)
//!
//! Sources only produce pixels. Sequence numbers and capture timestamps are stamped by
//! the source stage, so a source cannot introduce gaps or reorderings.
//!
//! A source MUST:
//! - Return images in presentation order
//! - Return `Ok(None)` once the stream is exhausted
//!
//! A source MUST NOT:
//! - Hand out the same image twice
//! - Retain images after returning them

use anyhow::Result;
use image::RgbImage;

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod image_dir;
pub mod memory;
pub mod synthetic;

pub use file::{source_from_config, SourceConfig};
pub use image_dir::ImageDirSource;
pub use memory::MemorySource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Pull interface over an ordered stream of images.
pub trait VideoSource: Send {
    /// Human-readable identity, used in startup errors and logs.
    fn describe(&self) -> String;

    /// Acquire the underlying stream. Failure here is fatal for the pipeline.
    fn open(&mut self) -> Result<()>;

    /// Next image in presentation order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Native frame rate, when the stream knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Release the underlying stream. Called once, whatever ended the run.
    fn close(&mut self) {}
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
