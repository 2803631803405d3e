//! Source selection from a configured input URI.
//!
//! - `stub://<name>` selects the synthetic scene generator.
//! - A local directory selects `ImageDirSource`.
//! - Any other local path is decoded as a video file (feature: ingest-ffmpeg).
//!
//! Remote URLs are rejected; ingestion is local-only.

use anyhow::{anyhow, Result};
use std::path::Path;

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::image_dir::ImageDirSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::VideoSource;

/// Configuration for the pipeline's input.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name`, a directory of images, or a local video file.
    pub uri: String,
    /// Stop after this many frames.
    pub frame_limit: Option<u64>,
    /// Frame width (synthetic frames only).
    pub width: u32,
    /// Frame height (synthetic frames only).
    pub height: u32,
    /// Noise seed (synthetic frames only).
    pub seed: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://demo".to_string(),
            frame_limit: None,
            width: 640,
            height: 480,
            seed: 0,
        }
    }
}

/// Build the source named by `config.uri`. The returned source is not opened yet.
pub fn source_from_config(config: &SourceConfig) -> Result<Box<dyn VideoSource>> {
    if !is_local_file_path(&config.uri) {
        return Err(anyhow!(
            "input '{}' is not supported: only local paths and stub:// URIs are allowed",
            config.uri
        ));
    }
    if let Some(name) = config.uri.strip_prefix("stub://") {
        let synthetic = SyntheticConfig {
            name: name.to_string(),
            width: config.width,
            height: config.height,
            frames: config
                .frame_limit
                .unwrap_or(SyntheticConfig::default().frames),
            seed: config.seed,
            ..SyntheticConfig::default()
        };
        return Ok(Box::new(SyntheticSource::new(synthetic)));
    }

    let path = Path::new(&config.uri);
    if path.is_dir() {
        return Ok(Box::new(ImageDirSource::new(path, config.frame_limit)));
    }

    #[cfg(feature = "ingest-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileSource::new(path, config.frame_limit)))
    }
    #[cfg(not(feature = "ingest-ffmpeg"))]
    {
        Err(anyhow!(
            "input '{}' is not a directory; video file decoding requires the ingest-ffmpeg feature",
            config.uri
        ))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
