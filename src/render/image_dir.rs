use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::overlay::draw_motion;
use super::smoothing::RectMatcher;
use super::RenderTarget;
use crate::frame::AnnotatedFrame;

/// Writes each frame to `frame_{sequence:06}.png` with motion regions drawn.
///
/// Region coordinates are smoothed across frames before drawing, so boxes do not
/// jitter from one frame to the next. Failed frames are written without overlay.
pub struct ImageDirTarget {
    dir: PathBuf,
    matcher: RectMatcher,
    written: u64,
}

impl ImageDirTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            matcher: RectMatcher::default(),
            written: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", sequence))
    }
}

impl RenderTarget for ImageDirTarget {
    fn describe(&self) -> String {
        format!("image output directory '{}'", self.dir.display())
    }

    fn open(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create output directory {}", self.dir.display()))?;
        if !self.dir.is_dir() {
            return Err(anyhow!("{} is not a directory", self.dir.display()));
        }
        Ok(())
    }

    fn render(&mut self, frame: AnnotatedFrame) -> Result<()> {
        let sequence = frame.sequence();
        let path = self.frame_path(sequence);
        let (frame, annotation) = frame.into_parts();
        let mut img = frame.into_image();
        if !annotation.is_failed() {
            self.matcher.update(annotation.regions());
            draw_motion(&mut img, &self.matcher.regions());
        }
        img.save(&path)
            .with_context(|| format!("write frame {} to {}", sequence, path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!(
            "image target: wrote {} frames to {}",
            self.written,
            self.dir.display()
        );
        Ok(())
    }
}
