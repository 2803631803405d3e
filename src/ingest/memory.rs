use anyhow::Result;
use image::RgbImage;
use std::collections::VecDeque;

use super::VideoSource;

/// Source backed by a list of images held in memory.
pub struct MemorySource {
    name: String,
    images: VecDeque<RgbImage>,
    frame_rate: Option<f64>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, images: Vec<RgbImage>) -> Self {
        Self {
            name: name.into(),
            images: images.into(),
            frame_rate: None,
        }
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn remaining(&self) -> usize {
        self.images.len()
    }
}

impl VideoSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory source '{}'", self.name)
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.images.pop_front())
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}
