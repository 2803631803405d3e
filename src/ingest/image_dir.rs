//! Directory of still images, one file per frame.
//!
//! Files with a `png`, `jpg` or `jpeg` extension are read in file-name order. Other
//! entries are ignored.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::VideoSource;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageDirSource {
    dir: PathBuf,
    frame_limit: Option<u64>,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageDirSource {
    pub fn new(dir: &Path, frame_limit: Option<u64>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            frame_limit,
            files: Vec::new(),
            cursor: 0,
        }
    }

    /// Number of image files found by `open`.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl VideoSource for ImageDirSource {
    fn describe(&self) -> String {
        format!("image directory '{}'", self.dir.display())
    }

    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "image directory {} contains no png or jpeg files",
                self.dir.display()
            ));
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} images in {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self
            .frame_limit
            .is_some_and(|limit| self.cursor as u64 >= limit)
        {
            return Ok(None);
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let img = image::open(path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        Ok(Some(img))
    }
}
