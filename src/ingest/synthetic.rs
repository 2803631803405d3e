//! Synthetic scene generator for `stub://` inputs.
//!
//! Renders a dark gradient with low-amplitude noise and a bright square. The square
//! holds still for `still_frames` frames and then sweeps back and forth. Output is
//! fully determined by the config (noise comes from a seeded RNG).

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::VideoSource;

/// Configuration for a synthetic scene.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Total frames before end of stream.
    pub frames: u64,
    /// Frames at the start during which the square does not move.
    pub still_frames: u64,
    /// Square movement per frame, in pixels.
    pub speed: u32,
    /// Peak noise amplitude added to every channel.
    pub noise: u8,
    pub seed: u64,
    pub frame_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "demo".to_string(),
            width: 640,
            height: 480,
            frames: 300,
            still_frames: 10,
            speed: 6,
            noise: 3,
            seed: 0,
            frame_rate: 30.0,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            frame_count: 0,
            connected: false,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    /// Top-left corner of the square for frame `index`.
    fn square_origin(&self, index: u64, side: u32) -> (u32, u32) {
        let travel = self.config.width.saturating_sub(side).max(1) as u64;
        let moving_for = index.saturating_sub(self.config.still_frames);
        let offset = (moving_for * self.config.speed as u64) % (2 * travel);
        let x = if offset < travel {
            offset
        } else {
            2 * travel - offset
        };
        let y = self.config.height.saturating_sub(side) / 2;
        (x as u32, y)
    }

    fn render(&mut self, index: u64) -> RgbImage {
        let (width, height) = (self.config.width, self.config.height);
        let side = (width.min(height) / 6).max(1);
        let (sx, sy) = self.square_origin(index, side);
        let noise = self.config.noise as i16;
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let in_square = x >= sx && x < sx + side && y >= sy && y < sy + side;
            let base: i16 = if in_square {
                230
            } else {
                (20 + (y * 40 / height.max(1))) as i16
            };
            let jitter = if noise > 0 {
                self.rng.gen_range(-noise..=noise)
            } else {
                0
            };
            let v = (base + jitter).clamp(0, 255) as u8;
            *pixel = Rgb([v, v, v]);
        }
        img
    }
}

impl VideoSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic source 'stub://{}'", self.config.name)
    }

    fn open(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!(
                "synthetic frame size {}x{} must be non-zero",
                self.config.width,
                self.config.height
            ));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{}, {} frames)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.frames
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if !self.connected {
            return Err(anyhow!("synthetic source read before open"));
        }
        if self.frame_count >= self.config.frames {
            return Ok(None);
        }
        let img = self.render(self.frame_count);
        self.frame_count += 1;
        Ok(Some(img))
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.config.frame_rate)
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(frames: u64, seed: u64) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            width: 48,
            height: 36,
            frames,
            still_frames: 2,
            seed,
            ..SyntheticConfig::default()
        })
    }

    fn collect(mut source: SyntheticSource) -> Vec<RgbImage> {
        source.open().unwrap();
        let mut frames = Vec::new();
        while let Some(img) = source.next_frame().unwrap() {
            frames.push(img);
        }
        frames
    }

    #[test]
    fn produces_configured_frame_count() {
        let frames = collect(small(5, 1));
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| f.dimensions() == (48, 36)));
    }

    #[test]
    fn same_seed_same_frames() {
        assert_eq!(collect(small(4, 9)), collect(small(4, 9)));
    }

    #[test]
    fn square_moves_after_still_frames() {
        let source = small(10, 0);
        assert_eq!(source.square_origin(0, 6), source.square_origin(2, 6));
        assert_ne!(source.square_origin(2, 6), source.square_origin(3, 6));
    }

    #[test]
    fn read_before_open_fails() {
        let mut source = small(1, 0);
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn zero_size_fails_to_open() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 0,
            ..SyntheticConfig::default()
        });
        assert!(source.open().is_err());
    }
}
