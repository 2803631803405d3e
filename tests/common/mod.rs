#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use motion_pipeline::{
    AnnotatedFrame, DetectionOperation, Frame, MotionAnnotation, PipelineConfig, Region,
    RenderTarget, VideoSource,
};

pub const POLL: Duration = Duration::from_millis(10);

pub fn config(capacity: usize) -> PipelineConfig {
    PipelineConfig {
        channel_capacity: capacity,
        cancel_poll_interval: POLL,
        ..PipelineConfig::default()
    }
}

pub fn blank_images(count: usize) -> Vec<RgbImage> {
    vec![RgbImage::new(8, 6); count]
}

/// Black scene with white squares.
pub fn scene(width: u32, height: u32, squares: &[Region]) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    for sq in squares {
        for y in sq.y1..sq.y2 {
            for x in sq.x1..sq.x2 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
    }
    img
}

// ----------------------------------------------------------------------------
// Render targets
// ----------------------------------------------------------------------------

/// Shared record of what a `CollectingTarget` rendered.
#[derive(Clone, Default)]
pub struct Collected {
    frames: Arc<Mutex<Vec<(u64, MotionAnnotation)>>>,
    pub opened: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
}

impl Collected {
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.frames.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn annotations(&self) -> Vec<MotionAnnotation> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(_, a)| a.clone())
            .collect()
    }
}

pub struct CollectingTarget {
    collected: Collected,
    delay: Duration,
    fail_open: bool,
    fail_render: bool,
    panic_render: bool,
}

impl CollectingTarget {
    pub fn new(collected: &Collected) -> Self {
        Self {
            collected: collected.clone(),
            delay: Duration::ZERO,
            fail_open: false,
            fail_render: false,
            panic_render: false,
        }
    }

    /// Sleep this long inside every render.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_render(mut self) -> Self {
        self.fail_render = true;
        self
    }

    pub fn panicking_render(mut self) -> Self {
        self.panic_render = true;
        self
    }
}

impl RenderTarget for CollectingTarget {
    fn describe(&self) -> String {
        "collecting target".to_string()
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            bail!("display unavailable");
        }
        self.collected.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn render(&mut self, frame: AnnotatedFrame) -> Result<()> {
        if self.fail_render {
            bail!("render failed");
        }
        if self.panic_render {
            panic!("render panicked at frame {}", frame.sequence());
        }
        std::thread::sleep(self.delay);
        self.collected
            .frames
            .lock()
            .unwrap()
            .push((frame.sequence(), frame.annotation().clone()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.collected.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Sources
// ----------------------------------------------------------------------------

/// Produces small images until `limit` (forever when `None`).
///
/// Records the largest number of frames produced but not yet rendered by `watch`.
pub struct ScriptedSource {
    limit: Option<u64>,
    produced: u64,
    fail_open: bool,
    watch: Option<Collected>,
    pub max_in_flight: Arc<AtomicU64>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn endless() -> Self {
        Self {
            limit: None,
            produced: 0,
            fail_open: false,
            watch: None,
            max_in_flight: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn limited(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::endless()
        }
    }

    pub fn watching(mut self, collected: &Collected) -> Self {
        self.watch = Some(collected.clone());
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

impl VideoSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted source".to_string()
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("device busy"));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        if let Some(watch) = &self.watch {
            let in_flight = self.produced.saturating_sub(watch.len() as u64);
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        }
        self.produced += 1;
        Ok(Some(RgbImage::new(8, 6)))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Detection operations
// ----------------------------------------------------------------------------

/// Marks every frame `Still`; can fail from a sequence on, or panic at one.
#[derive(Default)]
pub struct ScriptedDetector {
    pub fail_from: Option<u64>,
    pub panic_at: Option<u64>,
}

impl DetectionOperation for ScriptedDetector {
    type State = u64;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn initial_state(&self) -> u64 {
        0
    }

    fn detect(&self, frame: &Frame, state: &u64) -> Result<(MotionAnnotation, u64)> {
        let seq = frame.sequence();
        if self.panic_at == Some(seq) {
            panic!("scripted panic at frame {seq}");
        }
        if self.fail_from.is_some_and(|from| seq >= from) {
            bail!("scripted failure at frame {seq}");
        }
        Ok((MotionAnnotation::Still, state + 1))
    }
}
