use anyhow::Result;

use super::RenderTarget;
use crate::frame::{AnnotatedFrame, MotionAnnotation};

/// Logs a summary of each frame and discards the pixels.
#[derive(Debug, Default)]
pub struct LogTarget {
    rendered: u64,
    with_motion: u64,
}

impl LogTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn with_motion(&self) -> u64 {
        self.with_motion
    }
}

impl RenderTarget for LogTarget {
    fn describe(&self) -> String {
        "log target".to_string()
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, frame: AnnotatedFrame) -> Result<()> {
        match frame.annotation() {
            MotionAnnotation::Still => log::debug!("frame {}: still", frame.sequence()),
            MotionAnnotation::Motion(regions) => {
                self.with_motion += 1;
                log::debug!(
                    "frame {}: motion in {} region(s) {:?}",
                    frame.sequence(),
                    regions.len(),
                    regions
                );
            }
            MotionAnnotation::Failed(reason) => {
                log::debug!("frame {}: detection failed ({})", frame.sequence(), reason)
            }
        }
        self.rendered += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::info!(
            "log target: {} frames, {} with motion",
            self.rendered,
            self.with_motion
        );
        Ok(())
    }
}
