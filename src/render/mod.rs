//! Render targets consumed by the sink stage.
//!
//! - `LogTarget`: one debug log line per frame, no pixels written.
//! - `ImageDirTarget`: annotated PNGs in an output directory.
//!
//! A target owns whatever it renders into. `render` takes the annotated frame by value,
//! so the frame's last owner is the target.

use anyhow::Result;

use crate::frame::AnnotatedFrame;

pub mod image_dir;
pub mod log_target;
pub mod overlay;
pub mod smoothing;

pub use image_dir::ImageDirTarget;
pub use log_target::LogTarget;
pub use smoothing::{MovingAverage, RectMatcher, SmoothRect};

pub trait RenderTarget: Send {
    /// Human-readable identity, used in startup errors and logs.
    fn describe(&self) -> String;

    /// Acquire the output. Failure here is fatal for the pipeline.
    fn open(&mut self) -> Result<()>;

    /// Render one frame. An error affects this frame only.
    fn render(&mut self, frame: AnnotatedFrame) -> Result<()>;

    /// Flush and release the output. Called once, whatever ended the run.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<R: RenderTarget + ?Sized> RenderTarget for Box<R> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn render(&mut self, frame: AnnotatedFrame) -> Result<()> {
        (**self).render(frame)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
