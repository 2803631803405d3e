//! Frames and annotated frames.
//!
//! - `Frame`: an immutable image snapshot stamped by the source stage with a sequence
//!   number and capture instant. Not `Clone`: handing a frame to the next stage moves it.
//! - `AnnotatedFrame`: the original frame plus the detector's `MotionAnnotation`.
//!   Carries the same sequence number as the frame it was derived from.

use image::RgbImage;
use std::time::{Duration, Instant};

use crate::detect::Region;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded image sample.
///
/// The pixel buffer is private and there is no mutable accessor. Frames cannot be
/// duplicated:
///
/// ```compile_fail
/// let frame = motion_pipeline::Frame::new(0, image::RgbImage::new(1, 1));
/// let _copy = frame.clone();
/// ```
pub struct Frame {
    image: RgbImage,
    sequence: u64,
    captured_at: Instant,
}

// Explicitly NOT implementing Clone. Ownership moves from stage to stage.

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self::with_capture_time(sequence, image, Instant::now())
    }

    pub fn with_capture_time(sequence: u64, image: RgbImage, captured_at: Instant) -> Self {
        Self {
            image,
            sequence,
            captured_at,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time since the source stamped this frame.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Consume the frame, releasing its pixels (used by render targets that draw in place).
    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data stays out of debug output.
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Annotations
// ----------------------------------------------------------------------------

/// What the detector concluded about one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MotionAnnotation {
    /// No motion relative to the retained background.
    #[default]
    Still,
    /// Motion in the listed regions (source-frame pixel coordinates, never empty).
    Motion(Vec<Region>),
    /// Detection failed for this frame; the frame is forwarded unannotated.
    Failed(String),
}

impl MotionAnnotation {
    /// Build from a region list: empty means `Still`.
    pub fn from_regions(regions: Vec<Region>) -> Self {
        if regions.is_empty() {
            Self::Still
        } else {
            Self::Motion(regions)
        }
    }

    pub fn motion_detected(&self) -> bool {
        matches!(self, Self::Motion(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn regions(&self) -> &[Region] {
        match self {
            Self::Motion(regions) => regions,
            _ => &[],
        }
    }
}

/// A frame plus detection results.
#[derive(Debug)]
pub struct AnnotatedFrame {
    frame: Frame,
    annotation: MotionAnnotation,
}

impl AnnotatedFrame {
    pub fn new(frame: Frame, annotation: MotionAnnotation) -> Self {
        Self { frame, annotation }
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn annotation(&self) -> &MotionAnnotation {
        &self.annotation
    }

    pub fn into_parts(self) -> (Frame, MotionAnnotation) {
        (self.frame, self.annotation)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_test_frame(sequence: u64) -> Frame {
        Frame::new(sequence, RgbImage::from_pixel(8, 4, Rgb([10, 20, 30])))
    }

    #[test]
    fn frame_exposes_metadata() {
        let frame = make_test_frame(7);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.width(), 8);
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.byte_len(), 8 * 4 * 3);
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = make_test_frame(1);
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("sequence: 1"));
        assert!(!rendered.contains("10, 20, 30"));
    }

    #[test]
    fn annotated_frame_keeps_sequence() {
        let annotated = AnnotatedFrame::new(make_test_frame(3), MotionAnnotation::Still);
        assert_eq!(annotated.sequence(), 3);
        assert!(!annotated.annotation().motion_detected());
        let (frame, annotation) = annotated.into_parts();
        assert_eq!(frame.sequence(), 3);
        assert_eq!(annotation, MotionAnnotation::Still);
    }

    #[test]
    fn empty_region_list_is_still() {
        assert_eq!(MotionAnnotation::from_regions(vec![]), MotionAnnotation::Still);
        let motion = MotionAnnotation::from_regions(vec![Region::new(0, 0, 4, 4)]);
        assert!(motion.motion_detected());
        assert_eq!(motion.regions().len(), 1);
        assert!(MotionAnnotation::Failed("x".into()).regions().is_empty());
    }
}
