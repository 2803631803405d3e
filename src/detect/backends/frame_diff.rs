use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::detect::backend::DetectionOperation;
use crate::detect::region::{merge_nearby, Region};
use crate::frame::{Frame, MotionAnnotation};

/// Longest frame axis, in pixels, at which differencing runs. Larger frames are
/// downscaled first.
pub const DETECTION_SIZE: u32 = 500;

/// Tuning knobs for frame differencing.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionSensitivity {
    /// Components smaller than this (pixels at detection scale) are noise.
    pub min_area: u32,
    /// Per-pixel intensity change that counts as motion (0-255).
    pub pixel_threshold: u8,
    /// Gaussian blur sigma applied before differencing. Zero disables the blur.
    pub blur_sigma: f32,
    /// Weight of the newest frame when folding it into the background (0, 1].
    /// 1.0 makes the background the previous frame.
    ///
    /// Below 1.0 the background lags the scene: an object that appeared a few frames
    /// ago keeps differing from the partially blended background, so it is reported
    /// again (a ghost region) until the background catches up.
    pub background_alpha: f32,
    /// Dilation radius used to close holes in the motion mask.
    pub dilate_iterations: u8,
    /// Longest axis at detection scale.
    pub detection_size: u32,
}

impl Default for MotionSensitivity {
    fn default() -> Self {
        Self {
            min_area: 50,
            pixel_threshold: 25,
            blur_sigma: 3.5,
            background_alpha: 0.5,
            dilate_iterations: 2,
            detection_size: DETECTION_SIZE,
        }
    }
}

impl MotionSensitivity {
    pub fn validate(&self) -> Result<()> {
        if !(self.background_alpha > 0.0 && self.background_alpha <= 1.0) {
            return Err(anyhow!(
                "background_alpha must be in (0, 1], got {}",
                self.background_alpha
            ));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(anyhow!(
                "blur_sigma must be a finite value >= 0, got {}",
                self.blur_sigma
            ));
        }
        if self.detection_size == 0 {
            return Err(anyhow!("detection_size must be greater than zero"));
        }
        Ok(())
    }
}

/// Running background estimate at detection scale.
#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl BackgroundModel {
    fn seed(gray: &GrayImage) -> Self {
        Self {
            width: gray.width(),
            height: gray.height(),
            values: gray.pixels().map(|p| p.0[0] as f32).collect(),
        }
    }

    fn matches(&self, gray: &GrayImage) -> bool {
        self.width == gray.width() && self.height == gray.height()
    }

    /// `(1 - alpha) * background + alpha * frame`.
    fn blend(&self, gray: &GrayImage, alpha: f32) -> Self {
        let values = self
            .values
            .iter()
            .zip(gray.pixels())
            .map(|(bg, px)| (1.0 - alpha) * bg + alpha * px.0[0] as f32)
            .collect();
        Self {
            width: self.width,
            height: self.height,
            values,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Frame differencing against a running background.
///
/// Per frame: downscale, grayscale, blur, diff against the background as it stood
/// before this frame, threshold, dilate, label connected components, drop small ones,
/// scale boxes back to source coordinates, merge neighbours. The background is then
/// blended with the frame. The first frame (or a resolution change) only seeds it.
pub struct FrameDiffDetector {
    sensitivity: MotionSensitivity,
}

impl FrameDiffDetector {
    pub fn new(sensitivity: MotionSensitivity) -> Result<Self> {
        sensitivity.validate()?;
        Ok(Self { sensitivity })
    }

    pub fn sensitivity(&self) -> &MotionSensitivity {
        &self.sensitivity
    }

    /// Grayscale, blurred image at detection scale, and the factor back to source pixels.
    fn prepare(&self, frame: &Frame) -> (GrayImage, f64) {
        let (width, height) = (frame.width(), frame.height());
        let max_axis = width.max(height);
        let gray = if max_axis <= self.sensitivity.detection_size {
            imageops::grayscale(frame.image())
        } else {
            let scale = self.sensitivity.detection_size as f64 / max_axis as f64;
            let w = ((width as f64 * scale).round() as u32).max(1);
            let h = ((height as f64 * scale).round() as u32).max(1);
            let resized = imageops::resize(frame.image(), w, h, FilterType::Triangle);
            imageops::grayscale(&resized)
        };
        let gray = if self.sensitivity.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(&gray, self.sensitivity.blur_sigma)
        } else {
            gray
        };
        let scale_back = width as f64 / gray.width() as f64;
        (gray, scale_back)
    }

    fn motion_mask(&self, gray: &GrayImage, background: &BackgroundModel) -> GrayImage {
        let threshold = self.sensitivity.pixel_threshold as f32;
        let mut mask = GrayImage::new(gray.width(), gray.height());
        for ((out, px), bg) in mask
            .pixels_mut()
            .zip(gray.pixels())
            .zip(background.values.iter())
        {
            let reference = bg.round().clamp(0.0, 255.0);
            if (px.0[0] as f32 - reference).abs() > threshold {
                out.0[0] = 255;
            }
        }
        if self.sensitivity.dilate_iterations > 0 {
            imageproc::morphology::dilate(&mask, Norm::LInf, self.sensitivity.dilate_iterations)
        } else {
            mask
        }
    }

    fn regions(&self, mask: &GrayImage, scale_back: f64, frame: &Frame) -> Vec<Region> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let mut components: BTreeMap<u32, Component> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            components
                .entry(label)
                .and_modify(|c| c.include(x, y))
                .or_insert_with(|| Component::at(x, y));
        }
        components
            .values()
            .filter(|c| c.pixels >= self.sensitivity.min_area as u64)
            .map(|c| {
                Region::from_scaled_box(
                    c.min_x,
                    c.min_y,
                    c.max_x - c.min_x + 1,
                    c.max_y - c.min_y + 1,
                    scale_back,
                )
                .clamp_to(frame.width(), frame.height())
            })
            .filter(|r| !r.is_empty())
            .collect()
    }
}

impl DetectionOperation for FrameDiffDetector {
    type State = Option<BackgroundModel>;

    fn name(&self) -> &'static str {
        "frame-diff"
    }

    fn initial_state(&self) -> Self::State {
        None
    }

    fn detect(
        &self,
        frame: &Frame,
        state: &Self::State,
    ) -> Result<(MotionAnnotation, Self::State)> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("frame {} has no pixels", frame.sequence()));
        }
        let (gray, scale_back) = self.prepare(frame);
        let background = match state {
            Some(background) if background.matches(&gray) => background,
            Some(background) => {
                log::debug!(
                    "frame-diff: resolution changed from {:?} at frame {}, reseeding background",
                    background.dimensions(),
                    frame.sequence()
                );
                return Ok((MotionAnnotation::Still, Some(BackgroundModel::seed(&gray))));
            }
            None => return Ok((MotionAnnotation::Still, Some(BackgroundModel::seed(&gray)))),
        };

        let mask = self.motion_mask(&gray, background);
        let regions = merge_nearby(self.regions(&mask, scale_back, frame));
        let next = background.blend(&gray, self.sensitivity.background_alpha);
        Ok((MotionAnnotation::from_regions(regions), Some(next)))
    }
}

/// Bounding box and pixel count of one labelled component.
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u64,
}

impl Component {
    fn at(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 1,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scene(width: u32, height: u32, squares: &[Region]) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        for sq in squares {
            for y in sq.y1..sq.y2 {
                for x in sq.x1..sq.x2 {
                    img.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        img
    }

    fn run(detector: &FrameDiffDetector, images: Vec<RgbImage>) -> Vec<MotionAnnotation> {
        let mut state = detector.initial_state();
        let mut out = Vec::new();
        for (seq, img) in images.into_iter().enumerate() {
            let frame = Frame::new(seq as u64, img);
            let (annotation, next) = detector.detect(&frame, &state).unwrap();
            state = next;
            out.push(annotation);
        }
        out
    }

    #[test]
    fn first_frame_seeds_background() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let frame = Frame::new(0, scene(64, 48, &[]));
        let (annotation, state) = detector.detect(&frame, &None).unwrap();
        assert_eq!(annotation, MotionAnnotation::Still);
        assert_eq!(state.unwrap().dimensions(), (64, 48));
    }

    #[test]
    fn identical_frames_are_still() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let annotations = run(&detector, vec![scene(64, 48, &[]); 3]);
        assert!(annotations.iter().all(|a| *a == MotionAnnotation::Still));
    }

    #[test]
    fn new_square_is_reported_where_it_appeared() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let square = Region::new(20, 16, 36, 32);
        let annotations = run(&detector, vec![scene(64, 48, &[]), scene(64, 48, &[square])]);
        let regions = annotations[1].regions();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].contains(&square));
    }

    #[test]
    fn small_changes_are_filtered_by_min_area() {
        let sensitivity = MotionSensitivity {
            blur_sigma: 0.0,
            dilate_iterations: 0,
            min_area: 50,
            ..MotionSensitivity::default()
        };
        let detector = FrameDiffDetector::new(sensitivity).unwrap();
        let speck = Region::new(10, 10, 13, 13);
        let annotations = run(&detector, vec![scene(64, 48, &[]), scene(64, 48, &[speck])]);
        assert_eq!(annotations[1], MotionAnnotation::Still);
    }

    #[test]
    fn large_frames_are_downscaled_and_mapped_back() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let square = Region::new(400, 300, 560, 460);
        let annotations = run(
            &detector,
            vec![scene(1000, 800, &[]), scene(1000, 800, &[square])],
        );
        let regions = annotations[1].regions();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].intersects(&square));
        assert!(regions[0].x2 <= 1000 && regions[0].y2 <= 800);
    }

    #[test]
    fn resolution_change_reseeds() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let annotations = run(&detector, vec![scene(64, 48, &[]), scene(32, 32, &[])]);
        assert_eq!(annotations[1], MotionAnnotation::Still);
    }

    #[test]
    fn rejects_invalid_sensitivity() {
        let bad_alpha = MotionSensitivity {
            background_alpha: 0.0,
            ..MotionSensitivity::default()
        };
        assert!(FrameDiffDetector::new(bad_alpha).is_err());
        let bad_sigma = MotionSensitivity {
            blur_sigma: f32::NAN,
            ..MotionSensitivity::default()
        };
        assert!(FrameDiffDetector::new(bad_sigma).is_err());
    }

    #[test]
    fn empty_frame_is_an_error() {
        let detector = FrameDiffDetector::new(MotionSensitivity::default()).unwrap();
        let frame = Frame::new(0, RgbImage::new(0, 0));
        assert!(detector.detect(&frame, &None).is_err());
    }
}
