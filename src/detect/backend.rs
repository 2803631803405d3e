use anyhow::Result;

use crate::frame::{Frame, MotionAnnotation};

/// A per-frame motion detection operation.
///
/// # Contract
///
/// `detect` is a pure function of `(frame, prior state) -> (annotation, new state)`:
/// - The retained state lives in the detector stage that owns it and is passed in
///   explicitly. There is no process-wide background model.
/// - The same frames from the same initial state yield the same annotations. No
///   wall-clock reads, no randomness.
/// - On error the caller keeps `state` unchanged and marks the frame as failed.
///
/// `&self` holds only immutable configuration (sensitivity), so one operation can be
/// shared across several independent stages.
pub trait DetectionOperation: Send {
    /// State carried from one frame to the next.
    type State: Send;

    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// State before the first frame.
    fn initial_state(&self) -> Self::State;

    /// Run detection on one frame.
    fn detect(&self, frame: &Frame, state: &Self::State) -> Result<(MotionAnnotation, Self::State)>;
}

impl<D: DetectionOperation + ?Sized> DetectionOperation for Box<D> {
    type State = D::State;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn initial_state(&self) -> Self::State {
        (**self).initial_state()
    }

    fn detect(
        &self,
        frame: &Frame,
        state: &Self::State,
    ) -> Result<(MotionAnnotation, Self::State)> {
        (**self).detect(frame, state)
    }
}
