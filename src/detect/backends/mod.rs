pub mod frame_diff;

pub use frame_diff::{BackgroundModel, FrameDiffDetector, MotionSensitivity, DETECTION_SIZE};
