mod backend;
mod backends;
mod region;

pub use backend::DetectionOperation;
pub use backends::{BackgroundModel, FrameDiffDetector, MotionSensitivity, DETECTION_SIZE};
pub use region::{merge_nearby, Region};
