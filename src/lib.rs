//! Staged motion detection pipeline.
//!
//! This crate reads a video stream, detects motion between consecutive frames and
//! renders the annotated result, either as three concurrent stages or as one
//! sequential loop.
//!
//! # Architecture
//!
//! ```text
//!   VideoSource ──> [source] ══frames══> [detector] ══annotated══> [sink] ──> RenderTarget
//! ```
//!
//! Each stage runs on its own thread. The two hand-offs (`══`) are bounded channels:
//!
//! 1. **FIFO**: frames reach the sink in sequence order, with no gaps or duplicates
//!    under the default `block` policy.
//! 2. **Backpressure**: a full channel stalls its producer. Dropping frames is an
//!    explicit channel policy (`drop-oldest`, `drop-newest`), never a stage decision.
//! 3. **Isolation**: the detector's background model, the source handle and the render
//!    target each belong to exactly one stage.
//! 4. **Cooperative shutdown**: every blocking point polls a shared cancellation token;
//!    end of stream propagates by closing channels.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `AnnotatedFrame`, `MotionAnnotation`
//! - `channel`: bounded stage channels and drop policies
//! - `detect`: the detection operation trait and the frame-differencing backend
//! - `ingest`: video sources (synthetic, image directory, memory, video file)
//! - `render`: render targets and drawing helpers
//! - `pipeline`: the staged coordinator and `RunReport`
//! - `baseline`: the sequential loop
//! - `config`: runtime options and file/environment loading

pub mod baseline;
pub mod channel;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod pipeline;
pub mod render;
pub mod stages;

pub use baseline::run_sequential;
pub use channel::{stage_channel, ChannelStats, DropPolicy, SendOutcome};
pub use config::{AppConfig, PipelineConfig};
pub use detect::{DetectionOperation, FrameDiffDetector, MotionSensitivity, Region};
pub use error::{PipelineError, TransientFrameError};
pub use frame::{AnnotatedFrame, Frame, MotionAnnotation};
pub use ingest::{source_from_config, MemorySource, SourceConfig, VideoSource};
pub use lifecycle::{CancellationToken, PipelineState};
pub use pipeline::{Pipeline, PipelineMonitor, RunReport, RunningPipeline};
pub use render::{ImageDirTarget, LogTarget, RenderTarget};
pub use stages::{StageEnd, StageKind, StageReport};
