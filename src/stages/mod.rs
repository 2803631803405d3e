//! The three pipeline stages.
//!
//! Each stage is a loop over one operation, fed and drained by bounded channels:
//! - `source`: pull images, stamp sequence numbers, publish frames.
//! - `detector`: run the detection operation, publish annotated frames.
//! - `sink`: pace and render annotated frames.
//!
//! The per-frame steps (`FrameSequencer`, `DetectorStep`, `SinkStep`) are separate
//! from the loops so the sequential baseline reuses exactly the same semantics.

use serde::Serialize;
use std::time::Duration;

use crate::error::PipelineError;

pub(crate) mod detector;
pub(crate) mod sink;
pub(crate) mod source;

pub(crate) use detector::{run_detector, DetectorStep};
pub(crate) use sink::{run_sink, SinkStep};
pub(crate) use source::{run_source, FrameSequencer, OpenSource};

/// Identifies a stage in reports and errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Source,
    Detector,
    Sink,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Detector => "detector",
            StageKind::Sink => "sink",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageEnd {
    /// Input exhausted (source end of stream or upstream channel closed and drained).
    EndOfStream,
    /// The cancellation token was raised.
    Cancelled,
    /// The downstream consumer went away.
    DownstreamClosed,
}

/// Per-stage counters returned when a stage finishes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    /// Items taken from the input (images read, for the source).
    pub frames_in: u64,
    /// Items published downstream (frames rendered, for the sink).
    pub frames_out: u64,
    /// Frames that failed individually.
    pub transient_failures: u64,
    /// Frames discarded by the output channel's drop policy.
    pub dropped: u64,
    /// Last sequence number processed successfully.
    pub last_sequence: Option<u64>,
    pub ended_by: StageEnd,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Moving-average render rate (sink only).
    pub average_fps: Option<f64>,
}

impl StageReport {
    pub(crate) fn new(stage: StageKind) -> Self {
        Self {
            stage,
            frames_in: 0,
            frames_out: 0,
            transient_failures: 0,
            dropped: 0,
            last_sequence: None,
            ended_by: StageEnd::EndOfStream,
            elapsed: Duration::ZERO,
            average_fps: None,
        }
    }
}

/// Counts consecutive per-frame failures and decides when they become systemic.
#[derive(Clone, Debug)]
pub(crate) struct FailureTracker {
    stage: StageKind,
    limit: u32,
    consecutive: u32,
}

impl FailureTracker {
    pub(crate) fn new(stage: StageKind, limit: u32) -> Self {
        Self {
            stage,
            limit,
            consecutive: 0,
        }
    }

    pub(crate) fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record one failure. Returns the systemic error once the limit is reached.
    pub(crate) fn failure(&mut self, last_sequence: Option<u64>) -> Result<(), PipelineError> {
        self.consecutive += 1;
        if self.consecutive >= self.limit {
            return Err(PipelineError::Systemic {
                stage: self.stage,
                failures: self.consecutive,
                last_sequence,
            });
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
