//! Pipeline error taxonomy.
//!
//! - `Config`: rejected before the pipeline is created.
//! - `Startup`: a resource failed to open; the pipeline never reaches `Running`.
//! - `Systemic`: a stage hit too many consecutive per-frame failures.
//! - `StagePanicked`: a stage thread unwound; handled like a systemic failure.
//!
//! Per-frame failures (`TransientFrameError`) never leave the stage that saw them.
//! Cancellation is not an error and has no variant here.

use thiserror::Error;

use crate::stages::StageKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to initialize {resource}: {reason}")]
    Startup { resource: String, reason: String },

    #[error(
        "{stage} stage stopped after {failures} consecutive frame failures \
         (last processed sequence: {})",
        format_sequence(.last_sequence)
    )]
    Systemic {
        stage: StageKind,
        failures: u32,
        last_sequence: Option<u64>,
    },

    #[error("{stage} stage panicked")]
    StagePanicked { stage: StageKind },
}

impl PipelineError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn startup(resource: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Startup {
            resource: resource.into(),
            reason: format!("{:#}", err),
        }
    }

    /// Stage that caused the pipeline to stop, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Systemic { stage, .. } | Self::StagePanicked { stage } => Some(*stage),
            _ => None,
        }
    }
}

/// A failure confined to one frame. The stage logs it and moves on.
#[derive(Debug, Error)]
#[error("frame {sequence}: {reason}")]
pub struct TransientFrameError {
    pub sequence: u64,
    pub reason: String,
}

impl TransientFrameError {
    pub fn new(sequence: u64, err: &anyhow::Error) -> Self {
        Self {
            sequence,
            reason: format!("{:#}", err),
        }
    }
}

fn format_sequence(sequence: &Option<u64>) -> String {
    match sequence {
        Some(seq) => seq.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemic_error_reports_stage_and_sequence() {
        let err = PipelineError::Systemic {
            stage: StageKind::Detector,
            failures: 5,
            last_sequence: Some(41),
        };
        let msg = err.to_string();
        assert!(msg.contains("detector"));
        assert!(msg.contains("41"));
        assert_eq!(err.stage(), Some(StageKind::Detector));
    }

    #[test]
    fn startup_error_names_resource() {
        let err = PipelineError::startup("video source 'stub://x'", &anyhow::anyhow!("boom"));
        assert!(err.to_string().contains("video source 'stub://x'"));
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn systemic_error_without_progress() {
        let err = PipelineError::Systemic {
            stage: StageKind::Sink,
            failures: 3,
            last_sequence: None,
        };
        assert!(err.to_string().contains("none"));
    }
}
