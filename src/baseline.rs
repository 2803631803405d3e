//! Sequential baseline: the three stage operations in one loop on the calling thread.
//!
//! Per-frame semantics match the staged pipeline (sequence stamping, failure markers,
//! render pacing, failure escalation). There are no channels, so nothing is ever
//! dropped and the drop policy and channel capacity have no effect.

use std::time::Instant;

use crate::config::PipelineConfig;
use crate::detect::DetectionOperation;
use crate::error::PipelineError;
use crate::ingest::VideoSource;
use crate::lifecycle::{CancellationToken, Lifecycle, PipelineState};
use crate::pipeline::RunReport;
use crate::render::RenderTarget;
use crate::stages::{DetectorStep, FrameSequencer, SinkStep, StageEnd, StageKind, StageReport};

/// Read, detect and render one frame at a time until end of stream or cancellation.
pub fn run_sequential<S, D, R>(
    config: &PipelineConfig,
    mut source: S,
    detector: D,
    mut target: R,
    cancel: &CancellationToken,
) -> Result<RunReport, PipelineError>
where
    S: VideoSource,
    D: DetectionOperation,
    R: RenderTarget,
{
    config.validate()?;
    let started = Instant::now();
    let mut lifecycle = Lifecycle::new();
    lifecycle.advance(PipelineState::Starting);

    if let Err(e) = source.open() {
        lifecycle.advance(PipelineState::Stopped);
        return Err(PipelineError::startup(source.describe(), &e));
    }
    if let Err(e) = target.open() {
        source.close();
        lifecycle.advance(PipelineState::Stopped);
        return Err(PipelineError::startup(target.describe(), &e));
    }
    log::info!(
        "baseline: {} -> {} -> {}",
        source.describe(),
        detector.name(),
        target.describe()
    );
    lifecycle.advance(PipelineState::Running);

    let mut sequencer = FrameSequencer::new();
    let mut detector = DetectorStep::new(
        detector,
        config.max_consecutive_failures,
        config.detection_timeout,
    );
    let mut sink = SinkStep::new(
        target,
        config.target_render_interval,
        config.cancel_poll_interval,
        config.max_consecutive_failures,
    );
    let mut source_report = StageReport::new(StageKind::Source);
    let mut detector_report = StageReport::new(StageKind::Detector);
    let mut sink_report = StageReport::new(StageKind::Sink);

    let outcome: Result<StageEnd, PipelineError> = loop {
        if cancel.is_cancelled() {
            break Ok(StageEnd::Cancelled);
        }
        let image = match source.next_frame() {
            Ok(Some(image)) => image,
            Ok(None) => break Ok(StageEnd::EndOfStream),
            Err(e) => {
                log::warn!(
                    "baseline: read failed after {} frames, ending stream: {:#}",
                    source_report.frames_in,
                    e
                );
                break Ok(StageEnd::EndOfStream);
            }
        };
        let frame = sequencer.stamp(image);
        source_report.frames_in += 1;
        source_report.frames_out += 1;
        source_report.last_sequence = Some(frame.sequence());

        detector_report.frames_in += 1;
        let annotated = match detector.process(frame) {
            Ok(annotated) => annotated,
            Err(e) => break Err(e),
        };
        detector_report.frames_out += 1;

        sink_report.frames_in += 1;
        if !sink.pace(cancel) {
            break Ok(StageEnd::Cancelled);
        }
        if let Err(e) = sink.render(annotated) {
            break Err(e);
        }
    };

    lifecycle.advance(PipelineState::Stopping);
    source.close();
    sink.close();
    lifecycle.advance(PipelineState::Stopped);

    let ended_by = match outcome {
        Ok(ended_by) => ended_by,
        Err(e) => {
            log::error!("baseline: {}", e);
            return Err(e);
        }
    };

    detector_report.transient_failures = detector.failures();
    detector_report.last_sequence = detector.last_sequence();
    sink.fill_report(&mut sink_report);
    let elapsed = started.elapsed();
    for report in [&mut source_report, &mut detector_report, &mut sink_report] {
        report.ended_by = ended_by;
        report.elapsed = elapsed;
    }

    let report = RunReport {
        source: source_report,
        detector: detector_report,
        sink: sink_report,
        elapsed,
        transitions: lifecycle.history().to_vec(),
        frames_channel: None,
        annotated_channel: None,
    };
    log::info!(
        "baseline: stopped after {:.2}s, {} frames rendered",
        elapsed.as_secs_f64(),
        report.frames_rendered()
    );
    Ok(report)
}
