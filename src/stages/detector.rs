use std::time::{Duration, Instant};

use super::{FailureTracker, StageEnd, StageKind, StageReport};
use crate::channel::{ChannelStop, SendOutcome, StageReceiver, StageSender};
use crate::detect::DetectionOperation;
use crate::error::{PipelineError, TransientFrameError};
use crate::frame::{AnnotatedFrame, Frame, MotionAnnotation};
use crate::lifecycle::CancellationToken;

/// Owns a detection operation and the state it carries between frames.
pub(crate) struct DetectorStep<D: DetectionOperation> {
    operation: D,
    state: D::State,
    tracker: FailureTracker,
    timeout: Option<Duration>,
    last_sequence: Option<u64>,
    failures: u64,
}

impl<D: DetectionOperation> DetectorStep<D> {
    pub(crate) fn new(
        operation: D,
        max_consecutive_failures: u32,
        timeout: Option<Duration>,
    ) -> Self {
        let state = operation.initial_state();
        Self {
            operation,
            state,
            tracker: FailureTracker::new(StageKind::Detector, max_consecutive_failures),
            timeout,
            last_sequence: None,
            failures: 0,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.operation.name()
    }

    pub(crate) fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures
    }

    /// Annotate one frame. A failed detection keeps the prior state and yields a
    /// `Failed` annotation; too many in a row is systemic.
    pub(crate) fn process(&mut self, frame: Frame) -> Result<AnnotatedFrame, PipelineError> {
        let sequence = frame.sequence();
        let started = Instant::now();
        let result = self.operation.detect(&frame, &self.state);
        let elapsed = started.elapsed();

        let outcome = match (result, self.timeout) {
            (Ok(_), Some(limit)) if elapsed > limit => Err(anyhow::anyhow!(
                "detection took {} ms, deadline is {} ms",
                elapsed.as_millis(),
                limit.as_millis()
            )),
            (result, _) => result,
        };

        match outcome {
            Ok((annotation, state)) => {
                self.state = state;
                self.tracker.success();
                self.last_sequence = Some(sequence);
                Ok(AnnotatedFrame::new(frame, annotation))
            }
            Err(e) => {
                let err = TransientFrameError::new(sequence, &e);
                log::warn!("detector: {}", err);
                self.failures += 1;
                self.tracker.failure(self.last_sequence)?;
                Ok(AnnotatedFrame::new(frame, MotionAnnotation::Failed(err.reason)))
            }
        }
    }
}

/// Consume frames until the input closes, annotating and forwarding each one in order.
pub(crate) fn run_detector<D: DetectionOperation>(
    mut step: DetectorStep<D>,
    input: StageReceiver<Frame>,
    output: StageSender<AnnotatedFrame>,
    cancel: CancellationToken,
) -> Result<StageReport, PipelineError> {
    let started = Instant::now();
    let mut report = StageReport::new(StageKind::Detector);
    log::info!("detector: running {}", step.name());

    let ended_by = loop {
        let frame = match input.recv() {
            Ok(frame) => frame,
            Err(ChannelStop::Closed) => break StageEnd::EndOfStream,
            Err(ChannelStop::Cancelled) => break StageEnd::Cancelled,
        };
        report.frames_in += 1;

        let annotated = match step.process(frame) {
            Ok(annotated) => annotated,
            Err(e) => {
                log::error!("detector: {} (received {} frames)", e, report.frames_in);
                return Err(e);
            }
        };

        match output.send(annotated) {
            Ok(SendOutcome::Queued) => report.frames_out += 1,
            Ok(SendOutcome::QueuedAfterDroppingOldest) => {
                report.frames_out += 1;
                report.dropped += 1;
            }
            Ok(SendOutcome::DroppedNewest) => report.dropped += 1,
            Err(ChannelStop::Cancelled) => break StageEnd::Cancelled,
            Err(ChannelStop::Closed) => break StageEnd::DownstreamClosed,
        }
    };

    report.ended_by = ended_by;
    report.transient_failures = step.failures();
    report.last_sequence = step.last_sequence();
    report.elapsed = started.elapsed();
    log::info!(
        "detector: stopped ({:?}) after {} frames, {} failed",
        report.ended_by,
        report.frames_in,
        report.transient_failures
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{stage_channel, DropPolicy};
    use anyhow::{bail, Result};
    use image::RgbImage;

    /// Counts frames; fails on listed sequence numbers.
    struct Scripted {
        fail_on: Vec<u64>,
        delay: Duration,
    }

    impl DetectionOperation for Scripted {
        type State = u64;

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn initial_state(&self) -> u64 {
            0
        }

        fn detect(&self, frame: &Frame, state: &u64) -> Result<(MotionAnnotation, u64)> {
            std::thread::sleep(self.delay);
            if self.fail_on.contains(&frame.sequence()) {
                bail!("scripted failure");
            }
            Ok((MotionAnnotation::Still, state + 1))
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, RgbImage::new(2, 2))
    }

    #[test]
    fn failure_keeps_prior_state() {
        let mut step = DetectorStep::new(
            Scripted {
                fail_on: vec![1],
                delay: Duration::ZERO,
            },
            5,
            None,
        );
        step.process(frame(0)).unwrap();
        let failed = step.process(frame(1)).unwrap();
        assert!(failed.annotation().is_failed());
        assert_eq!(failed.sequence(), 1);
        assert_eq!(step.state, 1);
        step.process(frame(2)).unwrap();
        assert_eq!(step.state, 2);
        assert_eq!(step.last_sequence(), Some(2));
        assert_eq!(step.failures(), 1);
    }

    #[test]
    fn consecutive_failures_become_systemic() {
        let mut step = DetectorStep::new(
            Scripted {
                fail_on: vec![1, 2, 3],
                delay: Duration::ZERO,
            },
            3,
            None,
        );
        step.process(frame(0)).unwrap();
        step.process(frame(1)).unwrap();
        step.process(frame(2)).unwrap();
        let err = step.process(frame(3)).unwrap_err();
        assert_eq!(err.stage(), Some(StageKind::Detector));
        assert!(err.to_string().contains("last processed sequence: 0"));
    }

    #[test]
    fn late_detection_is_marked_failed() {
        let mut step = DetectorStep::new(
            Scripted {
                fail_on: vec![],
                delay: Duration::from_millis(20),
            },
            5,
            Some(Duration::from_millis(1)),
        );
        let annotated = step.process(frame(0)).unwrap();
        assert!(annotated.annotation().is_failed());
        assert_eq!(step.state, 0);
    }

    #[test]
    fn forwards_in_order_until_input_closes() {
        let cancel = CancellationToken::new();
        let poll = Duration::from_millis(5);
        let (in_tx, in_rx) = stage_channel(4, DropPolicy::Block, cancel.clone(), poll).unwrap();
        let (out_tx, out_rx) = stage_channel(8, DropPolicy::Block, cancel.clone(), poll).unwrap();
        for seq in 0..5 {
            in_tx.send(frame(seq)).unwrap();
        }
        drop(in_tx);

        let step = DetectorStep::new(
            Scripted {
                fail_on: vec![2],
                delay: Duration::ZERO,
            },
            5,
            None,
        );
        let report = run_detector(step, in_rx, out_tx, cancel).unwrap();
        assert_eq!(report.frames_out, 5);
        assert_eq!(report.transient_failures, 1);
        assert_eq!(report.ended_by, StageEnd::EndOfStream);

        let seqs: Vec<u64> = std::iter::from_fn(|| out_rx.recv().ok())
            .map(|a| a.sequence())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
