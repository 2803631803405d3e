use std::time::{Duration, Instant};

use super::{FailureTracker, StageEnd, StageKind, StageReport};
use crate::channel::{ChannelStop, StageReceiver};
use crate::error::{PipelineError, TransientFrameError};
use crate::frame::AnnotatedFrame;
use crate::lifecycle::CancellationToken;
use crate::render::{MovingAverage, RenderTarget};

const FPS_WINDOW: usize = 60;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Owns a render target plus pacing and failure bookkeeping.
pub(crate) struct SinkStep<R: RenderTarget> {
    target: R,
    interval: Option<Duration>,
    cancel_poll: Duration,
    tracker: FailureTracker,
    fps: MovingAverage,
    last_render_at: Option<Instant>,
    last_health_log: Instant,
    last_sequence: Option<u64>,
    rendered: u64,
    failures: u64,
    closed: bool,
}

impl<R: RenderTarget> SinkStep<R> {
    pub(crate) fn new(
        target: R,
        interval: Option<Duration>,
        cancel_poll: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            target,
            interval,
            cancel_poll,
            tracker: FailureTracker::new(StageKind::Sink, max_consecutive_failures),
            fps: MovingAverage::new(FPS_WINDOW),
            last_render_at: None,
            last_health_log: Instant::now(),
            last_sequence: None,
            rendered: 0,
            failures: 0,
            closed: false,
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.target.describe()
    }

    /// Wait out the rest of the render interval. Returns false if cancelled meanwhile.
    pub(crate) fn pace(&self, cancel: &CancellationToken) -> bool {
        let (Some(interval), Some(last)) = (self.interval, self.last_render_at) else {
            return !cancel.is_cancelled();
        };
        let due = last + interval;
        let now = Instant::now();
        if now >= due {
            return !cancel.is_cancelled();
        }
        cancel.sleep(due - now, self.cancel_poll)
    }

    /// Render one frame. A render error skips the frame; too many in a row is systemic.
    pub(crate) fn render(&mut self, frame: AnnotatedFrame) -> Result<(), PipelineError> {
        let sequence = frame.sequence();
        match self.target.render(frame) {
            Ok(()) => {
                let now = Instant::now();
                if let Some(last) = self.last_render_at {
                    let secs = now.duration_since(last).as_secs_f64();
                    if secs > 0.0 {
                        self.fps.push(1.0 / secs);
                    }
                }
                self.last_render_at = Some(now);
                self.last_sequence = Some(sequence);
                self.rendered += 1;
                self.tracker.success();
                self.log_health(now);
                Ok(())
            }
            Err(e) => {
                let err = TransientFrameError::new(sequence, &e);
                log::warn!("sink: render failed, skipping {}", err);
                self.failures += 1;
                self.tracker.failure(self.last_sequence)
            }
        }
    }

    fn log_health(&mut self, now: Instant) {
        if now.duration_since(self.last_health_log) < HEALTH_LOG_INTERVAL {
            return;
        }
        self.last_health_log = now;
        log::info!(
            "sink: {} frames rendered, {:.1} fps (last sequence {:?})",
            self.rendered,
            self.fps.average().unwrap_or(0.0),
            self.last_sequence
        );
    }

    pub(crate) fn average_fps(&self) -> Option<f64> {
        self.fps.average()
    }

    pub(crate) fn fill_report(&self, report: &mut StageReport) {
        report.frames_out = self.rendered;
        report.transient_failures = self.failures;
        report.last_sequence = self.last_sequence;
        report.average_fps = self.average_fps();
    }

    /// Close the target once. A close error is logged; the frames are already out.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.target.close() {
            log::warn!("sink: closing {} failed: {:#}", self.target.describe(), e);
        }
    }
}

// A step dropped without running (thread spawn failure) or while unwinding still
// releases the target.
impl<R: RenderTarget> Drop for SinkStep<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Render frames in arrival order until the input closes and is drained.
pub(crate) fn run_sink<R: RenderTarget>(
    mut step: SinkStep<R>,
    input: StageReceiver<AnnotatedFrame>,
    cancel: CancellationToken,
) -> Result<StageReport, PipelineError> {
    let started = Instant::now();
    let mut report = StageReport::new(StageKind::Sink);
    log::info!("sink: rendering to {}", step.describe());

    let result = loop {
        let frame = match input.recv() {
            Ok(frame) => frame,
            Err(ChannelStop::Closed) => break Ok(StageEnd::EndOfStream),
            Err(ChannelStop::Cancelled) => break Ok(StageEnd::Cancelled),
        };
        report.frames_in += 1;
        if !step.pace(&cancel) {
            break Ok(StageEnd::Cancelled);
        }
        if let Err(e) = step.render(frame) {
            break Err(e);
        }
    };
    step.close();

    let ended_by = match result {
        Ok(ended_by) => ended_by,
        Err(e) => {
            log::error!("sink: {} (received {} frames)", e, report.frames_in);
            return Err(e);
        }
    };
    step.fill_report(&mut report);
    report.ended_by = ended_by;
    report.elapsed = started.elapsed();
    log::info!(
        "sink: stopped ({:?}) after {} frames rendered, {} failed",
        report.ended_by,
        report.frames_out,
        report.transient_failures
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{stage_channel, DropPolicy};
    use crate::frame::{Frame, MotionAnnotation};
    use anyhow::{bail, Result};
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        rendered: Arc<Mutex<Vec<(u64, Instant)>>>,
        fail_on: Vec<u64>,
        closes: Arc<Mutex<u32>>,
    }

    impl RenderTarget for Recording {
        fn describe(&self) -> String {
            "recording".to_string()
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn render(&mut self, frame: AnnotatedFrame) -> Result<()> {
            if self.fail_on.contains(&frame.sequence()) {
                bail!("disk full");
            }
            self.rendered
                .lock()
                .unwrap()
                .push((frame.sequence(), Instant::now()));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn annotated(seq: u64) -> AnnotatedFrame {
        AnnotatedFrame::new(Frame::new(seq, RgbImage::new(2, 2)), MotionAnnotation::Still)
    }

    #[test]
    fn render_error_skips_frame() {
        let target = Recording {
            fail_on: vec![1],
            ..Recording::default()
        };
        let rendered = target.rendered.clone();
        let mut step = SinkStep::new(target, None, Duration::from_millis(5), 3);
        for seq in 0..3 {
            step.render(annotated(seq)).unwrap();
        }
        let seqs: Vec<u64> = rendered.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(step.failures, 1);
    }

    #[test]
    fn repeated_render_errors_become_systemic() {
        let target = Recording {
            fail_on: vec![0, 1],
            ..Recording::default()
        };
        let mut step = SinkStep::new(target, None, Duration::from_millis(5), 2);
        step.render(annotated(0)).unwrap();
        let err = step.render(annotated(1)).unwrap_err();
        assert_eq!(err.stage(), Some(StageKind::Sink));
    }

    #[test]
    fn paces_renders_and_closes_target() {
        let cancel = CancellationToken::new();
        let (tx, rx) =
            stage_channel(4, DropPolicy::Block, cancel.clone(), Duration::from_millis(5)).unwrap();
        for seq in 0..3 {
            tx.send(annotated(seq)).unwrap();
        }
        drop(tx);

        let target = Recording::default();
        let rendered = target.rendered.clone();
        let closes = target.closes.clone();
        let interval = Duration::from_millis(20);
        let step = SinkStep::new(target, Some(interval), Duration::from_millis(5), 3);
        let report = run_sink(step, rx, cancel).unwrap();

        assert_eq!(report.frames_out, 3);
        assert_eq!(report.ended_by, StageEnd::EndOfStream);
        assert_eq!(*closes.lock().unwrap(), 1);
        let times: Vec<Instant> = rendered.lock().unwrap().iter().map(|(_, t)| *t).collect();
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
    }

    #[test]
    fn unused_step_closes_target_on_drop() {
        let target = Recording::default();
        let closes = target.closes.clone();
        let step = SinkStep::new(target, None, Duration::from_millis(5), 3);
        drop(step);
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[test]
    fn explicit_close_is_not_repeated_on_drop() {
        let target = Recording::default();
        let closes = target.closes.clone();
        let mut step = SinkStep::new(target, None, Duration::from_millis(5), 3);
        step.close();
        step.close();
        drop(step);
        assert_eq!(*closes.lock().unwrap(), 1);
    }
}
