//! Staged pipeline coordinator.
//!
//! `Pipeline::start` validates, opens the source and the render target, allocates the
//! two channels and launches one named thread per stage. `RunningPipeline::wait`
//! watches stage exits, drives the lifecycle to `Stopped` and returns a `RunReport`.
//!
//! A stage error (systemic failure or panic) raises the cancellation token so the
//! other stages leave their suspension points. Natural end of stream does not: the
//! downstream stages drain what is queued and finish on channel closure.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::{stage_channel, ChannelMonitor, ChannelStats};
use crate::config::PipelineConfig;
use crate::detect::DetectionOperation;
use crate::error::PipelineError;
use crate::frame::{AnnotatedFrame, Frame};
use crate::ingest::VideoSource;
use crate::lifecycle::{CancellationToken, Lifecycle, PipelineState};
use crate::render::RenderTarget;
use crate::stages::{
    run_detector, run_sink, run_source, DetectorStep, OpenSource, SinkStep, StageEnd, StageKind,
    StageReport,
};

// ----------------------------------------------------------------------------
// Run report
// ----------------------------------------------------------------------------

/// Outcome of a completed run, staged or sequential.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub source: StageReport,
    pub detector: StageReport,
    pub sink: StageReport,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Every lifecycle state passed through, in order.
    pub transitions: Vec<PipelineState>,
    /// Source to detector channel; `None` for the sequential baseline.
    #[serde(serialize_with = "serialize_stats")]
    pub frames_channel: Option<ChannelStats>,
    /// Detector to sink channel; `None` for the sequential baseline.
    #[serde(serialize_with = "serialize_stats")]
    pub annotated_channel: Option<ChannelStats>,
}

impl RunReport {
    pub fn frames_rendered(&self) -> u64 {
        self.sink.frames_out
    }

    pub fn frames_dropped(&self) -> u64 {
        self.source.dropped + self.detector.dropped
    }

    /// Rendered frames per second of wall-clock time.
    pub fn throughput_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_rendered() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn was_cancelled(&self) -> bool {
        [&self.source, &self.detector, &self.sink]
            .iter()
            .any(|report| report.ended_by == StageEnd::Cancelled)
    }
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(value.as_secs_f64())
}

fn serialize_stats<S: serde::Serializer>(
    value: &Option<ChannelStats>,
    s: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Stats {
        capacity: usize,
        sent: u64,
        received: u64,
        dropped: u64,
        high_water: usize,
    }
    value
        .map(|stats| Stats {
            capacity: stats.capacity,
            sent: stats.sent,
            received: stats.received,
            dropped: stats.dropped,
            high_water: stats.high_water,
        })
        .serialize(s)
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// A configured but not yet started pipeline.
pub struct Pipeline<S, D, R> {
    config: PipelineConfig,
    source: S,
    detector: D,
    target: R,
    cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl<S, D, R> Pipeline<S, D, R>
where
    S: VideoSource + 'static,
    D: DetectionOperation + 'static,
    D::State: 'static,
    R: RenderTarget + 'static,
{
    /// Validate `config` and assemble the pipeline. Nothing is opened yet.
    pub fn new(
        config: PipelineConfig,
        source: S,
        detector: D,
        target: R,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            detector,
            target,
            cancel: CancellationToken::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Token that stops the pipeline when cancelled. Usable before and after `start`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.current()
    }

    /// Open resources and launch the stage threads.
    ///
    /// On failure everything opened so far is closed and the pipeline is `Stopped`.
    pub fn start(self) -> Result<RunningPipeline, PipelineError> {
        let Pipeline {
            config,
            mut source,
            detector,
            mut target,
            cancel,
            mut lifecycle,
        } = self;
        let started = Instant::now();
        lifecycle.advance(PipelineState::Starting);

        if let Err(e) = source.open() {
            lifecycle.advance(PipelineState::Stopped);
            let err = PipelineError::startup(source.describe(), &e);
            log::error!("pipeline: {}", err);
            return Err(err);
        }
        let mut source = OpenSource::new(source);
        if let Err(e) = target.open() {
            source.close();
            lifecycle.advance(PipelineState::Stopped);
            let err = PipelineError::startup(target.describe(), &e);
            log::error!("pipeline: {}", err);
            return Err(err);
        }

        let poll = config.cancel_poll_interval;
        let frames_channel = stage_channel::<Frame>(
            config.channel_capacity,
            config.drop_policy,
            cancel.clone(),
            poll,
        );
        let channels = frames_channel.and_then(|frames| {
            stage_channel::<AnnotatedFrame>(
                config.channel_capacity,
                config.drop_policy,
                cancel.clone(),
                poll,
            )
            .map(|annotated| (frames, annotated))
        });
        let ((frame_tx, frame_rx), (annotated_tx, annotated_rx)) = match channels {
            Ok(channels) => channels,
            Err(e) => {
                source.close();
                let _ = target.close();
                lifecycle.advance(PipelineState::Stopped);
                return Err(e);
            }
        };
        let frames_channel = frame_tx.monitor();
        let annotated_channel = annotated_tx.monitor();

        log::info!(
            "pipeline: starting ({} -> {} -> {}, capacity {}, policy {})",
            source.describe(),
            detector.name(),
            target.describe(),
            config.channel_capacity,
            config.drop_policy
        );

        let (exit_tx, exits) = bounded(3);
        let detector_step = DetectorStep::new(
            detector,
            config.max_consecutive_failures,
            config.detection_timeout,
        );
        let sink_step = SinkStep::new(
            target,
            config.target_render_interval,
            poll,
            config.max_consecutive_failures,
        );

        let mut handles = Vec::with_capacity(3);
        let spawned = (|| -> Result<(), PipelineError> {
            handles.push(spawn_stage(StageKind::Source, exit_tx.clone(), {
                let cancel = cancel.clone();
                move || Ok(run_source(source, frame_tx, cancel))
            })?);
            handles.push(spawn_stage(StageKind::Detector, exit_tx.clone(), {
                let cancel = cancel.clone();
                move || run_detector(detector_step, frame_rx, annotated_tx, cancel)
            })?);
            handles.push(spawn_stage(StageKind::Sink, exit_tx, {
                let cancel = cancel.clone();
                move || run_sink(sink_step, annotated_rx, cancel)
            })?);
            Ok(())
        })();
        if let Err(e) = spawned {
            cancel.cancel();
            for (_, handle) in handles {
                let _ = handle.join();
            }
            lifecycle.advance(PipelineState::Stopped);
            return Err(e);
        }

        lifecycle.advance(PipelineState::Running);
        Ok(RunningPipeline {
            cancel,
            lifecycle: Arc::new(Mutex::new(lifecycle)),
            exits,
            handles,
            poll,
            started,
            frames_channel,
            annotated_channel,
        })
    }

    /// `start` followed by `wait`.
    pub fn run(self) -> Result<RunReport, PipelineError> {
        self.start()?.wait()
    }
}

struct StageExit {
    stage: StageKind,
    result: Result<StageReport, PipelineError>,
}

fn spawn_stage<F>(
    stage: StageKind,
    exits: Sender<StageExit>,
    body: F,
) -> Result<(StageKind, JoinHandle<()>), PipelineError>
where
    F: FnOnce() -> Result<StageReport, PipelineError> + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(format!("motion-{}", stage))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
                log::error!("{} stage panicked", stage);
                Err(PipelineError::StagePanicked { stage })
            });
            let _ = exits.send(StageExit { stage, result });
        })
        .map_err(|e| PipelineError::Startup {
            resource: format!("{} stage thread", stage),
            reason: e.to_string(),
        })?;
    Ok((stage, handle))
}

// ----------------------------------------------------------------------------
// Running pipeline
// ----------------------------------------------------------------------------

/// Read-only view of a pipeline's lifecycle, shareable across threads.
#[derive(Clone, Debug)]
pub struct PipelineMonitor {
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl PipelineMonitor {
    pub fn state(&self) -> PipelineState {
        lock(&self.lifecycle).current()
    }
}

/// A pipeline whose stage threads are running.
pub struct RunningPipeline {
    cancel: CancellationToken,
    lifecycle: Arc<Mutex<Lifecycle>>,
    exits: Receiver<StageExit>,
    handles: Vec<(StageKind, JoinHandle<()>)>,
    poll: Duration,
    started: Instant,
    frames_channel: ChannelMonitor,
    annotated_channel: ChannelMonitor,
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunningPipeline {
    pub fn state(&self) -> PipelineState {
        lock(&self.lifecycle).current()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            lifecycle: self.lifecycle.clone(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask every stage to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until all three stages have exited and been joined.
    ///
    /// Returns the first stage error, if any; otherwise the run report.
    pub fn wait(self) -> Result<RunReport, PipelineError> {
        let RunningPipeline {
            cancel,
            lifecycle,
            exits,
            handles,
            poll,
            started,
            frames_channel,
            annotated_channel,
        } = self;
        let advance = |next: PipelineState| {
            lock(&lifecycle).advance(next);
        };
        let mut reports: Vec<StageReport> = Vec::with_capacity(3);
        let mut first_error: Option<PipelineError> = None;
        let mut pending = handles.len();

        while pending > 0 {
            match exits.recv_timeout(poll) {
                Ok(exit) => {
                    pending -= 1;
                    advance(PipelineState::Stopping);
                    match exit.result {
                        Ok(report) => {
                            log::debug!(
                                "pipeline: {} stage exited ({:?})",
                                exit.stage,
                                report.ended_by
                            );
                            reports.push(report);
                        }
                        Err(e) => {
                            log::error!("pipeline: {} stage failed: {}", exit.stage, e);
                            cancel.cancel();
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        advance(PipelineState::Stopping);
                    }
                }
                // Every stage thread sends exactly once before it ends.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (stage, handle) in handles {
            if handle.join().is_err() {
                log::error!("pipeline: {} stage thread could not be joined", stage);
                first_error.get_or_insert(PipelineError::StagePanicked { stage });
            }
        }
        advance(PipelineState::Stopping);
        advance(PipelineState::Stopped);
        let elapsed = started.elapsed();

        if let Some(err) = first_error {
            return Err(err);
        }

        let mut take = |kind: StageKind| {
            reports
                .iter()
                .position(|r| r.stage == kind)
                .map(|i| reports.swap_remove(i))
                .unwrap_or_else(|| StageReport::new(kind))
        };
        let report = RunReport {
            source: take(StageKind::Source),
            detector: take(StageKind::Detector),
            sink: take(StageKind::Sink),
            elapsed,
            transitions: lock(&lifecycle).history().to_vec(),
            frames_channel: Some(frames_channel.stats()),
            annotated_channel: Some(annotated_channel.stats()),
        };
        log::info!(
            "pipeline: stopped after {:.2}s, {} frames rendered, {} dropped",
            elapsed.as_secs_f64(),
            report.frames_rendered(),
            report.frames_dropped()
        );
        Ok(report)
    }
}
