use image::RgbImage;
use std::time::Instant;

use super::{StageEnd, StageKind, StageReport};
use crate::channel::{ChannelStop, SendOutcome, StageSender};
use crate::frame::Frame;
use crate::ingest::VideoSource;
use crate::lifecycle::CancellationToken;

/// Stamps images with consecutive sequence numbers starting at zero.
#[derive(Debug, Default)]
pub(crate) struct FrameSequencer {
    next: u64,
}

impl FrameSequencer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stamp(&mut self, image: RgbImage) -> Frame {
        let frame = Frame::new(self.next, image);
        self.next += 1;
        frame
    }
}

/// An opened source that is closed exactly once, at the latest when dropped.
pub(crate) struct OpenSource<S: VideoSource> {
    source: S,
    closed: bool,
}

impl<S: VideoSource> OpenSource<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.source.describe()
    }

    pub(crate) fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        self.source.next_frame()
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
        }
    }
}

impl<S: VideoSource> Drop for OpenSource<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read from an opened source until end of stream or cancellation.
///
/// A read error ends the stream: later frames would otherwise get sequence numbers
/// that hide the gap. The source is closed on every exit path, and dropping `output`
/// closes the channel for the detector.
pub(crate) fn run_source<S: VideoSource>(
    mut source: OpenSource<S>,
    output: StageSender<Frame>,
    cancel: CancellationToken,
) -> StageReport {
    let started = Instant::now();
    let mut report = StageReport::new(StageKind::Source);
    let mut sequencer = FrameSequencer::new();
    log::info!("source: reading from {}", source.describe());

    report.ended_by = loop {
        if cancel.is_cancelled() {
            break StageEnd::Cancelled;
        }
        let image = match source.next_frame() {
            Ok(Some(image)) => image,
            Ok(None) => break StageEnd::EndOfStream,
            Err(e) => {
                log::warn!(
                    "source: read failed after {} frames, ending stream: {:#}",
                    report.frames_in,
                    e
                );
                break StageEnd::EndOfStream;
            }
        };
        report.frames_in += 1;
        let frame = sequencer.stamp(image);
        let sequence = frame.sequence();
        log::trace!("source: frame {} ({} bytes)", sequence, frame.byte_len());

        match output.send(frame) {
            Ok(SendOutcome::Queued) => {
                report.frames_out += 1;
                report.last_sequence = Some(sequence);
            }
            Ok(SendOutcome::QueuedAfterDroppingOldest) => {
                report.frames_out += 1;
                report.dropped += 1;
                report.last_sequence = Some(sequence);
            }
            Ok(SendOutcome::DroppedNewest) => {
                report.dropped += 1;
                log::debug!("source: dropped frame {} (channel full)", sequence);
            }
            Err(ChannelStop::Cancelled) => break StageEnd::Cancelled,
            Err(ChannelStop::Closed) => break StageEnd::DownstreamClosed,
        }
    };

    drop(output);
    source.close();
    report.elapsed = started.elapsed();
    log::info!(
        "source: stopped ({:?}) after {} frames, {} dropped",
        report.ended_by,
        report.frames_in,
        report.dropped
    );
    report
}
