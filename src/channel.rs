//! Bounded hand-off channels between stages.
//!
//! Each channel is a single-producer/single-consumer FIFO over a bounded
//! `crossbeam_channel`. Capacity is fixed at construction and must be positive.
//!
//! What happens when the channel is full is decided here, never inside a stage:
//! - `Block`: the producer waits (backpressure).
//! - `DropOldest`: the oldest queued item is discarded to make room.
//! - `DropNewest`: the item being published is discarded.
//!
//! Blocking operations wake every `poll` interval to check the cancellation token.
//! Dropping the sender closes the channel; the receiver drains what is queued and then
//! reports `Closed`.

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::lifecycle::CancellationToken;

/// Rule applied when a channel is full and a new item arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    #[default]
    Block,
    DropOldest,
    DropNewest,
}

impl DropPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DropPolicy::Block => "block",
            DropPolicy::DropOldest => "drop-oldest",
            DropPolicy::DropNewest => "drop-newest",
        }
    }
}

impl std::fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DropPolicy {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(DropPolicy::Block),
            "drop-oldest" | "drop_oldest" => Ok(DropPolicy::DropOldest),
            "drop-newest" | "drop_newest" => Ok(DropPolicy::DropNewest),
            other => Err(PipelineError::config(format!(
                "unknown drop policy '{}' (expected block, drop-oldest or drop-newest)",
                other
            ))),
        }
    }
}

/// Result of a successful `send`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The item was queued.
    Queued,
    /// The item was queued after discarding the oldest queued item.
    QueuedAfterDroppingOldest,
    /// The channel was full and the item itself was discarded.
    DroppedNewest,
}

/// Why a `send` or `recv` did not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStop {
    /// The other end is gone (end of stream on receive, consumer gone on send).
    Closed,
    /// Cancellation was observed while waiting.
    Cancelled,
}

/// Counters shared by both ends of a channel.
#[derive(Debug)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    // Queued items removed by `DropOldest`; a subset of `dropped`.
    evicted: AtomicU64,
    high_water: AtomicUsize,
    // Cleared when the `StageReceiver` drops. `DropOldest` senders hold a receiver
    // clone, so crossbeam alone never reports the disconnect to them.
    receiver_alive: AtomicBool,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            high_water: AtomicUsize::new(0),
            receiver_alive: AtomicBool::new(true),
        }
    }
}

/// Point-in-time statistics for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub len: usize,
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    /// Largest queue length observed right after a publish.
    pub high_water: usize,
}

impl ChannelStats {
    /// Queue utilization (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len as f64 / self.capacity as f64
        }
    }
}

/// Producer half.
pub struct StageSender<T> {
    tx: Sender<T>,
    // Kept only for `DropOldest`, to evict from the head of the queue.
    evict: Option<Receiver<T>>,
    policy: DropPolicy,
    capacity: usize,
    cancel: CancellationToken,
    poll: Duration,
    counters: Arc<Counters>,
}

/// Consumer half.
pub struct StageReceiver<T> {
    rx: Receiver<T>,
    capacity: usize,
    cancel: CancellationToken,
    poll: Duration,
    counters: Arc<Counters>,
}

/// Create a bounded channel. Zero capacity is a configuration error.
pub fn stage_channel<T>(
    capacity: usize,
    policy: DropPolicy,
    cancel: CancellationToken,
    poll: Duration,
) -> Result<(StageSender<T>, StageReceiver<T>), PipelineError> {
    if capacity == 0 {
        return Err(PipelineError::config(
            "channel capacity must be a positive integer",
        ));
    }
    if poll.is_zero() {
        return Err(PipelineError::config(
            "cancellation poll interval must be greater than zero",
        ));
    }
    let (tx, rx) = bounded(capacity);
    let counters = Arc::new(Counters::default());
    let evict = match policy {
        DropPolicy::DropOldest => Some(rx.clone()),
        DropPolicy::Block | DropPolicy::DropNewest => None,
    };
    let sender = StageSender {
        tx,
        evict,
        policy,
        capacity,
        cancel: cancel.clone(),
        poll,
        counters: counters.clone(),
    };
    let receiver = StageReceiver {
        rx,
        capacity,
        cancel,
        poll,
        counters,
    };
    Ok((sender, receiver))
}

impl<T> StageSender<T> {
    /// Publish one item according to the channel's drop policy.
    pub fn send(&self, item: T) -> Result<SendOutcome, ChannelStop> {
        if self.cancel.is_cancelled() {
            return Err(ChannelStop::Cancelled);
        }
        let outcome = match self.policy {
            DropPolicy::Block => self.send_blocking(item)?,
            DropPolicy::DropNewest => self.send_or_drop_newest(item)?,
            DropPolicy::DropOldest => self.send_evicting_oldest(item)?,
        };
        if outcome != SendOutcome::DroppedNewest {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
            self.counters
                .high_water
                .fetch_max(self.tx.len(), Ordering::Relaxed);
        }
        Ok(outcome)
    }

    fn send_blocking(&self, mut item: T) -> Result<SendOutcome, ChannelStop> {
        loop {
            match self.tx.send_timeout(item, self.poll) {
                Ok(()) => return Ok(SendOutcome::Queued),
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return Err(ChannelStop::Cancelled);
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(ChannelStop::Closed),
            }
        }
    }

    fn send_or_drop_newest(&self, item: T) -> Result<SendOutcome, ChannelStop> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(SendOutcome::Queued),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(SendOutcome::DroppedNewest)
            }
            Err(TrySendError::Disconnected(_)) => Err(ChannelStop::Closed),
        }
    }

    fn send_evicting_oldest(&self, mut item: T) -> Result<SendOutcome, ChannelStop> {
        let mut evicted = false;
        loop {
            if !self.counters.receiver_alive.load(Ordering::Acquire) {
                return Err(ChannelStop::Closed);
            }
            match self.tx.try_send(item) {
                Ok(()) => {
                    return Ok(if evicted {
                        SendOutcome::QueuedAfterDroppingOldest
                    } else {
                        SendOutcome::Queued
                    })
                }
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // The consumer may win the race and empty a slot first; retry either way.
                    if let Some(evict) = &self.evict {
                        if evict.try_recv().is_ok() {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                            evicted = true;
                        }
                    }
                    if self.cancel.is_cancelled() {
                        return Err(ChannelStop::Cancelled);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(ChannelStop::Closed),
            }
        }
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    pub fn stats(&self) -> ChannelStats {
        stats_for(&self.counters, self.capacity, self.tx.len())
    }

    /// Read-only view of the counters that outlives both ends.
    pub fn monitor(&self) -> ChannelMonitor {
        ChannelMonitor {
            capacity: self.capacity,
            counters: self.counters.clone(),
        }
    }
}

impl<T> StageReceiver<T> {
    /// Take the next item, waiting while the channel is empty.
    ///
    /// Items already queued are still delivered after the sender is dropped.
    pub fn recv(&self) -> Result<T, ChannelStop> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ChannelStop::Cancelled);
            }
            match self.rx.recv_timeout(self.poll) {
                Ok(item) => {
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    return Ok(item);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(ChannelStop::Closed),
            }
        }
    }

    /// Non-blocking receive; `Ok(None)` when the channel is momentarily empty.
    pub fn try_recv(&self) -> Result<Option<T>, ChannelStop> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                Ok(Some(item))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelStop::Closed),
        }
    }

    pub fn stats(&self) -> ChannelStats {
        stats_for(&self.counters, self.capacity, self.rx.len())
    }
}

impl<T> Drop for StageReceiver<T> {
    fn drop(&mut self) {
        self.counters.receiver_alive.store(false, Ordering::Release);
    }
}

/// Statistics handle that does not keep the channel open.
#[derive(Clone, Debug)]
pub struct ChannelMonitor {
    capacity: usize,
    counters: Arc<Counters>,
}

impl ChannelMonitor {
    pub fn stats(&self) -> ChannelStats {
        let c = &self.counters;
        let queued = c.sent.load(Ordering::Relaxed);
        let gone = c.received.load(Ordering::Relaxed) + c.evicted.load(Ordering::Relaxed);
        stats_for(c, self.capacity, queued.saturating_sub(gone) as usize)
    }
}

fn stats_for(counters: &Counters, capacity: usize, len: usize) -> ChannelStats {
    ChannelStats {
        capacity,
        len,
        sent: counters.sent.load(Ordering::Relaxed),
        received: counters.received.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
        high_water: counters.high_water.load(Ordering::Relaxed),
    }
}
