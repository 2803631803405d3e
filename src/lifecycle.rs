//! Pipeline lifecycle state and cooperative cancellation.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of one pipeline instance.
///
/// `Created → Starting → Running → Stopping → Stopped`. A failed startup goes
/// `Starting → Stopped` directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl PipelineState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Stopped
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Records every state a pipeline passes through.
#[derive(Clone, Debug)]
pub(crate) struct Lifecycle {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            current: PipelineState::Created,
            history: vec![PipelineState::Created],
        }
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.current
    }

    /// Advance to `next`. Illegal or repeated transitions are ignored and return false.
    pub(crate) fn advance(&mut self, next: PipelineState) -> bool {
        if !self.current.can_transition_to(next) {
            return false;
        }
        log::debug!("pipeline: {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
        true
    }

    pub(crate) fn history(&self) -> &[PipelineState] {
        &self.history
    }
}

/// Shared stop flag checked by every stage at every suspension point.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in slices of `poll`, returning early (false) on cancellation.
    pub fn sleep(&self, duration: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(poll));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_follows_happy_path() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(PipelineState::Starting));
        assert!(lifecycle.advance(PipelineState::Running));
        assert!(lifecycle.advance(PipelineState::Stopping));
        assert!(lifecycle.advance(PipelineState::Stopped));
        assert_eq!(
            lifecycle.history(),
            &[
                PipelineState::Created,
                PipelineState::Starting,
                PipelineState::Running,
                PipelineState::Stopping,
                PipelineState::Stopped,
            ]
        );
    }

    #[test]
    fn running_is_irreversible() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(PipelineState::Starting);
        lifecycle.advance(PipelineState::Running);
        assert!(!lifecycle.advance(PipelineState::Starting));
        assert!(!lifecycle.advance(PipelineState::Running));
        assert_eq!(lifecycle.current(), PipelineState::Running);
    }

    #[test]
    fn failed_startup_goes_straight_to_stopped() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(PipelineState::Starting);
        assert!(lifecycle.advance(PipelineState::Stopped));
        assert!(lifecycle.current().is_terminal());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5), Duration::from_millis(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_cancellation() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(20), Duration::from_millis(5)));
    }
}
