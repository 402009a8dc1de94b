//! Adaptive poll scheduling.
//!
//! Split in two halves: [`PollScheduler`] decides how long to wait after a
//! poll (pure, unit-testable), and [`PollWaiter`] performs that wait in a way
//! a manual refresh or quit can cut short.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::derive::ViewModel;
use crate::snapshot::BucketKind;

/// Slack added after a reset instant so the server has rolled the window.
const RESET_BUFFER: Duration = Duration::from_secs(5);

/// Lower bound for a reset-aligned delay.
const MIN_ALIGNED_DELAY: Duration = Duration::from_secs(10);

/// Polls kept on the fast interval after usage stops rising.
const FAST_POLLS_EXTRA: u32 = 2;

/// Fast follow-up polls after an imminent reset.
const RESET_FOLLOW_UP_POLLS: u32 = 2;

/// Shift applied when a configured error interval collides with base or fast.
const ERROR_INTERVAL_NUDGE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    #[serde(with = "secs")]
    pub base: Duration,
    #[serde(with = "secs")]
    pub fast: Duration,
    #[serde(with = "secs")]
    pub error: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(120),
            fast: Duration::from_secs(60),
            error: Duration::from_secs(90),
        }
    }
}

impl PollIntervals {
    /// Clamp user-supplied values to something that cannot hammer the endpoint.
    /// The error interval always ends up distinct from both other intervals.
    pub fn normalized(self) -> Self {
        let base = self.base.max(Duration::from_secs(30));
        let fast = self.fast.clamp(Duration::from_secs(10), base / 2);
        let mut error = self.error.max(Duration::from_secs(15));
        // base - fast >= 15 s, so one nudge cannot land on the other value.
        if error == base || error == fast {
            error += ERROR_INTERVAL_NUDGE;
        }
        Self { base, fast, error }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// What the last poll produced.
#[derive(Debug, Clone, Copy)]
pub enum PollOutcome<'a> {
    Fresh(&'a ViewModel),
    Failed,
}

#[derive(Debug, Clone)]
pub struct PollScheduler {
    intervals: PollIntervals,
    fast_polls_remaining: u32,
    last_session_percent: Option<f64>,
}

impl PollScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals: intervals.normalized(),
            fast_polls_remaining: 0,
            last_session_percent: None,
        }
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    /// Feed a fresh view so rising session usage keeps polling fast.
    pub fn record(&mut self, view: &ViewModel) {
        let session = view.percent(BucketKind::Session);
        match (self.last_session_percent, session) {
            (Some(prev), Some(current)) if current > prev => {
                self.fast_polls_remaining = FAST_POLLS_EXTRA + 1;
            }
            _ => self.fast_polls_remaining = self.fast_polls_remaining.saturating_sub(1),
        }
        if view.any_reset_imminent() {
            self.fast_polls_remaining = self.fast_polls_remaining.max(RESET_FOLLOW_UP_POLLS);
        }
        self.last_session_percent = session;
    }

    pub fn next_delay(&self, outcome: PollOutcome<'_>) -> Duration {
        let view = match outcome {
            PollOutcome::Failed => return self.intervals.error,
            PollOutcome::Fresh(view) => view,
        };

        let interval = if view.any_elevated() || view.any_reset_imminent() || self.fast_polls_remaining > 0 {
            self.intervals.fast
        } else {
            self.intervals.base
        };

        match view.next_reset_in() {
            Some(until_reset) if until_reset + RESET_BUFFER < interval => {
                (until_reset + RESET_BUFFER).max(MIN_ALIGNED_DELAY)
            }
            _ => interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Elapsed,
    Refresh,
    Shutdown,
}

/// UI-side handle: request an immediate poll or stop the loop.
#[derive(Debug, Clone)]
pub struct PollControl {
    refresh_tx: mpsc::Sender<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl PollControl {
    /// Returns `false` when a refresh is already pending.
    pub fn refresh_now(&self) -> bool {
        self.refresh_tx.try_send(()).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Poll-loop side of the channel pair.
#[derive(Debug)]
pub struct PollWaiter {
    refresh_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

pub fn poll_channel() -> (PollControl, PollWaiter) {
    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (
        PollControl {
            refresh_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        },
        PollWaiter {
            refresh_rx,
            shutdown_rx,
        },
    )
}

impl PollWaiter {
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep for `delay` unless a refresh or shutdown arrives first. A refresh
    /// requested while the previous poll ran is still pending and ends the
    /// wait at once.
    pub async fn wait(&mut self, delay: Duration) -> WakeReason {
        if self.is_shutdown() {
            return WakeReason::Shutdown;
        }

        tokio::select! {
            biased;
            changed = self.shutdown_rx.changed() => {
                // A dropped control means nobody can stop us later either.
                if changed.is_err() || *self.shutdown_rx.borrow() {
                    WakeReason::Shutdown
                } else {
                    WakeReason::Refresh
                }
            }
            Some(()) = self.refresh_rx.recv() => WakeReason::Refresh,
            _ = tokio::time::sleep(delay) => WakeReason::Elapsed,
        }
    }

}
