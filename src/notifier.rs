//! One-shot "quota is back" notifications.
//!
//! Each tracked bucket runs a tiny state machine:
//!
//! ```text
//!   Idle --(>= threshold)--> Armed --(rollover)--> Notified --> Idle
//!                              |
//!                              +--(below threshold, no rollover)--> Idle
//! ```
//!
//! A rollover is the armed reset instant having passed, the bucket's reset time
//! moving forward, or, when reset times are unknown, a drop well below the
//! arming threshold. A small dip under the threshold is treated as a corrected
//! reading and disarms silently.

use chrono::{DateTime, Duration, Utc};

use crate::derive::ViewModel;
use crate::snapshot::BucketKind;

pub const SESSION_ARM_PERCENT: f64 = 95.0;
pub const WEEKLY_ARM_PERCENT: f64 = 98.0;

/// Without reset times, a reading this far under the threshold counts as a reset.
const RESET_DROP_POINTS: f64 = 10.0;

/// Reset timestamps jitter slightly between responses.
const RESET_JITTER: Duration = Duration::seconds(60);

/// The other bucket at this level still blocks usage, so a reset is not news.
const BLOCKING_PERCENT: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed { reset_at: Option<DateTime<Utc>> },
    Notified,
}

#[derive(Debug, Clone)]
pub struct ResetTrigger {
    threshold: f64,
    state: TriggerState,
}

impl ResetTrigger {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: TriggerState::Idle,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Feed one reading taken at `now`. Returns `true` exactly on the
    /// armed -> notified edge.
    pub fn observe(&mut self, percent: f64, reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let above = percent >= self.threshold;
        match self.state {
            TriggerState::Idle | TriggerState::Notified => {
                self.state = if above {
                    TriggerState::Armed { reset_at }
                } else {
                    TriggerState::Idle
                };
                false
            }
            TriggerState::Armed { reset_at: armed_at } => {
                if above {
                    self.state = TriggerState::Armed {
                        reset_at: reset_at.or(armed_at),
                    };
                    return false;
                }

                // The server may still echo the old reset time right after the reset.
                let window_passed = armed_at.is_some_and(|armed| now >= armed);
                let rolled_over = window_passed
                    || match (armed_at, reset_at) {
                        (Some(armed), Some(current)) => current > armed + RESET_JITTER,
                        _ => percent <= self.threshold - RESET_DROP_POINTS,
                    };
                if rolled_over {
                    self.state = TriggerState::Notified;
                    true
                } else {
                    self.state = TriggerState::Idle;
                    false
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResetNotifier {
    session: ResetTrigger,
    weekly: ResetTrigger,
}

impl Default for ResetNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetNotifier {
    pub fn new() -> Self {
        Self {
            session: ResetTrigger::new(SESSION_ARM_PERCENT),
            weekly: ResetTrigger::new(WEEKLY_ARM_PERCENT),
        }
    }

    pub fn state(&self, kind: BucketKind) -> Option<TriggerState> {
        match kind {
            BucketKind::Session => Some(self.session.state()),
            BucketKind::Weekly => Some(self.weekly.state()),
            _ => None,
        }
    }

    /// Returns the buckets whose reset should be announced now.
    pub fn observe(&mut self, view: &ViewModel) -> Vec<BucketKind> {
        let session = view.bucket(BucketKind::Session);
        let weekly = view.bucket(BucketKind::Weekly);

        let now = view.evaluated_at;
        let session_fired = session.is_some_and(|b| self.session.observe(b.used_percent, b.reset_at, now));
        let weekly_fired = weekly.is_some_and(|b| self.weekly.observe(b.used_percent, b.reset_at, now));

        let blocked = |other: Option<f64>| other.is_some_and(|p| p >= BLOCKING_PERCENT);

        let mut fired = Vec::new();
        if session_fired {
            if blocked(weekly.map(|b| b.used_percent)) {
                log::info!("[notify] Session reset while weekly quota is exhausted, not announcing");
            } else {
                fired.push(BucketKind::Session);
            }
        }
        if weekly_fired {
            if blocked(session.map(|b| b.used_percent)) {
                log::info!("[notify] Weekly reset while session quota is exhausted, not announcing");
            } else {
                fired.push(BucketKind::Weekly);
            }
        }
        fired
    }
}
