//! Snapshot -> view model.
//!
//! `derive` is a pure function of the snapshot and the evaluation instant, so
//! the popup can re-derive from a stale snapshot as the clock moves on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::snapshot::{AccountInfo, BucketKind, QuotaBucket, UsageSnapshot};

pub const WARNING_PERCENT: f64 = 80.0;
pub const DEPLETED_PERCENT: f64 = 100.0;

/// A reset this close counts as imminent (1.5x the default base interval).
pub const RESET_IMMINENT_WITHIN: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdClass {
    Normal,
    Warning,
    Depleted,
}

impl ThresholdClass {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= DEPLETED_PERCENT {
            ThresholdClass::Depleted
        } else if percent >= WARNING_PERCENT {
            ThresholdClass::Warning
        } else {
            ThresholdClass::Normal
        }
    }

    pub fn is_elevated(self) -> bool {
        self != ThresholdClass::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketView {
    pub kind: BucketKind,
    /// Unclamped; may exceed 100.
    pub used_percent: f64,
    /// `used_percent / 100` clamped to [0, 1] for bar widths.
    pub bar_fraction: f64,
    pub threshold: ThresholdClass,
    pub reset_at: Option<DateTime<Utc>>,
    pub time_to_reset: Option<Duration>,
    /// Clock progress through the current period, in [0, 1].
    pub period_elapsed: Option<f64>,
    pub reset_imminent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    /// Available buckets only, in `BucketKind` order.
    pub buckets: Vec<BucketView>,
    pub account: AccountInfo,
    pub taken_at: DateTime<Utc>,
    pub evaluated_at: DateTime<Utc>,
}

impl ViewModel {
    pub fn bucket(&self, kind: BucketKind) -> Option<&BucketView> {
        self.buckets.iter().find(|b| b.kind == kind)
    }

    pub fn percent(&self, kind: BucketKind) -> Option<f64> {
        self.bucket(kind).map(|b| b.used_percent)
    }

    pub fn any_elevated(&self) -> bool {
        self.buckets.iter().any(|b| b.threshold.is_elevated())
    }

    pub fn any_reset_imminent(&self) -> bool {
        self.buckets.iter().any(|b| b.reset_imminent)
    }

    /// Earliest upcoming reset across all buckets.
    pub fn next_reset_in(&self) -> Option<Duration> {
        self.buckets
            .iter()
            .filter_map(|b| b.time_to_reset)
            .filter(|d| !d.is_zero())
            .min()
    }
}

pub fn derive(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> ViewModel {
    let buckets = snapshot
        .buckets
        .iter()
        .filter_map(|(kind, bucket)| derive_bucket(*kind, bucket, now))
        .collect();

    ViewModel {
        buckets,
        account: snapshot.account.clone(),
        taken_at: snapshot.taken_at,
        evaluated_at: now,
    }
}

fn derive_bucket(kind: BucketKind, bucket: &QuotaBucket, now: DateTime<Utc>) -> Option<BucketView> {
    if bucket.limit.is_nan() || bucket.limit <= 0.0 || !bucket.used.is_finite() {
        return None;
    }

    let used_percent = bucket.used.max(0.0) / bucket.limit * 100.0;

    let time_to_reset = bucket
        .reset_at
        .map(|reset| (reset - now).to_std().unwrap_or(Duration::ZERO));

    let period_elapsed = match (bucket.period_start, bucket.reset_at) {
        (Some(start), Some(reset)) if reset > start => {
            let total = (reset - start).num_milliseconds() as f64;
            let elapsed = (now - start).num_milliseconds() as f64;
            Some((elapsed / total).clamp(0.0, 1.0))
        }
        _ => None,
    };

    Some(BucketView {
        kind,
        used_percent,
        bar_fraction: (used_percent / 100.0).clamp(0.0, 1.0),
        threshold: ThresholdClass::from_percent(used_percent),
        reset_at: bucket.reset_at,
        time_to_reset,
        period_elapsed,
        reset_imminent: time_to_reset.is_some_and(|d| !d.is_zero() && d <= RESET_IMMINENT_WITHIN),
    })
}
