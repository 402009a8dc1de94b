use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Quota buckets reported by the usage endpoint, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Session,
    Weekly,
    WeeklySonnet,
    WeeklyOpus,
}

impl BucketKind {
    pub const ALL: [BucketKind; 4] = [
        BucketKind::Session,
        BucketKind::Weekly,
        BucketKind::WeeklySonnet,
        BucketKind::WeeklyOpus,
    ];

    /// Field name in the usage payload.
    pub fn api_key(self) -> &'static str {
        match self {
            BucketKind::Session => "five_hour",
            BucketKind::Weekly => "seven_day",
            BucketKind::WeeklySonnet => "seven_day_sonnet",
            BucketKind::WeeklyOpus => "seven_day_opus",
        }
    }

    /// Buckets whose key must be present in every payload (the value may be null).
    pub fn is_required(self) -> bool {
        matches!(self, BucketKind::Session | BucketKind::Weekly)
    }

    /// Length of the rolling window.
    pub fn period(self) -> Duration {
        match self {
            BucketKind::Session => Duration::hours(5),
            _ => Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaBucket {
    pub used: f64,
    pub limit: f64,
    /// `None` when the server has no active window for this bucket.
    pub reset_at: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
}

impl QuotaBucket {
    /// Bucket from a server-side utilization percentage.
    pub fn from_utilization(kind: BucketKind, utilization: f64, reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            used: utilization.max(0.0),
            limit: 100.0,
            reset_at,
            period_start: reset_at.map(|reset| reset - kind.period()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub email: Option<String>,
    pub plan: Option<String>,
}

/// Result of one successful poll. Replaced wholesale by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub buckets: BTreeMap<BucketKind, QuotaBucket>,
    pub account: AccountInfo,
    pub taken_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            buckets: BTreeMap::new(),
            account: AccountInfo::default(),
            taken_at,
        }
    }

    pub fn with_bucket(mut self, kind: BucketKind, bucket: QuotaBucket) -> Self {
        self.buckets.insert(kind, bucket);
        self
    }

    pub fn bucket(&self, kind: BucketKind) -> Option<&QuotaBucket> {
        self.buckets.get(&kind)
    }
}
