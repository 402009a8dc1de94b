//! Text and layout for the tray tooltip and the detail popup.
//!
//! Pure functions of the view model, the last error and the clock; the
//! webview only draws what [`PopupLayout`] describes.

use std::fmt::Display;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::derive::{ThresholdClass, ViewModel};
use crate::error::PollError;
use crate::locale::{fill, Messages};
use crate::snapshot::BucketKind;

/// Windows truncates tray tooltips beyond this many characters.
const TOOLTIP_MAX_CHARS: usize = 127;
const TOOLTIP_ERROR_CHARS: usize = 80;

const TOOLTIP_BUCKETS: [(BucketKind, &str); 2] = [(BucketKind::Session, "5h"), (BucketKind::Weekly, "7d")];

/// Human-readable reset time, or `None` when less than a minute remains.
///
/// Same day: "Resets in 2h 20m (14:30)", next day: "Resets tomorrow, 12:00",
/// later: "Resets Sat, 12:00".
pub fn format_reset<Tz>(reset: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz, m: &Messages) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let total_min = (reset - now).num_minutes();
    if total_min <= 0 {
        return None;
    }

    let mut reset_local = reset.with_timezone(tz);
    if reset_local.second() >= 30 {
        reset_local = reset_local + Duration::minutes(1);
    }
    let reset_local = reset_local
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(reset_local);

    let today = now.with_timezone(tz).date_naive();
    let reset_date = reset_local.date_naive();
    let clock = reset_local.format("%H:%M").to_string();

    if reset_date == today {
        let duration = if total_min >= 60 {
            fill(
                &m.duration_hm,
                &[
                    ("h", (total_min / 60).to_string().as_str()),
                    ("m", (total_min % 60).to_string().as_str()),
                ],
            )
        } else {
            fill(&m.duration_m, &[("m", total_min.to_string().as_str())])
        };
        return Some(fill(&m.resets_in, &[("duration", &duration), ("clock", &clock)]));
    }

    if today.succ_opt() == Some(reset_date) {
        return Some(fill(&m.resets_tomorrow, &[("clock", &clock)]));
    }

    let day = &m.weekdays[reset_local.weekday().num_days_from_monday() as usize];
    Some(fill(&m.resets_weekday, &[("day", day), ("clock", &clock)]))
}

pub fn tooltip_text<Tz>(view: Option<&ViewModel>, error: Option<&PollError>, tz: &Tz, m: &Messages) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let text = match (view, error) {
        (_, Some(err)) if err.needs_login() => {
            format!("{}\n{}", m.auth_expired_label, m.auth_expired_short)
        }
        (_, Some(err)) => {
            let message: String = m.error_message(err).chars().take(TOOLTIP_ERROR_CHARS).collect();
            format!("{}\n{}", m.error_label, message)
        }
        (None, None) => m.loading.clone(),
        (Some(view), None) => {
            let mut lines = vec![m.title.clone()];
            for (kind, short) in TOOLTIP_BUCKETS {
                let Some(bucket) = view.bucket(kind) else {
                    continue;
                };
                let mut line = format!("{}: {:.0}%", short, bucket.used_percent);
                if let Some(reset) = bucket
                    .reset_at
                    .and_then(|reset| format_reset(reset, view.evaluated_at, tz, m))
                {
                    line.push_str(&format!(" ({})", reset));
                }
                lines.push(line);
            }
            lines.join("\n")
        }
    };

    text.chars().take(TOOLTIP_MAX_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoRow {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub kind: BucketKind,
    pub label: String,
    pub percent_text: String,
    /// Fill width in [0, 1].
    pub fill: f64,
    /// Drawn in the warning color.
    pub high: bool,
    /// Time marker position in [0, 1].
    pub marker: Option<f64>,
    pub reset_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupLayout {
    pub title: String,
    pub account_heading: String,
    pub account: Vec<InfoRow>,
    pub usage_heading: String,
    pub rows: Vec<UsageRow>,
    pub error: Option<String>,
    pub stale_note: Option<String>,
    pub updated: Option<String>,
    /// Caption of the refresh button.
    pub refresh_label: String,
}

pub fn popup_layout<Tz>(view: Option<&ViewModel>, error: Option<&PollError>, tz: &Tz, m: &Messages) -> PopupLayout
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut account = Vec::new();
    let mut rows = Vec::new();
    let mut updated = None;

    if let Some(view) = view {
        if let Some(email) = &view.account.email {
            account.push(InfoRow {
                label: m.email.clone(),
                value: email.clone(),
            });
        }
        if let Some(plan) = &view.account.plan {
            account.push(InfoRow {
                label: m.plan.clone(),
                value: plan.clone(),
            });
        }

        rows = view
            .buckets
            .iter()
            .map(|bucket| UsageRow {
                kind: bucket.kind,
                label: m.bucket_label(bucket.kind).to_string(),
                percent_text: format!("{:.0}%", bucket.used_percent),
                fill: bucket.bar_fraction,
                high: bucket.threshold != ThresholdClass::Normal,
                marker: bucket.period_elapsed,
                reset_text: bucket
                    .reset_at
                    .and_then(|reset| format_reset(reset, view.evaluated_at, tz, m)),
            })
            .collect();

        let clock = view.taken_at.with_timezone(tz).format("%H:%M").to_string();
        updated = Some(fill(&m.updated_at, &[("clock", &clock)]));
    }

    PopupLayout {
        title: m.title.clone(),
        account_heading: m.account.clone(),
        account,
        usage_heading: m.usage.clone(),
        stale_note: match (view, error) {
            (Some(_), Some(_)) => Some(m.stale.clone()),
            _ => None,
        },
        error: error.map(|err| m.error_message(err)),
        rows,
        updated,
        refresh_label: m.refresh.clone(),
    }
}
