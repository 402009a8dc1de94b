//! Embedded UI strings, chosen once at startup.
//!
//! Lookup chain for a system locale such as `de_AT.UTF-8`:
//! `de-AT` -> `de` -> `en`.

use serde::Deserialize;

use crate::error::PollError;
use crate::snapshot::BucketKind;

pub const FALLBACK_LOCALE: &str = "en";

static LOCALES: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en.json")),
    ("de", include_str!("../locales/de.json")),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Messages {
    pub title: String,
    pub loading: String,
    pub account: String,
    pub email: String,
    pub plan: String,
    pub usage: String,
    pub session: String,
    pub weekly: String,
    pub weekly_sonnet: String,
    pub weekly_opus: String,
    pub open: String,
    pub refresh: String,
    pub autostart: String,
    pub quit: String,
    pub no_token: String,
    pub connection_error: String,
    pub auth_expired: String,
    pub auth_expired_label: String,
    pub auth_expired_short: String,
    pub http_error: String,
    pub rate_limited: String,
    pub malformed_response: String,
    pub error_label: String,
    pub notify_reset_title: String,
    pub notify_reset: String,
    pub warn_no_token: String,
    pub warn_login: String,
    pub resets_in: String,
    pub resets_tomorrow: String,
    pub resets_weekday: String,
    pub duration_hm: String,
    pub duration_m: String,
    pub weekdays: [String; 7],
    pub updated_at: String,
    pub stale: String,
}

impl Messages {
    pub fn load(code: &str) -> Result<Self, String> {
        let raw = LOCALES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, raw)| *raw)
            .ok_or_else(|| format!("Unknown locale: {}", code))?;
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse locale {}: {}", code, e))
    }

    /// Strings for the OS display language, or `preferred` when given.
    pub fn detect(preferred: Option<&str>) -> Result<Self, String> {
        let system = preferred
            .map(str::to_string)
            .or_else(sys_locale::get_locale)
            .unwrap_or_default();
        let code = resolve_locale_code(&system);
        log::info!("Using locale '{}' (system: '{}')", code, system);

        Self::load(code).or_else(|err| {
            log::error!("{}", err);
            Self::load(FALLBACK_LOCALE)
        })
    }

    pub fn bucket_label(&self, kind: BucketKind) -> &str {
        match kind {
            BucketKind::Session => &self.session,
            BucketKind::Weekly => &self.weekly,
            BucketKind::WeeklySonnet => &self.weekly_sonnet,
            BucketKind::WeeklyOpus => &self.weekly_opus,
        }
    }

    /// User-facing explanation of a poll failure.
    pub fn error_message(&self, err: &PollError) -> String {
        match err {
            PollError::Network(_) => self.connection_error.clone(),
            PollError::Unauthorized { .. } => self.auth_expired.clone(),
            PollError::RateLimited => self.rate_limited.clone(),
            PollError::MalformedResponse(_) => self.malformed_response.clone(),
            PollError::MissingCredential(_) => self.no_token.clone(),
            PollError::Unknown { status } => fill(&self.http_error, &[("code", status.to_string().as_str())]),
        }
    }
}

/// Replace `{name}` placeholders.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{}}}", name), value)
    })
}

/// Map a system locale string onto an embedded table code.
pub fn resolve_locale_code(system: &str) -> &'static str {
    let tag = system.split(['.', '@']).next().unwrap_or_default().replace('_', "-");
    let mut parts = tag.splitn(2, '-');
    let lang = parts.next().unwrap_or_default().to_ascii_lowercase();
    let region = parts.next().map(|r| r.to_ascii_uppercase());

    let known = |code: &str| LOCALES.iter().map(|(c, _)| *c).find(|c| *c == code);

    region
        .and_then(|region| known(&format!("{}-{}", lang, region)))
        .or_else(|| known(&lang))
        .unwrap_or(FALLBACK_LOCALE)
}
