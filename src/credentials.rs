//! Read-only access to the OAuth credential owned by the Claude CLI.
//!
//! The file is re-read on every poll because the CLI rotates the token in
//! place. Nothing here ever writes, refreshes or logs the token.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::PollError;
use crate::snapshot::AccountInfo;

const CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";
const CREDENTIALS_FILE: &str = ".credentials.json";
const ACCOUNT_FILE: &str = ".claude.json";

#[derive(Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub subscription: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<OAuthEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthEntry {
    access_token: Option<String>,
    /// Milliseconds since the epoch.
    expires_at: Option<i64>,
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountFile {
    oauth_account: Option<OAuthAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthAccount {
    email_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialReader {
    credentials_path: PathBuf,
    account_path: Option<PathBuf>,
}

impl CredentialReader {
    pub fn new(credentials_path: PathBuf, account_path: Option<PathBuf>) -> Self {
        Self {
            credentials_path,
            account_path,
        }
    }

    /// Locate the CLI files the same way the CLI does: `$CLAUDE_CONFIG_DIR`
    /// when set, otherwise `~/.claude/` with the account file in `~`.
    pub fn from_environment(override_path: Option<PathBuf>) -> Result<Self, String> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            let dir = PathBuf::from(dir);
            return Ok(Self::new(
                override_path.unwrap_or_else(|| dir.join(CREDENTIALS_FILE)),
                Some(dir.join(ACCOUNT_FILE)),
            ));
        }

        let home = dirs::home_dir().ok_or("Could not determine home directory")?;
        Ok(Self::new(
            override_path.unwrap_or_else(|| home.join(".claude").join(CREDENTIALS_FILE)),
            Some(home.join(ACCOUNT_FILE)),
        ))
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    pub fn read(&self) -> Result<Credential, PollError> {
        let content = fs::read_to_string(&self.credentials_path).map_err(|e| {
            PollError::MissingCredential(format!(
                "cannot read {}: {}",
                self.credentials_path.display(),
                e.kind()
            ))
        })?;
        parse_credentials(&content)
    }

    /// Best-effort account details; every failure just yields less info.
    pub fn read_account(&self, credential: &Credential) -> AccountInfo {
        let email = self
            .account_path
            .as_deref()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str::<AccountFile>(&content).ok())
            .and_then(|file| file.oauth_account)
            .and_then(|account| account.email_address)
            .filter(|email| !email.is_empty());

        AccountInfo {
            email,
            plan: credential.subscription.as_deref().map(format_plan),
        }
    }
}

fn parse_credentials(content: &str) -> Result<Credential, PollError> {
    let file: CredentialsFile = serde_json::from_str(content.trim())
        .map_err(|e| PollError::MissingCredential(format!("unparsable credential file (line {})", e.line())))?;

    let oauth = file
        .claude_ai_oauth
        .ok_or_else(|| PollError::MissingCredential("no OAuth entry".to_string()))?;

    let token = oauth
        .access_token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| PollError::MissingCredential("no access token".to_string()))?;

    Ok(Credential {
        token,
        expires_at: oauth
            .expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        subscription: oauth.subscription_type.filter(|s| !s.is_empty()),
    })
}

/// `claude_max` -> `Claude Max`
fn format_plan(raw: &str) -> String {
    raw.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
