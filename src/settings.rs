use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tauri::{AppHandle, Manager};

use crate::scheduler::PollIntervals;
use crate::theme::ThemePreference;

const SETTINGS_FILENAME: &str = "settings.json";

/// User configuration. Read once at startup; the app never writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Icon color: follow the OS, or force a dark/light tray background
    pub theme: ThemePreference,
    /// Whether to announce quota resets
    pub notifications: bool,
    /// Locale code overriding the OS display language
    pub locale: Option<String>,
    /// Credential file overriding the CLI's default location
    pub credentials_path: Option<PathBuf>,
    pub poll: PollIntervals,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: ThemePreference::Auto,
            notifications: true,
            locale: None,
            credentials_path: None,
            poll: PollIntervals::default(),
        }
    }
}

impl Settings {
    /// Load `settings.json` from `dir`. A missing file yields defaults, a broken
    /// one is reported and ignored.
    pub fn load_from(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILENAME);
        if !path.exists() {
            return Self::default();
        }

        match Self::read(&path) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("{}; using defaults", err);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings file: {}", e))?;

        Ok(Settings {
            poll: settings.poll.normalized(),
            ..settings
        })
    }
}

/// Load settings from the app config dir and attach them to the app
pub fn init_settings(app: &AppHandle) -> Result<Settings, String> {
    let config_dir = app
        .path()
        .app_config_dir()
        .map_err(|e| format!("Failed to get app config dir: {}", e))?;

    let settings = Settings::load_from(&config_dir);
    log::info!("Settings loaded from {}", config_dir.display());

    app.manage(settings.clone());

    Ok(settings)
}
