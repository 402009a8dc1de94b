//! Tray background detection and the monochrome icon palette derived from it.

#![allow(unexpected_cfgs)]

use serde::{Deserialize, Serialize};

pub type RgbColor = (u8, u8, u8);

const ON_DARK: RgbColor = (255, 255, 255);
const ON_LIGHT: RgbColor = (0, 0, 0);

/// Alpha of the unfilled part of a bar.
const TRACK_ALPHA: u8 = 80;
/// Alpha of the glyph while no usage data has arrived yet.
const DIM_ALPHA: u8 = 140;

/// `theme` setting: follow the OS or force the tray background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Auto,
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayBackground {
    Dark,
    Light,
}

impl TrayBackground {
    pub fn resolve(preference: ThemePreference) -> Self {
        match preference {
            ThemePreference::Dark => TrayBackground::Dark,
            ThemePreference::Light => TrayBackground::Light,
            ThemePreference::Auto => detect_tray_background(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconPalette {
    pub foreground: RgbColor,
    pub track_alpha: u8,
    pub dim_alpha: u8,
}

impl IconPalette {
    pub fn for_background(background: TrayBackground) -> Self {
        let foreground = match background {
            TrayBackground::Dark => ON_DARK,
            TrayBackground::Light => ON_LIGHT,
        };
        Self {
            foreground,
            track_alpha: TRACK_ALPHA,
            dim_alpha: DIM_ALPHA,
        }
    }

    pub fn for_preference(preference: ThemePreference) -> Self {
        Self::for_background(TrayBackground::resolve(preference))
    }
}

#[cfg(target_os = "macos")]
pub fn detect_tray_background() -> TrayBackground {
    // `defaults read -g AppleInterfaceStyle` prints "Dark" in dark mode and fails in light mode.
    if let Ok(output) = std::process::Command::new("defaults")
        .args(["read", "-g", "AppleInterfaceStyle"])
        .output()
    {
        if output.status.success() {
            let style = String::from_utf8_lossy(&output.stdout);
            if style.to_ascii_lowercase().contains("dark") {
                return TrayBackground::Dark;
            }
            return TrayBackground::Light;
        }
    }

    use cocoa::appkit::NSApp;
    use cocoa::base::nil;
    use objc::runtime::{Class, Object};
    use objc::{msg_send, sel, sel_impl};

    unsafe {
        let ns_app = NSApp();
        let appearance: *mut Object = if ns_app != nil {
            msg_send![ns_app, effectiveAppearance]
        } else {
            match Class::get("NSAppearance") {
                Some(class) => msg_send![class, currentDrawingAppearance],
                None => std::ptr::null_mut(),
            }
        };

        if !appearance.is_null() {
            let name: *mut Object = msg_send![appearance, name];
            if !name.is_null() {
                let utf8: *const std::os::raw::c_char = msg_send![name, UTF8String];
                if !utf8.is_null() {
                    let name = std::ffi::CStr::from_ptr(utf8).to_string_lossy();
                    if name.contains("Dark") {
                        return TrayBackground::Dark;
                    }
                }
            }
        }
    }

    TrayBackground::Light
}

#[cfg(target_os = "windows")]
pub fn detect_tray_background() -> TrayBackground {
    use winreg::enums::HKEY_CURRENT_USER;
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    if let Ok(personalize) =
        hkcu.open_subkey("Software\\Microsoft\\Windows\\CurrentVersion\\Themes\\Personalize")
    {
        // The taskbar follows the system theme, not the app theme.
        for value in ["SystemUsesLightTheme", "AppsUseLightTheme"] {
            if let Ok(light) = personalize.get_value::<u32, _>(value) {
                return if light == 0 {
                    TrayBackground::Dark
                } else {
                    TrayBackground::Light
                };
            }
        }
    }

    // Windows 10/11 default taskbar is dark.
    TrayBackground::Dark
}

#[cfg(target_os = "linux")]
pub fn detect_tray_background() -> TrayBackground {
    background_from_env(|key| std::env::var(key).ok())
}

#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
pub fn detect_tray_background() -> TrayBackground {
    TrayBackground::Light
}

/// Best-effort guess from desktop environment variables.
#[cfg_attr(not(any(target_os = "linux", test)), allow(dead_code))]
fn background_from_env(var: impl Fn(&str) -> Option<String>) -> TrayBackground {
    for key in ["GTK_THEME", "KDE_COLOR_SCHEME"] {
        if var(key).is_some_and(|theme| theme.to_ascii_lowercase().contains("dark")) {
            return TrayBackground::Dark;
        }
    }

    if let Some(colorfgbg) = var("COLORFGBG") {
        if let Some(bg) = colorfgbg.split(';').next_back().and_then(|v| v.parse::<u8>().ok()) {
            return if bg <= 6 {
                TrayBackground::Dark
            } else {
                TrayBackground::Light
            };
        }
    }

    // Most Linux panels are dark.
    TrayBackground::Dark
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn forced_preferences_skip_detection() {
        assert_eq!(TrayBackground::resolve(ThemePreference::Dark), TrayBackground::Dark);
        assert_eq!(TrayBackground::resolve(ThemePreference::Light), TrayBackground::Light);
    }

    #[test]
    fn palette_contrasts_with_background() {
        assert_eq!(IconPalette::for_preference(ThemePreference::Dark).foreground, (255, 255, 255));
        assert_eq!(IconPalette::for_preference(ThemePreference::Light).foreground, (0, 0, 0));
    }

    #[test]
    fn preference_parses_lowercase() {
        let pref: ThemePreference = serde_json::from_str("\"light\"").unwrap();
        assert_eq!(pref, ThemePreference::Light);
        assert!(serde_json::from_str::<ThemePreference>("\"sepia\"").is_err());
    }

    #[test]
    fn env_heuristics() {
        assert_eq!(background_from_env(env(&[("GTK_THEME", "Adwaita:dark")])), TrayBackground::Dark);
        assert_eq!(background_from_env(env(&[("COLORFGBG", "0;15")])), TrayBackground::Light);
        assert_eq!(background_from_env(env(&[("COLORFGBG", "15;0")])), TrayBackground::Dark);
        assert_eq!(background_from_env(env(&[])), TrayBackground::Dark);
    }
}
