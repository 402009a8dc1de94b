#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use tauri::menu::{CheckMenuItem, Menu, MenuItem};
use tauri::tray::{MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};
use tauri::{AppHandle, Emitter, Manager, WindowEvent};
use tauri_plugin_autostart::ManagerExt;
use tauri_plugin_notification::NotificationExt;
use tauri_plugin_positioner::{Position, WindowExt};

use claude_usage_tray::locale::fill;
use claude_usage_tray::presentation::{popup_layout, tooltip_text, PopupLayout};
use claude_usage_tray::snapshot::BucketKind;
use claude_usage_tray::{
    init_settings, poll_channel, CredentialReader, IconCache, IconPalette, IconSpec, LiveSource,
    Messages, PollControl, PollError, PollLoop, PollScheduler, PollStatus, Settings,
    SharedPollState, TrayIconRenderer, UsageClient, UsageSurface,
};

const POPUP_LABEL: &str = "popup";
const USAGE_UPDATED_EVENT: &str = "usage:updated";

// ============================================================================
// Tray State
// ============================================================================

struct TrayState {
    tray: Mutex<Option<TrayIcon>>,
    icon: Mutex<IconCache>,
    renderer: Arc<TrayIconRenderer>,
}

struct AppState {
    poll: SharedPollState,
    control: PollControl,
    messages: Arc<Messages>,
}

fn update_tray(app: &AppHandle, status: &PollStatus) -> Result<(), String> {
    let tray_state = app.state::<TrayState>();
    let app_state = app.state::<AppState>();

    let view = status.view_at(Utc::now());
    let spec = IconSpec::from_state(view.as_ref(), status.error.as_ref());
    let tooltip = tooltip_text(view.as_ref(), status.error.as_ref(), &Local, &app_state.messages);

    let tray_guard = tray_state.tray.lock().map_err(|_| "tray lock poisoned".to_string())?;
    let tray = tray_guard.as_ref().ok_or("tray not initialized".to_string())?;

    let mut icon = tray_state.icon.lock().map_err(|_| "icon lock poisoned".to_string())?;
    if !icon.is_current(&spec) {
        let image = tray_state.renderer.render(&spec, &icon.palette())?.into_tauri_image();
        tray.set_icon(Some(image)).map_err(|err| err.to_string())?;
        icon.mark_drawn(spec);
    }

    tray.set_tooltip(Some(tooltip)).map_err(|err| err.to_string())
}

/// Re-resolve the palette after an OS theme switch and redraw if it changed.
fn apply_theme_change(app: &AppHandle) {
    let palette = IconPalette::for_preference(app.state::<Settings>().theme);
    let changed = match app.state::<TrayState>().icon.lock() {
        Ok(mut icon) => icon.set_palette(palette),
        Err(_) => return,
    };
    if !changed {
        return;
    }

    log::info!("[tray] Theme changed, redrawing icon");
    let status = app.state::<AppState>().poll.status();
    if let Err(err) = update_tray(app, &status) {
        log::warn!("[tray] Failed to update tray: {}", err);
    }
}

fn current_layout(app: &AppHandle) -> PopupLayout {
    let state = app.state::<AppState>();
    let status = state.poll.status();
    let view = status.view_at(Utc::now());
    popup_layout(view.as_ref(), status.error.as_ref(), &Local, &state.messages)
}

fn toggle_popup(app: &AppHandle) {
    let Some(window) = app.get_webview_window(POPUP_LABEL) else {
        log::warn!("[tray] Popup window missing");
        return;
    };
    if window.is_visible().unwrap_or(false) {
        let _ = window.hide();
    } else {
        if let Err(err) = window.as_ref().window().move_window(Position::TrayCenter) {
            log::debug!("[tray] TrayCenter unavailable ({}), trying TrayBottomCenter", err);
            if let Err(err) = window.as_ref().window().move_window(Position::TrayBottomCenter) {
                log::warn!("[tray] Failed to position popup: {}", err);
            }
        }
        let _ = app.emit(USAGE_UPDATED_EVENT, current_layout(app));
        let _ = window.show();
        let _ = window.set_focus();
    }
}

fn show_notification(app: &AppHandle, title: &str, body: &str) {
    if let Err(err) = app.notification().builder().title(title).body(body).show() {
        log::warn!("[notify] Failed to show notification: {}", err);
    }
}

// ============================================================================
// Poll loop surface
// ============================================================================

struct TauriSurface {
    app: AppHandle,
}

impl UsageSurface for TauriSurface {
    fn refresh(&self, status: &PollStatus) {
        if let Err(err) = update_tray(&self.app, status) {
            log::warn!("[tray] Failed to update tray: {}", err);
        }
        let _ = self.app.emit(USAGE_UPDATED_EVENT, current_layout(&self.app));
    }

    fn notify_reset(&self, kind: BucketKind) {
        let state = self.app.state::<AppState>();
        let messages = &state.messages;
        let body = fill(&messages.notify_reset, &[("bucket", messages.bucket_label(kind))]);
        show_notification(&self.app, &messages.notify_reset_title, &body);
    }
}

// ============================================================================
// IPC Commands
// ============================================================================

#[tauri::command]
fn get_popup_layout(app: AppHandle) -> Result<PopupLayout, String> {
    Ok(current_layout(&app))
}

#[tauri::command]
fn refresh_usage(state: tauri::State<'_, AppState>) -> Result<bool, String> {
    Ok(state.control.refresh_now())
}

#[tauri::command]
fn get_app_version(app: AppHandle) -> Result<String, String> {
    Ok(app.package_info().version.to_string())
}

fn toggle_autostart(app: &AppHandle, item: &CheckMenuItem<tauri::Wry>) {
    let autolaunch = app.autolaunch();
    let enabled = autolaunch.is_enabled().unwrap_or(false);
    let result = if enabled {
        autolaunch.disable()
    } else {
        autolaunch.enable()
    };

    match result {
        Ok(()) => log::info!("[tray] Autostart {}", if enabled { "disabled" } else { "enabled" }),
        Err(err) => log::error!("[tray] Failed to change autostart: {}", err),
    }

    // Reflect what the OS actually has registered.
    let _ = item.set_checked(autolaunch.is_enabled().unwrap_or(enabled));
}

// ============================================================================
// Main Application
// ============================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tauri::Builder::default()
        .plugin(tauri_plugin_notification::init())
        .plugin(tauri_plugin_positioner::init())
        .plugin(tauri_plugin_autostart::init(
            tauri_plugin_autostart::MacosLauncher::LaunchAgent,
            None,
        ))
        .invoke_handler(tauri::generate_handler![
            get_popup_layout,
            refresh_usage,
            get_app_version,
        ])
        .setup(|app| {
            log::info!("Initializing Claude Usage Tray");

            let app_handle = app.handle().clone();
            let settings = init_settings(&app_handle)?;

            let messages = Arc::new(Messages::detect(settings.locale.as_deref())?);
            let renderer = Arc::new(TrayIconRenderer::from_font_bytes(include_bytes!(
                "../assets/fonts/DejaVuSans-Bold.ttf"
            ))?);
            let palette = IconPalette::for_preference(settings.theme);

            let reader = CredentialReader::from_environment(settings.credentials_path.clone())?;
            log::info!("Reading credentials from {}", reader.credentials_path().display());

            let state = SharedPollState::new();
            let (control, waiter) = poll_channel();
            app.manage(AppState {
                poll: state.clone(),
                control: control.clone(),
                messages: Arc::clone(&messages),
            });

            // Create tray menu
            let open_i = MenuItem::with_id(app, "open", &messages.open, true, None::<&str>)?;
            let refresh_i = MenuItem::with_id(app, "refresh", &messages.refresh, true, None::<&str>)?;
            let autostart_enabled = app.autolaunch().is_enabled().unwrap_or(false);
            let autostart_i = CheckMenuItem::with_id(
                app,
                "autostart",
                &messages.autostart,
                true,
                autostart_enabled,
                None::<&str>,
            )?;
            let quit_i = MenuItem::with_id(app, "quit", &messages.quit, true, None::<&str>)?;
            let menu = Menu::with_items(app, &[&open_i, &refresh_i, &autostart_i, &quit_i])?;

            let initial_spec = IconSpec::from_state(None, None);
            let initial_image = renderer.render(&initial_spec, &palette)?.into_tauri_image();

            let menu_control = control.clone();
            let tray = TrayIconBuilder::new()
                .icon(initial_image)
                .menu(&menu)
                .icon_as_template(true)
                .show_menu_on_left_click(false)
                .tooltip(&messages.loading)
                .on_menu_event(move |app, event| match event.id.as_ref() {
                    "open" => toggle_popup(app),
                    "refresh" => {
                        if !menu_control.refresh_now() {
                            log::debug!("[tray] Refresh already pending");
                        }
                    }
                    "autostart" => toggle_autostart(app, &autostart_i),
                    "quit" => {
                        menu_control.shutdown();
                        app.exit(0);
                    }
                    _ => {}
                })
                .on_tray_icon_event(|tray, event| {
                    tauri_plugin_positioner::on_tray_event(tray.app_handle(), &event);
                    if let TrayIconEvent::Click {
                        button: MouseButton::Left,
                        button_state: MouseButtonState::Up,
                        ..
                    } = event
                    {
                        toggle_popup(tray.app_handle());
                    }
                })
                .build(app)?;

            let mut icon = IconCache::new(palette);
            icon.mark_drawn(initial_spec);
            app.manage(TrayState {
                tray: Mutex::new(Some(tray)),
                icon: Mutex::new(icon),
                renderer,
            });

            if let Some(window) = app.get_webview_window(POPUP_LABEL) {
                let popup = window.clone();
                let theme_app = app_handle.clone();
                window.on_window_event(move |event| match event {
                    WindowEvent::Focused(false) => {
                        let _ = popup.hide();
                    }
                    WindowEvent::ThemeChanged(_) => apply_theme_change(&theme_app),
                    _ => {}
                });
            }

            if let Err(err @ PollError::MissingCredential(_)) = reader.read() {
                log::warn!("[poll] No credential at startup: {}", err.kind());
                show_notification(&app_handle, &messages.warn_no_token, &messages.warn_login);
            }

            let client = UsageClient::new()?;
            let poll_loop = PollLoop::new(
                LiveSource::new(reader, client),
                TauriSurface {
                    app: app_handle.clone(),
                },
                state,
                PollScheduler::new(settings.poll),
                waiter,
            )
            .with_notifications(settings.notifications);
            tauri::async_runtime::spawn(poll_loop.run());

            log::info!("Claude Usage Tray initialized successfully");

            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri app");
}
