pub mod client;
pub mod credentials;
pub mod derive;
pub mod error;
pub mod locale;
pub mod monitor;
pub mod notifier;
pub mod presentation;
pub mod scheduler;
pub mod settings;
pub mod snapshot;
pub mod theme;
pub mod tray_icon_renderer;

pub use client::UsageClient;
pub use credentials::CredentialReader;
pub use error::PollError;
pub use locale::Messages;
pub use monitor::{LiveSource, PollLoop, PollStatus, SharedPollState, UsageSource, UsageSurface};
pub use scheduler::{poll_channel, PollControl, PollScheduler};
pub use settings::{init_settings, Settings};
pub use theme::IconPalette;
pub use tray_icon_renderer::{IconCache, IconSpec, TrayIconRenderer, TrayImage};
