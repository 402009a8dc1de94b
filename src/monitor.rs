//! The poll loop and the state it shares with the tray.
//!
//! One task owns the loop: read credential, fetch, derive, update
//! [`PollState`], announce resets, refresh the UI, then wait. The UI side only
//! ever sees consistent [`PollStatus`] copies taken under the lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::client::UsageClient;
use crate::credentials::CredentialReader;
use crate::derive::{derive, ViewModel};
use crate::error::PollError;
use crate::notifier::ResetNotifier;
use crate::scheduler::{PollOutcome, PollScheduler, PollWaiter, WakeReason};
use crate::snapshot::{BucketKind, UsageSnapshot};

/// Where snapshots come from.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn poll(&self) -> Result<UsageSnapshot, PollError>;
}

/// Where results go: the tray, the popup and OS notifications.
pub trait UsageSurface: Send + Sync {
    fn refresh(&self, status: &PollStatus);
    fn notify_reset(&self, kind: BucketKind);
}

/// Reads the CLI credential fresh on every poll and queries the usage endpoint.
pub struct LiveSource {
    reader: CredentialReader,
    client: UsageClient,
}

impl LiveSource {
    pub fn new(reader: CredentialReader, client: UsageClient) -> Self {
        Self { reader, client }
    }
}

#[async_trait]
impl UsageSource for LiveSource {
    async fn poll(&self) -> Result<UsageSnapshot, PollError> {
        let credential = self.reader.read()?;
        if credential.is_expired(Utc::now()) {
            return Err(PollError::Unauthorized { status: None });
        }

        let mut snapshot = self.client.fetch(&credential).await?;
        snapshot.account = self.reader.read_account(&credential);
        Ok(snapshot)
    }
}

#[derive(Debug, Default)]
pub struct PollState {
    snapshot: Option<Arc<UsageSnapshot>>,
    error: Option<PollError>,
    notifier: ResetNotifier,
    interval: Option<Duration>,
}

/// Consistent copy of [`PollState`] for readers.
#[derive(Debug, Clone, Default)]
pub struct PollStatus {
    /// Last good snapshot; survives later failures.
    pub snapshot: Option<Arc<UsageSnapshot>>,
    /// Set when the most recent poll failed.
    pub error: Option<PollError>,
    pub interval: Option<Duration>,
}

impl PollStatus {
    /// Re-derive the snapshot for `now` so countdowns advance between polls.
    pub fn view_at(&self, now: DateTime<Utc>) -> Option<ViewModel> {
        self.snapshot.as_deref().map(|snapshot| derive(snapshot, now))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedPollState {
    inner: Arc<Mutex<PollState>>,
}

impl SharedPollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PollStatus {
        let state = self.lock();
        PollStatus {
            snapshot: state.snapshot.clone(),
            error: state.error.clone(),
            interval: state.interval,
        }
    }

    /// Install a new snapshot and return the buckets whose reset just happened.
    pub fn apply_success(&self, snapshot: UsageSnapshot, view: &ViewModel, interval: Duration) -> Vec<BucketKind> {
        let mut state = self.lock();
        let fired = state.notifier.observe(view);
        state.snapshot = Some(Arc::new(snapshot));
        state.error = None;
        state.interval = Some(interval);
        fired
    }

    /// Record a failure; the previous snapshot stays.
    pub fn apply_failure(&self, error: PollError, interval: Duration) {
        let mut state = self.lock();
        state.error = Some(error);
        state.interval = Some(interval);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PollState> {
        // Every writer replaces whole fields, so a poisoned state is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PollLoop<S, U> {
    source: S,
    surface: U,
    state: SharedPollState,
    scheduler: PollScheduler,
    waiter: PollWaiter,
    notifications: bool,
}

impl<S: UsageSource, U: UsageSurface> PollLoop<S, U> {
    pub fn new(source: S, surface: U, state: SharedPollState, scheduler: PollScheduler, waiter: PollWaiter) -> Self {
        Self {
            source,
            surface,
            state,
            scheduler,
            waiter,
            notifications: true,
        }
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    /// Run until shutdown. A poll in flight always completes before the loop
    /// looks at the shutdown signal again.
    pub async fn run(mut self) {
        log::info!("[poll] Loop started");
        loop {
            if self.waiter.is_shutdown() {
                break;
            }

            let delay = self.poll_once().await;
            self.surface.refresh(&self.state.status());

            log::debug!("[poll] Next poll in {}s", delay.as_secs());
            match self.waiter.wait(delay).await {
                WakeReason::Shutdown => break,
                WakeReason::Refresh => log::info!("[poll] Manual refresh"),
                WakeReason::Elapsed => {}
            }
        }
        log::info!("[poll] Loop stopped");
    }

    async fn poll_once(&mut self) -> Duration {
        match self.source.poll().await {
            Ok(snapshot) => {
                let view = derive(&snapshot, Utc::now());
                self.scheduler.record(&view);
                let delay = self.scheduler.next_delay(PollOutcome::Fresh(&view));

                log::info!(
                    "[poll] Session {}, weekly {}",
                    format_percent(view.percent(BucketKind::Session)),
                    format_percent(view.percent(BucketKind::Weekly)),
                );

                let fired = self.state.apply_success(snapshot, &view, delay);
                for kind in fired {
                    if self.notifications {
                        log::info!("[notify] {:?} quota reset", kind);
                        self.surface.notify_reset(kind);
                    }
                }
                delay
            }
            Err(err) => {
                match err.status() {
                    Some(status) => log::warn!("[poll] Poll failed: {} (HTTP {})", err.kind(), status),
                    None => log::warn!("[poll] Poll failed: {}", err.kind()),
                }
                let delay = self.scheduler.next_delay(PollOutcome::Failed);
                self.state.apply_failure(err, delay);
                delay
            }
        }
    }
}

fn format_percent(percent: Option<f64>) -> String {
    percent.map_or_else(|| "n/a".to_string(), |p| format!("{:.0}%", p))
}
