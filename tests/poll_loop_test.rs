use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use claude_usage_tray::client::UsageClient;
use claude_usage_tray::credentials::CredentialReader;
use claude_usage_tray::error::PollError;
use claude_usage_tray::locale::Messages;
use claude_usage_tray::monitor::{LiveSource, PollLoop, PollStatus, SharedPollState, UsageSource, UsageSurface};
use claude_usage_tray::presentation::tooltip_text;
use claude_usage_tray::scheduler::{poll_channel, PollControl, PollIntervals, PollScheduler};
use claude_usage_tray::snapshot::{BucketKind, QuotaBucket, UsageSnapshot};
use claude_usage_tray::tray_icon_renderer::{IconGlyph, IconSpec};

type Response = Result<UsageSnapshot, PollError>;

/// Replays canned responses; the last one repeats once the script runs out.
#[derive(Clone)]
struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Response>>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(script: Vec<Response>, latency: Duration) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            latency,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for ScriptedSource {
    async fn poll(&self) -> Result<UsageSnapshot, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        let response = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

#[derive(Clone, Default)]
struct RecordingSurface {
    refreshes: Arc<Mutex<Vec<PollStatus>>>,
    notified: Arc<Mutex<Vec<BucketKind>>>,
}

impl RecordingSurface {
    fn refresh_count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }

    fn last(&self) -> PollStatus {
        self.refreshes.lock().unwrap().last().cloned().unwrap()
    }

    fn notified(&self) -> Vec<BucketKind> {
        self.notified.lock().unwrap().clone()
    }
}

impl UsageSurface for RecordingSurface {
    fn refresh(&self, status: &PollStatus) {
        self.refreshes.lock().unwrap().push(status.clone());
    }

    fn notify_reset(&self, kind: BucketKind) {
        self.notified.lock().unwrap().push(kind);
    }
}

fn usage(session: f64, weekly: f64, session_reset_hours: i64) -> Response {
    let now = Utc::now();
    Ok(UsageSnapshot::new(now)
        .with_bucket(
            BucketKind::Session,
            QuotaBucket::from_utilization(
                BucketKind::Session,
                session,
                Some(now + chrono::Duration::hours(session_reset_hours)),
            ),
        )
        .with_bucket(
            BucketKind::Weekly,
            QuotaBucket::from_utilization(BucketKind::Weekly, weekly, None),
        ))
}

struct Harness<S> {
    source: S,
    surface: RecordingSurface,
    state: SharedPollState,
    control: PollControl,
    handle: tokio::task::JoinHandle<()>,
}

fn start<S: UsageSource + Clone + 'static>(source: S, notifications: bool) -> Harness<S> {
    let surface = RecordingSurface::default();
    let state = SharedPollState::new();
    let (control, waiter) = poll_channel();
    let poll_loop = PollLoop::new(
        source.clone(),
        surface.clone(),
        state.clone(),
        PollScheduler::new(PollIntervals::default()),
        waiter,
    )
    .with_notifications(notifications);
    let handle = tokio::spawn(poll_loop.run());
    Harness {
        source,
        surface,
        state,
        control,
        handle,
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_polls_immediately() {
    let source = ScriptedSource::new(vec![usage(10.0, 10.0, 3)], Duration::ZERO);
    let h = start(source, true);

    advance(1).await;
    assert_eq!(h.source.calls(), 1);

    // Well inside the 120 s base wait.
    advance(30).await;
    assert_eq!(h.source.calls(), 1);

    assert!(h.control.refresh_now());
    advance(1).await;
    assert_eq!(h.source.calls(), 2);
    assert_eq!(h.surface.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_during_poll_runs_one_follow_up() {
    let source = ScriptedSource::new(vec![usage(10.0, 10.0, 3)], Duration::from_secs(5));
    let h = start(source, true);

    // First poll is in flight until t=5.
    advance(1).await;
    assert!(h.control.refresh_now());
    assert!(!h.control.refresh_now());

    // The pending request starts a second poll right after the first one.
    advance(10).await;
    assert_eq!(h.source.calls(), 2);
    assert_eq!(h.source.max_in_flight.load(Ordering::SeqCst), 1);

    // Both requests were coalesced into that single follow-up.
    advance(60).await;
    assert_eq!(h.source.calls(), 2);

    h.control.refresh_now();
    advance(6).await;
    assert_eq!(h.source.calls(), 3);
    assert_eq!(h.source.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_response_keeps_previous_snapshot() {
    let source = ScriptedSource::new(
        vec![
            usage(42.0, 10.0, 3),
            Err(PollError::MalformedResponse("five_hour.utilization missing".into())),
        ],
        Duration::ZERO,
    );
    let h = start(source, true);

    advance(1).await;
    h.control.refresh_now();
    advance(1).await;

    let status = h.state.status();
    assert!(matches!(status.error, Some(PollError::MalformedResponse(_))));
    let view = status.view_at(Utc::now()).expect("stale snapshot kept");
    assert_eq!(view.percent(BucketKind::Session), Some(42.0));

    // Error retry interval, not the base one.
    assert_eq!(status.interval, Some(Duration::from_secs(90)));
    assert_eq!(IconSpec::from_state(Some(&view), status.error.as_ref()).glyph, IconGlyph::Error);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_shows_login_hint_and_retries_on_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let reader = CredentialReader::new(dir.path().join(".credentials.json"), None);
    let source = Arc::new(LiveSource::new(reader, UsageClient::new().unwrap()));
    let h = start(SharedSource(source), true);

    advance(1).await;
    let status = h.surface.last();
    assert!(matches!(status.error, Some(PollError::MissingCredential(_))));
    assert!(status.snapshot.is_none());

    let messages = Messages::load("en").unwrap();
    let glyph = IconSpec::from_state(None, status.error.as_ref()).glyph;
    assert_eq!(glyph, IconGlyph::LoginRequired);
    let tooltip = tooltip_text(None, status.error.as_ref(), &Utc, &messages);
    assert!(tooltip.contains(&messages.auth_expired_short));

    h.control.refresh_now();
    advance(1).await;
    assert_eq!(h.surface.refresh_count(), 2);
    assert!(!h.handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn reset_is_announced_once() {
    let source = ScriptedSource::new(
        vec![usage(97.0, 20.0, 1), usage(3.0, 20.0, 6), usage(4.0, 20.0, 6)],
        Duration::ZERO,
    );
    let h = start(source, true);

    for _ in 0..3 {
        advance(1).await;
        h.control.refresh_now();
    }
    advance(1).await;

    assert!(h.source.calls() >= 3);
    assert_eq!(h.surface.notified(), vec![BucketKind::Session]);
}

#[tokio::test(start_paused = true)]
async fn disabled_notifications_stay_silent() {
    let source = ScriptedSource::new(vec![usage(97.0, 20.0, 1), usage(3.0, 20.0, 6)], Duration::ZERO);
    let h = start(source, false);

    advance(1).await;
    h.control.refresh_now();
    advance(1).await;

    assert_eq!(h.source.calls(), 2);
    assert!(h.surface.notified().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_loop() {
    let source = ScriptedSource::new(vec![usage(10.0, 10.0, 3)], Duration::ZERO);
    let h = start(source, true);

    advance(1).await;
    h.control.shutdown();
    h.handle.await.unwrap();
    assert_eq!(h.source.calls(), 1);
}

/// `LiveSource` is not `Clone`; share it for the harness.
#[derive(Clone)]
struct SharedSource(Arc<LiveSource>);

#[async_trait]
impl UsageSource for SharedSource {
    async fn poll(&self) -> Result<UsageSnapshot, PollError> {
        self.0.poll().await
    }
}
