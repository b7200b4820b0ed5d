//! Workflow coordinator driven against a scripted relay on a paused clock

use async_trait::async_trait;
use chrono::Utc;
use fireguard::config::{Config, ExhaustedPolicy};
use fireguard::error::{RelayError, WorkflowError};
use fireguard::history::{HistoricEvent, HistoryStore, MemoryStore, SensorReading};
use fireguard::messages::{
    BLANK_FEED, PollOutcome, RecordingSession, Verdict, WorkflowSnapshot, WorkflowState,
};
use fireguard::protocol::{AnalyzeResponse, SessionId};
use fireguard::relay::RelayApi;
use fireguard::services::{
    AnalysisRequester, Coordinator, CoordinatorHandle, RecordingTrigger, StatusPoller,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

const LIVE_FEED: &str = "http://camera.local:81/stream";

struct Script {
    start: Result<(), RelayError>,
    statuses: VecDeque<Result<bool, RelayError>>,
    status_default: bool,
    analyses: VecDeque<Result<AnalyzeResponse, RelayError>>,
    analyze_delay: Duration,
    artifact: Result<(), RelayError>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start: Ok(()),
            statuses: VecDeque::new(),
            status_default: false,
            analyses: VecDeque::new(),
            analyze_delay: Duration::ZERO,
            artifact: Ok(()),
        }
    }
}

#[derive(Default)]
struct FakeRelay {
    script: Mutex<Script>,
    start_calls: Mutex<Vec<Instant>>,
    status_calls: Mutex<Vec<SessionId>>,
    analyze_calls: Mutex<Vec<SessionId>>,
    session: Mutex<Option<SessionId>>,
}

impl FakeRelay {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    fn push_analysis(&self, response: Result<AnalyzeResponse, RelayError>) {
        self.script.lock().unwrap().analyses.push_back(response);
    }

    fn start_calls(&self) -> Vec<Instant> {
        self.start_calls.lock().unwrap().clone()
    }

    fn status_calls(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    fn analyze_calls(&self) -> usize {
        self.analyze_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RelayApi for FakeRelay {
    async fn start_recording(&self) -> Result<RecordingSession, RelayError> {
        self.start_calls.lock().unwrap().push(Instant::now());
        self.script.lock().unwrap().start.clone()?;

        let session_id = SessionId::new();
        *self.session.lock().unwrap() = Some(session_id);
        Ok(RecordingSession {
            session_id,
            started_at: Utc::now(),
            expected_duration_seconds: 30,
        })
    }

    async fn recording_status(
        &self,
        session: SessionId,
        _wait: Option<Duration>,
    ) -> Result<bool, RelayError> {
        self.status_calls.lock().unwrap().push(session);
        let mut script = self.script.lock().unwrap();
        let default = script.status_default;
        script.statuses.pop_front().unwrap_or(Ok(default))
    }

    async fn analyze_video(&self, session: SessionId) -> Result<AnalyzeResponse, RelayError> {
        self.analyze_calls.lock().unwrap().push(session);
        let delay = self.script.lock().unwrap().analyze_delay;
        sleep(delay).await;
        self.script
            .lock()
            .unwrap()
            .analyses
            .pop_front()
            .unwrap_or_else(|| Err(RelayError::Transport("no scripted analysis".into())))
    }

    async fn fetch_analyzed_video(&self, _video_id: &str) -> Result<(), RelayError> {
        self.script.lock().unwrap().artifact.clone()
    }

    fn artifact_url(&self, video_id: &str) -> String {
        format!("http://relay.test/get_analyzed_video/{}", video_id)
    }
}

fn analysis(status: &str, video_id: &str) -> Result<AnalyzeResponse, RelayError> {
    Ok(AnalyzeResponse {
        success: true,
        video_id: Some(video_id.to_string()),
        duration: Some(30.0),
        status: Some(status.to_string()),
        message: None,
    })
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.live_feed_url = LIVE_FEED.to_string();
    config.countdown_secs = 3;
    config.poll.interval_ms = 500;
    config.poll.max_attempts = 20;
    config.analysis.progress_tick_ms = 500;
    config.analysis.progress_step = 5;
    config.analysis.progress_ceiling = 95;
    config.analysis.timeout_secs = 120;
    config
}

fn spawn_workflow(
    config: &Config,
    relay: &Arc<FakeRelay>,
    history: &Arc<MemoryStore>,
) -> CoordinatorHandle {
    let (coordinator, handle) = Coordinator::new(config, relay.clone(), history.clone());
    tokio::spawn(coordinator.run());
    handle
}

async fn wait_until(
    handle: &CoordinatorHandle,
    pred: impl FnMut(&WorkflowSnapshot) -> bool,
) -> WorkflowSnapshot {
    tokio::time::timeout(Duration::from_secs(600), handle.wait_for(pred))
        .await
        .expect("workflow did not reach the expected state")
        .unwrap()
}

/// Every snapshot published after this call, with the time it was observed
fn record_snapshots(handle: &CoordinatorHandle) -> Arc<Mutex<Vec<(Instant, WorkflowSnapshot)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut rx = handle.subscribe();
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            sink.lock().unwrap().push((Instant::now(), snapshot));
        }
    });
    seen
}

fn is_awaiting(s: &WorkflowSnapshot) -> bool {
    s.state == WorkflowState::AwaitingAnalysis
}

#[tokio::test(start_paused = true)]
async fn test_start_request_issued_once_when_countdown_reaches_zero() {
    for countdown in [0u32, 1, 3, 5] {
        let relay = FakeRelay::new(Script::default());
        let history = Arc::new(MemoryStore::new());
        let mut config = test_config();
        config.countdown_secs = countdown;
        let handle = spawn_workflow(&config, &relay, &history);

        let begin = Instant::now();
        handle.record().await.unwrap();

        if countdown > 0 {
            sleep(Duration::from_secs(countdown as u64) - Duration::from_millis(1)).await;
            assert!(relay.start_calls().is_empty(), "started early for D={countdown}");
        }

        wait_until(&handle, is_awaiting).await;
        sleep(Duration::from_secs(30)).await;

        let calls = relay.start_calls();
        assert_eq!(calls.len(), 1, "D={countdown}");
        assert_eq!(calls[0] - begin, Duration::from_secs(countdown as u64));
    }
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ticks_every_second_with_feed_blanked() {
    let relay = FakeRelay::new(Script {
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);
    assert_eq!(handle.snapshot().camera_feed, LIVE_FEED);

    let seen = record_snapshots(&handle);
    handle.record().await.unwrap();
    wait_until(&handle, |s| s.state == WorkflowState::Recording).await;

    let countdown: Vec<u32> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(_, s)| match s.state {
            WorkflowState::CountingDown { seconds_remaining } => {
                assert_eq!(s.camera_feed, BLANK_FEED);
                Some(seconds_remaining)
            }
            _ => None,
        })
        .collect();
    // The zero tick and the start reply may land in one batch
    assert_eq!(countdown[..3], [3, 2, 1]);
    assert_eq!(handle.snapshot().camera_feed, BLANK_FEED);
}

#[tokio::test(start_paused = true)]
async fn test_poller_stops_as_soon_as_recording_ends() {
    let relay = FakeRelay::new(Script {
        statuses: VecDeque::from([Ok(true), Ok(true), Ok(false)]),
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    let snapshot = wait_until(&handle, is_awaiting).await;
    assert_eq!(snapshot.camera_feed, LIVE_FEED);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(relay.status_calls(), 3);

    // Every query names the session the relay handed out
    let session = relay.session.lock().unwrap().unwrap();
    assert!(relay.status_calls.lock().unwrap().iter().all(|s| *s == session));
}

#[tokio::test(start_paused = true)]
async fn test_poller_falls_back_after_max_attempts() {
    let relay = FakeRelay::new(Script {
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    let begin = Instant::now();
    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;

    // 3s countdown, then 20 checks 500ms apart
    assert_eq!(begin.elapsed(), Duration::from_secs(13));
    sleep(Duration::from_secs(60)).await;
    assert_eq!(relay.status_calls(), 20);
    assert_eq!(handle.snapshot().state, WorkflowState::AwaitingAnalysis);
}

#[tokio::test(start_paused = true)]
async fn test_non_json_status_is_transient() {
    let relay = FakeRelay::new(Script {
        statuses: VecDeque::from([
            Err(RelayError::NotJson("text/html".into())),
            Err(RelayError::Transport("connection reset".into())),
            Ok(false),
        ]),
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;
    assert_eq!(relay.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_polling_can_fail_the_run() {
    let relay = FakeRelay::new(Script {
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.poll.max_attempts = 4;
    config.poll.on_exhausted = ExhaustedPolicy::Fail;
    let handle = spawn_workflow(&config, &relay, &history);

    handle.record().await.unwrap();
    let snapshot = wait_until(&handle, |s| s.state.is_terminal()).await;

    assert_eq!(
        snapshot.state,
        WorkflowState::Failed {
            reason: WorkflowError::RecordingTimedOut(4)
        }
    );
    assert_eq!(relay.status_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_clears_all_timers() {
    let relay = FakeRelay::new(Script {
        start: Err(RelayError::Status {
            status: 500,
            body: "camera offline".into(),
        }),
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    let failed = wait_until(&handle, |s| s.state.is_terminal()).await;
    assert!(matches!(
        failed.state,
        WorkflowState::Failed {
            reason: WorkflowError::RecordingStartFailed(_)
        }
    ));
    assert_eq!(failed.camera_feed, LIVE_FEED);
    assert_eq!(failed.result, None);

    let seen = record_snapshots(&handle);
    sleep(Duration::from_secs(5)).await;

    assert!(seen.lock().unwrap().is_empty(), "a timer fired after the failure");
    assert_eq!(relay.start_calls().len(), 1);
    assert_eq!(relay.status_calls(), 0);
    assert_eq!(handle.snapshot(), failed);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_is_reported_distinctly() {
    let relay = FakeRelay::new(Script {
        start: Err(RelayError::Conflict),
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    let failed = wait_until(&handle, |s| s.state.is_terminal()).await;
    assert_eq!(
        failed.state,
        WorkflowState::Failed {
            reason: WorkflowError::RecordingConflict
        }
    );
}

async fn record_and_analyze(
    relay: &Arc<FakeRelay>,
    history: &Arc<MemoryStore>,
    config: &Config,
) -> (CoordinatorHandle, WorkflowSnapshot) {
    let handle = spawn_workflow(config, relay, history);
    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;
    handle.analyze().await.unwrap();
    let snapshot = wait_until(&handle, |s| s.state.is_terminal()).await;
    (handle, snapshot)
}

#[tokio::test(start_paused = true)]
async fn test_danger_verdict_records_unsafe_event() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(analysis("InDanger", "v1"));
    let history = Arc::new(MemoryStore::with_reading(SensorReading {
        temperature: 81.5,
        humidity: 30.0,
        smoke_level: 12.0,
        gas_level: 44.0,
    }));

    let (_handle, snapshot) = record_and_analyze(&relay, &history, &test_config()).await;

    assert_eq!(
        snapshot.state,
        WorkflowState::Result {
            verdict: Verdict::InDanger,
            artifact_ref: Some("http://relay.test/get_analyzed_video/v1".into()),
        }
    );
    let result = snapshot.result.unwrap();
    assert_eq!(result.video_id, "v1");
    assert_eq!(result.duration_seconds, Some(30.0));

    let events = history.fetch_historic_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].state);
    assert_eq!(events[0].temperature, 81.5);
    assert_eq!(events[0].gaz, 44.0);

    let session = relay.session.lock().unwrap().unwrap();
    assert_eq!(*relay.analyze_calls.lock().unwrap(), vec![session]);
}

/// History store whose backing storage is unavailable
#[derive(Default)]
struct UnavailableStore {
    record_attempts: AtomicUsize,
}

#[async_trait]
impl HistoryStore for UnavailableStore {
    async fn record_historic_event(&self, _event: HistoricEvent) -> anyhow::Result<()> {
        self.record_attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("history database offline")
    }

    async fn fetch_historic_events(&self) -> anyhow::Result<Vec<HistoricEvent>> {
        anyhow::bail!("history database offline")
    }

    async fn fetch_latest_sensor_reading(&self) -> anyhow::Result<Option<SensorReading>> {
        anyhow::bail!("sensor feed offline")
    }
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_does_not_fail_result() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(analysis("InDanger", "v12"));
    let history = Arc::new(UnavailableStore::default());

    let (coordinator, handle) = Coordinator::new(&test_config(), relay.clone(), history.clone());
    tokio::spawn(coordinator.run());

    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;
    handle.analyze().await.unwrap();
    let snapshot = wait_until(&handle, |s| s.state.is_terminal()).await;

    assert_eq!(
        snapshot.state,
        WorkflowState::Result {
            verdict: Verdict::InDanger,
            artifact_ref: Some("http://relay.test/get_analyzed_video/v12".into()),
        }
    );
    assert_eq!(snapshot.result.unwrap().video_id, "v12");
    assert_eq!(history.record_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_safe_verdict_records_safe_event() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(analysis("Safe", "v2"));
    let history = Arc::new(MemoryStore::new());

    let (_handle, snapshot) = record_and_analyze(&relay, &history, &test_config()).await;

    assert!(matches!(
        snapshot.state,
        WorkflowState::Result {
            verdict: Verdict::Safe,
            ..
        }
    ));
    let events = history.fetch_historic_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].state);
    assert_eq!(events[0].temperature, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_failure_can_be_retried_without_recording() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(Ok(AnalyzeResponse::failure("x")));
    let history = Arc::new(MemoryStore::new());

    let (handle, snapshot) = record_and_analyze(&relay, &history, &test_config()).await;
    assert_eq!(
        snapshot.state,
        WorkflowState::Failed {
            reason: WorkflowError::AnalysisFailed("x".into())
        }
    );
    assert!(history.fetch_historic_events().await.unwrap().is_empty());

    relay.push_analysis(analysis("Safe", "v3"));
    handle.analyze().await.unwrap();
    let retried = wait_until(&handle, |s| {
        matches!(s.state, WorkflowState::Result { .. })
    })
    .await;

    assert_eq!(retried.result.unwrap().video_id, "v3");
    assert_eq!(relay.start_calls().len(), 1);
    assert_eq!(relay.analyze_calls(), 2);
    assert_eq!(history.fetch_historic_events().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_failure_without_message_uses_generic_text() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(Ok(AnalyzeResponse {
        success: false,
        ..Default::default()
    }));
    let history = Arc::new(MemoryStore::new());

    let (_handle, snapshot) = record_and_analyze(&relay, &history, &test_config()).await;
    assert_eq!(
        snapshot.state,
        WorkflowState::Failed {
            reason: WorkflowError::AnalysisFailed(
                WorkflowError::GENERIC_ANALYSIS_MESSAGE.to_string()
            )
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_completes_after_response() {
    let relay = FakeRelay::new(Script {
        analyze_delay: Duration::from_secs(8),
        ..Default::default()
    });
    relay.push_analysis(analysis("Safe", "v4"));
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;

    let seen = record_snapshots(&handle);
    let requested = Instant::now();
    handle.analyze().await.unwrap();
    wait_until(&handle, |s| s.state.is_terminal()).await;
    // Let the subscriber catch up with the final snapshot
    sleep(Duration::from_millis(10)).await;

    let seen = seen.lock().unwrap();
    let mut last = 0;
    let mut updates = 0;
    for (at, snapshot) in seen.iter() {
        assert!(snapshot.progress_percent >= last, "progress went backwards");
        if snapshot.progress_percent == 100 {
            assert!(*at - requested >= Duration::from_secs(8));
        }
        if matches!(snapshot.state, WorkflowState::Analyzing { .. }) {
            assert!(snapshot.progress_percent < 100);
            updates += 1;
        }
        last = snapshot.progress_percent;
    }
    // 8s of ticks every 500ms, 5% each
    assert!(updates >= 10);

    let (_, done) = seen.last().unwrap();
    assert!(matches!(done.state, WorkflowState::Result { .. }));
    assert_eq!(done.progress_percent, 100);
}

#[tokio::test(start_paused = true)]
async fn test_progress_stops_at_ceiling() {
    let relay = FakeRelay::new(Script {
        analyze_delay: Duration::from_secs(60),
        ..Default::default()
    });
    relay.push_analysis(analysis("Safe", "v5"));
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;
    handle.analyze().await.unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(
        handle.snapshot().state,
        WorkflowState::Analyzing {
            progress_percent: 95
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_analysis_timeout_is_retryable() {
    let relay = FakeRelay::new(Script {
        analyze_delay: Duration::from_secs(60),
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.analysis.timeout_secs = 5;

    let (handle, snapshot) = record_and_analyze(&relay, &history, &config).await;
    assert_eq!(
        snapshot.state,
        WorkflowState::Failed {
            reason: WorkflowError::AnalysisTimedOut(5)
        }
    );

    relay.script.lock().unwrap().analyze_delay = Duration::ZERO;
    relay.push_analysis(analysis("InDanger", "v6"));
    handle.analyze().await.unwrap();
    let retried = wait_until(&handle, |s| {
        matches!(s.state, WorkflowState::Result { .. })
    })
    .await;
    assert_eq!(retried.result.unwrap().verdict, Verdict::InDanger);
}

#[tokio::test(start_paused = true)]
async fn test_missing_artifact_degrades_by_default() {
    let relay = FakeRelay::new(Script {
        artifact: Err(RelayError::Status {
            status: 404,
            body: String::new(),
        }),
        ..Default::default()
    });
    relay.push_analysis(analysis("InDanger", "v7"));
    let history = Arc::new(MemoryStore::new());

    let (_handle, snapshot) = record_and_analyze(&relay, &history, &test_config()).await;
    assert_eq!(
        snapshot.state,
        WorkflowState::Result {
            verdict: Verdict::InDanger,
            artifact_ref: None,
        }
    );
    assert_eq!(history.fetch_historic_events().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_artifact_fails_when_required() {
    let relay = FakeRelay::new(Script {
        artifact: Err(RelayError::Status {
            status: 404,
            body: String::new(),
        }),
        ..Default::default()
    });
    relay.push_analysis(analysis("InDanger", "v8"));
    let history = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.analysis.require_artifact = true;

    let (_handle, snapshot) = record_and_analyze(&relay, &history, &config).await;
    assert!(matches!(
        snapshot.state,
        WorkflowState::Failed {
            reason: WorkflowError::ArtifactUnavailable(_)
        }
    ));
    assert!(history.fetch_historic_events().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_countdown_cancels_start() {
    let relay = FakeRelay::new(Script::default());
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    handle.reset().await.unwrap();
    wait_until(&handle, |s| s.state == WorkflowState::Idle).await;

    let seen = record_snapshots(&handle);
    sleep(Duration::from_secs(10)).await;
    assert!(relay.start_calls().is_empty());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(handle.snapshot().camera_feed, LIVE_FEED);
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_recording_stops_polling() {
    let relay = FakeRelay::new(Script {
        status_default: true,
        ..Default::default()
    });
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    wait_until(&handle, |s| s.state == WorkflowState::Recording).await;
    sleep(Duration::from_millis(1200)).await;
    handle.reset().await.unwrap();
    wait_until(&handle, |s| s.state == WorkflowState::Idle).await;

    let polled = relay.status_calls();
    let seen = record_snapshots(&handle);
    sleep(Duration::from_secs(30)).await;

    assert_eq!(relay.status_calls(), polled);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_analysis_discards_outcome() {
    let relay = FakeRelay::new(Script {
        analyze_delay: Duration::from_secs(10),
        ..Default::default()
    });
    relay.push_analysis(analysis("InDanger", "v9"));
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.record().await.unwrap();
    wait_until(&handle, is_awaiting).await;
    handle.analyze().await.unwrap();
    sleep(Duration::from_secs(2)).await;
    handle.reset().await.unwrap();
    let idle = wait_until(&handle, |s| s.state == WorkflowState::Idle).await;
    assert_eq!(idle.result, None);

    let seen = record_snapshots(&handle);
    sleep(Duration::from_secs(60)).await;

    assert!(seen.lock().unwrap().is_empty());
    assert!(history.fetch_historic_events().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_analyze_is_ignored_without_a_recording() {
    let relay = FakeRelay::new(Script::default());
    let history = Arc::new(MemoryStore::new());
    let handle = spawn_workflow(&test_config(), &relay, &history);

    handle.analyze().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.snapshot().state, WorkflowState::Idle);
    assert_eq!(relay.analyze_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_record_after_result_starts_a_fresh_run() {
    let relay = FakeRelay::new(Script::default());
    relay.push_analysis(analysis("InDanger", "v10"));
    let history = Arc::new(MemoryStore::new());

    let (handle, _) = record_and_analyze(&relay, &history, &test_config()).await;

    handle.record().await.unwrap();
    let counting = wait_until(&handle, |s| {
        matches!(s.state, WorkflowState::CountingDown { .. })
    })
    .await;
    assert_eq!(counting.result, None);

    wait_until(&handle, is_awaiting).await;
    assert_eq!(relay.start_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_components_run_without_coordinator() {
    let relay = FakeRelay::new(Script {
        statuses: VecDeque::from([Ok(true), Ok(false)]),
        status_default: true,
        ..Default::default()
    });
    relay.push_analysis(analysis("InDanger", "v11"));
    let history = Arc::new(MemoryStore::new());
    let config = test_config();

    let trigger = RecordingTrigger::new(relay.clone());
    let session = trigger.begin_remote_recording().await.unwrap();

    let poller = StatusPoller::new(relay.clone(), &config.poll);
    assert_eq!(
        poller.poll_until_done(session.session_id).await,
        PollOutcome::Completed { attempts: 2 }
    );

    let analyzer = AnalysisRequester::new(relay.clone(), history.clone(), &config.analysis);
    let result = analyzer.analyze(session.session_id).await.unwrap();
    assert_eq!(result.verdict, Verdict::InDanger);
    assert_eq!(history.fetch_historic_events().await.unwrap().len(), 1);
}
