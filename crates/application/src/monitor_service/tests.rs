use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use sitepulse_core::{AppError, AppResult, AuditId};
use sitepulse_domain::{
    AuditCategory, AuditReport, AuditReportInput, AuditState, CategoryScores, StatusSnapshot,
};

use crate::monitor_ports::{AuditGateway, ProgressSink};

use super::{AuditMonitor, MonitorConfig, WatchRequest};

struct ScriptedGateway {
    statuses: Mutex<VecDeque<AppResult<StatusSnapshot>>>,
    reports: Mutex<VecDeque<AppResult<AuditReport>>>,
    status_called_at: Mutex<Vec<Instant>>,
    report_calls: Mutex<u32>,
}

impl ScriptedGateway {
    fn new(
        statuses: Vec<AppResult<StatusSnapshot>>,
        reports: Vec<AppResult<AuditReport>>,
    ) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            reports: Mutex::new(reports.into()),
            status_called_at: Mutex::new(Vec::new()),
            report_calls: Mutex::new(0),
        }
    }

    async fn status_call_times(&self) -> Vec<Instant> {
        self.status_called_at.lock().await.clone()
    }

    async fn status_call_count(&self) -> usize {
        self.status_called_at.lock().await.len()
    }

    async fn report_call_count(&self) -> u32 {
        *self.report_calls.lock().await
    }
}

#[async_trait]
impl AuditGateway for ScriptedGateway {
    async fn fetch_status(&self, _audit_id: &AuditId) -> AppResult<StatusSnapshot> {
        self.status_called_at.lock().await.push(Instant::now());
        self.statuses
            .lock()
            .await
            .pop_front()
            // An exhausted script keeps the audit running forever.
            .unwrap_or_else(|| Ok(running(None)))
    }

    async fn fetch_report(&self, _audit_id: &AuditId) -> AppResult<AuditReport> {
        *self.report_calls.lock().await += 1;
        self.reports
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Internal("report script exhausted".to_owned())))
    }
}

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<f64>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn publish(&self, displayed: f64) {
        self.frames.lock().await.push(displayed);
    }
}

fn audit_id() -> AuditId {
    AuditId::new("aud_test").unwrap_or_else(|_| unreachable!())
}

fn running(progress: Option<f64>) -> StatusSnapshot {
    StatusSnapshot {
        state: AuditState::Running,
        progress,
        scores: None,
    }
}

fn failed() -> StatusSnapshot {
    StatusSnapshot {
        state: AuditState::Failed,
        progress: None,
        scores: None,
    }
}

fn sample_scores() -> CategoryScores {
    let map: BTreeMap<AuditCategory, f64> = [
        (AuditCategory::Performance, 82.0),
        (AuditCategory::Seo, 94.0),
    ]
    .into_iter()
    .collect();
    CategoryScores::new(map).unwrap_or_else(|_| unreachable!())
}

fn completed_with_scores() -> StatusSnapshot {
    StatusSnapshot {
        state: AuditState::Completed,
        progress: Some(100.0),
        scores: Some(sample_scores()),
    }
}

fn completed_without_scores() -> StatusSnapshot {
    StatusSnapshot {
        state: AuditState::Completed,
        progress: Some(100.0),
        scores: None,
    }
}

fn sample_report() -> AuditReport {
    AuditReport::new(AuditReportInput {
        audit_id: audit_id(),
        target_url: "https://example.com".to_owned(),
        categories: vec![AuditCategory::Performance, AuditCategory::Seo],
        scores: sample_scores(),
        finished_at: Utc::now(),
    })
    .unwrap_or_else(|_| unreachable!())
}

fn monitor(gateway: Arc<ScriptedGateway>, sink: Arc<RecordingSink>) -> AuditMonitor {
    AuditMonitor::new(gateway, sink, MonitorConfig::default())
        .unwrap_or_else(|_| unreachable!())
}

fn request() -> WatchRequest {
    let mut request = WatchRequest::new(audit_id(), vec![AuditCategory::Performance]);
    request.expected_duration = Some(Duration::from_secs(90));
    request
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

fn assert_non_decreasing(frames: &[f64]) {
    for pair in frames.windows(2) {
        assert!(pair[1] >= pair[0], "frames regressed: {pair:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn completion_returns_the_report_within_the_hold() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![Ok(completed_with_scores())],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let started = Instant::now();
    let outcome = monitor.watch(request(), cancel_rx).await;

    assert!(outcome.is_ok());
    let report = outcome.unwrap_or_else(|_| unreachable!());
    assert_eq!(report.scores(), &sample_scores());

    // The completion hold is the only time spent after the terminal poll.
    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert_eq!(gateway.report_call_count().await, 1);

    let frames = sink.frames.lock().await.clone();
    assert_non_decreasing(&frames);
    assert_eq!(frames.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn successful_polls_run_on_the_initial_cadence() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![
            Ok(running(None)),
            Ok(running(Some(20.0))),
            Ok(completed_with_scores()),
        ],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(outcome.is_ok());

    let times = gateway.status_call_times().await;
    assert_eq!(
        gaps(&times),
        vec![Duration::from_secs(3), Duration::from_secs(3)]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_status_surfaces_exactly_once_and_stops_polling() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![Ok(running(None)), Ok(failed())],
        Vec::new(),
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(matches!(outcome, Err(AppError::AuditFailed(_))));
    assert_eq!(gateway.status_call_count().await, 2);
    assert_eq!(gateway.report_call_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limiting_doubles_the_delay_and_stays_invisible() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![
            Err(AppError::RateLimited("429".to_owned())),
            Err(AppError::RateLimited("429".to_owned())),
            Ok(running(Some(10.0))),
            Ok(completed_with_scores()),
        ],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    // Two rate-limit hits never reach the caller.
    assert!(outcome.is_ok());

    let times = gateway.status_call_times().await;
    assert_eq!(
        gaps(&times),
        vec![
            Duration::from_secs(6),
            Duration::from_secs(12),
            Duration::from_secs(3),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_up_to_the_cap() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![
            Err(AppError::Unavailable("502".to_owned())),
            Err(AppError::Unavailable("connect reset".to_owned())),
            Err(AppError::Unavailable("503".to_owned())),
            Err(AppError::Unavailable("timeout".to_owned())),
            Ok(completed_with_scores()),
        ],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(outcome.is_ok());

    let times = gateway.status_call_times().await;
    assert_eq!(
        gaps(&times),
        vec![
            Duration::from_secs(6),
            Duration::from_secs(12),
            Duration::from_secs(15),
            Duration::from_secs(15),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn progress_keeps_advancing_through_an_outage() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![
            Err(AppError::Unavailable("502".to_owned())),
            Err(AppError::Unavailable("502".to_owned())),
            Err(AppError::Unavailable("502".to_owned())),
            Ok(completed_with_scores()),
        ],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let mut watched = request();
    watched.expected_duration = Some(Duration::from_secs(30));

    let outcome = monitor.watch(watched, cancel_rx).await;
    assert!(outcome.is_ok());

    let frames = sink.frames.lock().await.clone();
    assert_non_decreasing(&frames);

    // The backend said nothing useful for 33 s, yet the bar moved on the
    // time baseline alone.
    let before_completion: Vec<f64> = frames
        .iter()
        .copied()
        .filter(|frame| *frame < 100.0)
        .collect();
    let peak = before_completion.last().copied().unwrap_or_default();
    let first = before_completion.first().copied().unwrap_or_default();
    assert!(peak > first + 20.0, "bar stalled: {first} -> {peak}");
}

#[tokio::test(start_paused = true)]
async fn backend_progress_reports_lift_the_displayed_value() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![
            Ok(running(None)),
            Ok(running(Some(20.0))),
            Ok(running(Some(20.0))),
            Ok(running(Some(20.0))),
            Ok(running(Some(55.0))),
            Ok(completed_with_scores()),
        ],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(outcome.is_ok());

    // With a 90 s expectation the bare time baseline reaches ~15 by the
    // final poll at t=15; only the fresh 55% blend can push displayed
    // progress well past that before the completion snap.
    let frames = sink.frames.lock().await.clone();
    assert_non_decreasing(&frames);
    let peak_before_snap = frames
        .iter()
        .copied()
        .filter(|frame| *frame < 100.0)
        .fold(0.0_f64, f64::max);
    assert!(
        peak_before_snap > 25.0,
        "blend never surfaced: {peak_before_snap}"
    );
    assert_eq!(frames.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn completed_status_without_scores_keeps_polling() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![Ok(completed_without_scores()), Ok(completed_with_scores())],
        vec![Ok(sample_report())],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(outcome.is_ok());
    assert_eq!(gateway.status_call_count().await, 2);
    assert_eq!(gateway.report_call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_report_fetch_failure_retries() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![Ok(completed_with_scores()), Ok(completed_with_scores())],
        vec![
            Err(AppError::Unavailable("503".to_owned())),
            Ok(sample_report()),
        ],
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(outcome.is_ok());
    assert_eq!(gateway.report_call_count().await, 2);
    assert_eq!(gateway.status_call_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn fatal_errors_stop_the_watch() {
    let gateway = Arc::new(ScriptedGateway::new(
        vec![Err(AppError::NotFound("no such audit".to_owned()))],
        Vec::new(),
    ));
    let sink = Arc::new(RecordingSink::default());
    let monitor = monitor(Arc::clone(&gateway), Arc::clone(&sink));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = monitor.watch(request(), cancel_rx).await;
    assert!(matches!(outcome, Err(AppError::NotFound(_))));
    assert_eq!(gateway.status_call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_halts_both_loops_promptly() {
    let gateway = Arc::new(ScriptedGateway::new(Vec::new(), Vec::new()));
    let sink = Arc::new(RecordingSink::default());
    let monitor = Arc::new(monitor(Arc::clone(&gateway), Arc::clone(&sink)));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.watch(request(), cancel_rx).await }
    });

    // Let a few polls happen, then pull the plug mid-sleep.
    tokio::time::sleep(Duration::from_secs(7)).await;
    let polls_before = gateway.status_call_count().await;
    assert!(polls_before >= 2);
    assert!(cancel_tx.send(true).is_ok());

    let joined = handle.await;
    assert!(joined.is_ok());
    let outcome = joined.unwrap_or_else(|_| unreachable!());
    assert!(matches!(outcome, Err(AppError::Cancelled(_))));

    let frames_at_cancel = sink.frames.lock().await.len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.status_call_count().await, polls_before);
    assert_eq!(sink.frames.lock().await.len(), frames_at_cancel);
}

#[tokio::test(start_paused = true)]
async fn monitor_rejects_inconsistent_timings() {
    let gateway = Arc::new(ScriptedGateway::new(Vec::new(), Vec::new()));
    let sink = Arc::new(RecordingSink::default());

    let config = MonitorConfig {
        initial_poll_delay: Duration::from_secs(10),
        max_poll_delay: Duration::from_secs(5),
        ..MonitorConfig::default()
    };
    assert!(AuditMonitor::new(gateway, sink, config).is_err());
}
