//! Audit status polling and progress rendering.

use std::sync::Arc;
use std::time::Duration;

use sitepulse_core::{AppError, AppResult, AuditId};
use sitepulse_domain::{
    AuditCategory, AuditReport, ProgressEstimator, expected_audit_duration,
};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::monitor_ports::{AuditGateway, ProgressSink};

mod backoff;
#[cfg(test)]
mod tests;

pub use backoff::PollBackoff;

/// Tunable timings for the audit monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between successful polls, also the backoff starting point.
    pub initial_poll_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_poll_delay: Duration,
    /// Interval between displayed-progress frames.
    pub frame_interval: Duration,
    /// How long the finished bar stays visible before `watch` returns.
    pub completion_hold: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_poll_delay: Duration::from_secs(3),
            max_poll_delay: Duration::from_secs(15),
            frame_interval: Duration::from_millis(50),
            completion_hold: Duration::from_millis(500),
        }
    }
}

impl MonitorConfig {
    fn validate(&self) -> AppResult<()> {
        if self.initial_poll_delay.is_zero() {
            return Err(AppError::Validation(
                "initial_poll_delay must be greater than zero".to_owned(),
            ));
        }

        if self.max_poll_delay < self.initial_poll_delay {
            return Err(AppError::Validation(
                "max_poll_delay must not be less than initial_poll_delay".to_owned(),
            ));
        }

        if self.frame_interval.is_zero() {
            return Err(AppError::Validation(
                "frame_interval must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Everything needed to watch one audit to completion.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    /// Backend-issued identifier of the audit to watch.
    pub audit_id: AuditId,
    /// Categories the audit was started with; drives the duration estimate.
    pub categories: Vec<AuditCategory>,
    /// Overrides the category-derived duration estimate when set.
    pub expected_duration: Option<Duration>,
}

impl WatchRequest {
    /// Creates a watch request for the given audit and categories.
    #[must_use]
    pub fn new(audit_id: AuditId, categories: Vec<AuditCategory>) -> Self {
        Self {
            audit_id,
            categories,
            expected_duration: None,
        }
    }

    fn expected(&self) -> Duration {
        self.expected_duration
            .unwrap_or_else(|| expected_audit_duration(&self.categories))
    }
}

/// Watches one audit to a terminal state.
///
/// Runs a strictly sequential status-poll loop (one request in flight at a
/// time) next to a frame task that eases the displayed progress toward the
/// estimator's target, so the bar keeps moving even while the backend is
/// silent.
pub struct AuditMonitor {
    gateway: Arc<dyn AuditGateway>,
    sink: Arc<dyn ProgressSink>,
    config: MonitorConfig,
}

impl AuditMonitor {
    /// Creates an audit monitor with validated timings.
    pub fn new(
        gateway: Arc<dyn AuditGateway>,
        sink: Arc<dyn ProgressSink>,
        config: MonitorConfig,
    ) -> AppResult<Self> {
        config.validate()?;

        Ok(Self {
            gateway,
            sink,
            config,
        })
    }

    /// Polls the audit until it completes, fails, or is cancelled.
    ///
    /// Returns the full report exactly once on completion. Transient backend
    /// trouble (rate limiting, auth hiccups, 5xx, network errors) is retried
    /// with backoff and never surfaces; everything else ends the watch with
    /// an error. Flipping `cancel` to `true` (or dropping its sender) tears
    /// both loops down promptly, aborting any in-flight request.
    pub async fn watch(
        &self,
        request: WatchRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> AppResult<AuditReport> {
        let expected = request.expected();
        let estimator = Arc::new(Mutex::new(ProgressEstimator::new(expected)?));
        let started = Instant::now();

        info!(
            audit_id = %request.audit_id,
            expected_seconds = expected.as_secs(),
            "watching audit"
        );

        let (stop_frames, frame_stop) = watch::channel(false);
        let frames = tokio::spawn(frame_loop(
            Arc::clone(&estimator),
            Arc::clone(&self.sink),
            started,
            self.config.frame_interval,
            frame_stop,
        ));

        let outcome = self
            .poll_loop(&request.audit_id, &estimator, started, &mut cancel)
            .await;

        let _ = stop_frames.send(true);
        if let Err(error) = frames.await {
            warn!(audit_id = %request.audit_id, error = %error, "frame task ended abnormally");
        }

        outcome
    }

    async fn poll_loop(
        &self,
        audit_id: &AuditId,
        estimator: &Arc<Mutex<ProgressEstimator>>,
        started: Instant,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<AuditReport> {
        let mut backoff = PollBackoff::new(
            self.config.initial_poll_delay,
            self.config.max_poll_delay,
        );

        loop {
            let status = tokio::select! {
                () = cancellation_requested(cancel) => {
                    return Err(AppError::Cancelled(format!(
                        "audit {audit_id} monitoring cancelled"
                    )));
                }
                status = self.gateway.fetch_status(audit_id) => status,
            };

            match status {
                Ok(snapshot) => {
                    backoff.record_success();

                    if snapshot.is_failed() {
                        return Err(AppError::AuditFailed(format!(
                            "audit {audit_id} failed on the backend"
                        )));
                    }

                    if snapshot.is_complete() {
                        match self.fetch_report(audit_id, cancel).await {
                            Ok(report) => {
                                estimator.lock().await.complete();
                                info!(audit_id = %audit_id, "audit completed");
                                tokio::time::sleep(self.config.completion_hold).await;
                                return Ok(report);
                            }
                            Err(error) if error.is_transient() => {
                                // The status already says completed; the next
                                // round retries the report fetch.
                                debug!(
                                    audit_id = %audit_id,
                                    error = %error,
                                    "report fetch hiccup, retrying"
                                );
                                backoff.record_transient_failure();
                            }
                            Err(error) => return Err(error),
                        }
                    } else if let Some(progress) = snapshot.progress {
                        estimator
                            .lock()
                            .await
                            .observe_backend(progress, started.elapsed());
                    }
                }
                Err(error) if error.is_transient() => {
                    // Invisible to the caller; the time baseline keeps the
                    // displayed progress moving through the outage.
                    backoff.record_transient_failure();
                    debug!(
                        audit_id = %audit_id,
                        error = %error,
                        delay_ms = backoff.delay().as_millis() as u64,
                        "transient poll failure"
                    );
                }
                Err(error) => return Err(error),
            }

            tokio::select! {
                () = cancellation_requested(cancel) => {
                    return Err(AppError::Cancelled(format!(
                        "audit {audit_id} monitoring cancelled"
                    )));
                }
                () = tokio::time::sleep(backoff.delay()) => {}
            }
        }
    }

    async fn fetch_report(
        &self,
        audit_id: &AuditId,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<AuditReport> {
        tokio::select! {
            () = cancellation_requested(cancel) => Err(AppError::Cancelled(format!(
                "audit {audit_id} monitoring cancelled"
            ))),
            report = self.gateway.fetch_report(audit_id) => report,
        }
    }
}

/// Resolves once cancellation is requested or the sender is gone.
async fn cancellation_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }

        if cancel.changed().await.is_err() {
            // Sender dropped: the owning scope is tearing down.
            return;
        }
    }
}

/// Eases the displayed value toward the target and publishes one frame per
/// interval until told to stop.
async fn frame_loop(
    estimator: Arc<Mutex<ProgressEstimator>>,
    sink: Arc<dyn ProgressSink>,
    started: Instant,
    frame_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = cancellation_requested(&mut stop) => return,
            () = tokio::time::sleep(frame_interval) => {
                let displayed = {
                    let mut estimator = estimator.lock().await;
                    estimator.ease_frame(started.elapsed())
                };
                sink.publish(displayed).await;
            }
        }
    }
}
