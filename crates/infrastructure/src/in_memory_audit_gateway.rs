use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sitepulse_application::AuditGateway;
use sitepulse_core::{AppError, AppResult, AuditId};
use sitepulse_domain::{
    AuditCategory, AuditReport, AuditReportInput, AuditState, CategoryScores, StatusSnapshot,
    expected_audit_duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Simulated audit backend finishing on a fixed schedule.
///
/// Serves the same port as the HTTP gateway, which makes offline demo runs
/// and integration-style tests possible without a backend. Progress is
/// reported in coarse steps the way a real crawl pipeline does, so the
/// monitor's blending path gets exercised rather than fed a smooth ramp.
pub struct InMemoryAuditGateway {
    audit_id: AuditId,
    target_url: String,
    categories: Vec<AuditCategory>,
    runtime: Duration,
    started_at: Instant,
}

impl InMemoryAuditGateway {
    /// Creates a simulated audit that starts now and runs a bit faster than
    /// the category-derived expectation.
    #[must_use]
    pub fn new(
        audit_id: AuditId,
        target_url: impl Into<String>,
        categories: Vec<AuditCategory>,
    ) -> Self {
        let categories = if categories.is_empty() {
            AuditCategory::ALL.to_vec()
        } else {
            categories
        };
        let runtime = expected_audit_duration(&categories).mul_f64(0.75);

        Self {
            audit_id,
            target_url: target_url.into(),
            categories,
            runtime,
            started_at: Instant::now(),
        }
    }

    /// Overrides the simulated runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    fn check_audit_id(&self, audit_id: &AuditId) -> AppResult<()> {
        if audit_id == &self.audit_id {
            return Ok(());
        }

        Err(AppError::NotFound(format!(
            "no simulated audit with id '{audit_id}'"
        )))
    }

    fn is_finished(&self) -> bool {
        self.started_at.elapsed() >= self.runtime
    }

    fn scores(&self) -> AppResult<CategoryScores> {
        let map = self
            .categories
            .iter()
            .map(|category| {
                let score = match category {
                    AuditCategory::Performance => 78.0,
                    AuditCategory::Seo => 92.0,
                    AuditCategory::Accessibility => 88.0,
                    AuditCategory::Security => 85.0,
                };
                (*category, score)
            })
            .collect();

        CategoryScores::new(map)
    }
}

#[async_trait]
impl AuditGateway for InMemoryAuditGateway {
    async fn fetch_status(&self, audit_id: &AuditId) -> AppResult<StatusSnapshot> {
        self.check_audit_id(audit_id)?;

        if self.is_finished() {
            return Ok(StatusSnapshot {
                state: AuditState::Completed,
                progress: Some(100.0),
                scores: Some(self.scores()?),
            });
        }

        let ratio = self.started_at.elapsed().as_secs_f64() / self.runtime.as_secs_f64();
        // Coarse 10-point steps, like a pipeline reporting per-stage progress.
        let coarse = (ratio * 100.0 / 10.0).floor() * 10.0;
        let progress = coarse.clamp(0.0, 90.0);
        debug!(audit_id = %audit_id, progress, "simulated audit polled");

        Ok(StatusSnapshot {
            state: AuditState::Running,
            progress: Some(progress),
            scores: None,
        })
    }

    async fn fetch_report(&self, audit_id: &AuditId) -> AppResult<AuditReport> {
        self.check_audit_id(audit_id)?;

        if !self.is_finished() {
            return Err(AppError::NotFound(format!(
                "simulated audit '{audit_id}' has not completed yet"
            )));
        }

        AuditReport::new(AuditReportInput {
            audit_id: self.audit_id.clone(),
            target_url: self.target_url.clone(),
            categories: self.categories.clone(),
            scores: self.scores()?,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sitepulse_application::AuditGateway;
    use sitepulse_core::{AppError, AuditId};
    use sitepulse_domain::{AuditCategory, AuditState};

    use super::InMemoryAuditGateway;

    fn audit_id() -> AuditId {
        AuditId::new("aud_sim").unwrap_or_else(|_| unreachable!())
    }

    fn gateway() -> InMemoryAuditGateway {
        InMemoryAuditGateway::new(
            audit_id(),
            "https://example.com",
            vec![AuditCategory::Performance],
        )
        .with_runtime(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn reports_coarse_progress_while_running() {
        let gateway = gateway();

        tokio::time::advance(Duration::from_secs(8)).await;
        let snapshot = gateway.fetch_status(&audit_id()).await;
        assert!(snapshot.is_ok());

        let snapshot = snapshot.unwrap_or_else(|_| unreachable!());
        assert_eq!(snapshot.state, AuditState::Running);
        // 8s of 30s is 26%, reported as the 20 step.
        assert_eq!(snapshot.progress, Some(20.0));
        assert!(snapshot.scores.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_scores_after_the_runtime() {
        let gateway = gateway();

        tokio::time::advance(Duration::from_secs(31)).await;
        let snapshot = gateway.fetch_status(&audit_id()).await;
        assert!(snapshot.is_ok());
        assert!(snapshot.unwrap_or_else(|_| unreachable!()).is_complete());

        let report = gateway.fetch_report(&audit_id()).await;
        assert!(report.is_ok());

        let report = report.unwrap_or_else(|_| unreachable!());
        assert_eq!(report.scores().get(AuditCategory::Performance), Some(78.0));
        assert_eq!(report.categories(), &[AuditCategory::Performance]);
    }

    #[tokio::test(start_paused = true)]
    async fn report_is_unavailable_before_completion() {
        let gateway = gateway();

        tokio::time::advance(Duration::from_secs(5)).await;
        let report = gateway.fetch_report(&audit_id()).await;
        assert!(matches!(report, Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_audit_ids_are_rejected() {
        let gateway = gateway();
        let other = AuditId::new("aud_other").unwrap_or_else(|_| unreachable!());

        let status = gateway.fetch_status(&other).await;
        assert!(matches!(status, Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_category_selection_simulates_a_full_audit() {
        let gateway = InMemoryAuditGateway::new(audit_id(), "https://example.com", Vec::new())
            .with_runtime(Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = gateway.fetch_report(&audit_id()).await;
        assert!(report.is_ok());
        assert_eq!(
            report.unwrap_or_else(|_| unreachable!()).categories().len(),
            4
        );
    }
}
