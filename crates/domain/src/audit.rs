use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitepulse_core::{AppError, AppResult, AuditId};

/// Fixed per-audit overhead independent of the selected categories.
const AUDIT_BASE_SECONDS: u64 = 20;

/// Analysis category a website audit can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Page-speed and rendering checks.
    Performance,
    /// Search-engine optimization checks.
    Seo,
    /// Accessibility checks.
    Accessibility,
    /// TLS, header and content-security checks.
    Security,
}

impl AuditCategory {
    /// All categories, in canonical order.
    pub const ALL: [Self; 4] = [
        Self::Performance,
        Self::Seo,
        Self::Accessibility,
        Self::Security,
    ];

    /// Returns the stable category identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Seo => "seo",
            Self::Accessibility => "accessibility",
            Self::Security => "security",
        }
    }

    /// Parses a stable category identifier.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "performance" => Ok(Self::Performance),
            "seo" => Ok(Self::Seo),
            "accessibility" => Ok(Self::Accessibility),
            "security" => Ok(Self::Security),
            other => Err(AppError::Validation(format!(
                "unknown audit category '{other}'"
            ))),
        }
    }

    fn duration_weight(self) -> Duration {
        // Crawl-heavy categories dominate audit runtime.
        match self {
            Self::Performance | Self::Security => Duration::from_secs(25),
            Self::Seo | Self::Accessibility => Duration::from_secs(15),
        }
    }
}

/// Estimates how long an audit with the given categories usually takes.
///
/// An empty selection means a full audit over every category. Duplicates do
/// not inflate the estimate. The value seeds the progress estimator's
/// time-based baseline and is deliberately rough; the backend's reported
/// progress refines it while polling.
#[must_use]
pub fn expected_audit_duration(categories: &[AuditCategory]) -> Duration {
    let selected: BTreeSet<AuditCategory> = if categories.is_empty() {
        AuditCategory::ALL.into_iter().collect()
    } else {
        categories.iter().copied().collect()
    };

    selected.into_iter().fold(
        Duration::from_secs(AUDIT_BASE_SECONDS),
        |total, category| total + category.duration_weight(),
    )
}

/// Backend-reported lifecycle state of an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditState {
    /// The audit is still being processed.
    Running,
    /// The audit finished and results are being assembled.
    Completed,
    /// The audit failed on the backend.
    Failed,
}

impl AuditState {
    /// Returns the stable state identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Per-category audit scores on a 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryScores(BTreeMap<AuditCategory, f64>);

impl CategoryScores {
    /// Creates a validated score set.
    pub fn new(scores: BTreeMap<AuditCategory, f64>) -> AppResult<Self> {
        for (category, score) in &scores {
            if !score.is_finite() || !(0.0..=100.0).contains(score) {
                return Err(AppError::Validation(format!(
                    "score for category '{}' must be within 0-100, got {score}",
                    category.as_str()
                )));
            }
        }

        Ok(Self(scores))
    }

    /// Returns the score for one category when present.
    #[must_use]
    pub fn get(&self, category: AuditCategory) -> Option<f64> {
        self.0.get(&category).copied()
    }

    /// Returns whether no category has a score yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates scores in canonical category order.
    pub fn iter(&self) -> impl Iterator<Item = (AuditCategory, f64)> + '_ {
        self.0.iter().map(|(category, score)| (*category, *score))
    }

    /// Returns the unweighted mean across scored categories.
    #[must_use]
    pub fn overall(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }

        let sum: f64 = self.0.values().sum();
        Some(sum / self.0.len() as f64)
    }
}

/// One observation from the audit status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Lifecycle state reported by the backend.
    pub state: AuditState,
    /// Backend completion percentage when available.
    pub progress: Option<f64>,
    /// Per-category scores, present once the audit has fully completed.
    pub scores: Option<CategoryScores>,
}

impl StatusSnapshot {
    /// Returns whether the audit is done and its results are ready.
    ///
    /// A `completed` state without scores means the backend is still
    /// assembling results; callers keep polling until both are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == AuditState::Completed && self.scores.is_some()
    }

    /// Returns whether the audit reached the terminal failed state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == AuditState::Failed
    }
}

/// Full audit result fetched once after completion.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    audit_id: AuditId,
    target_url: String,
    categories: Vec<AuditCategory>,
    scores: CategoryScores,
    finished_at: DateTime<Utc>,
}

/// Input payload used to construct a validated audit report.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReportInput {
    /// Backend-issued audit identifier.
    pub audit_id: AuditId,
    /// URL the audit ran against.
    pub target_url: String,
    /// Categories the audit covered.
    pub categories: Vec<AuditCategory>,
    /// Final per-category scores.
    pub scores: CategoryScores,
    /// Backend-reported completion timestamp.
    pub finished_at: DateTime<Utc>,
}

impl AuditReport {
    /// Creates a validated audit report.
    pub fn new(input: AuditReportInput) -> AppResult<Self> {
        let AuditReportInput {
            audit_id,
            target_url,
            categories,
            scores,
            finished_at,
        } = input;

        if target_url.trim().is_empty() {
            return Err(AppError::Validation(
                "audit report target_url must not be empty".to_owned(),
            ));
        }

        if scores.is_empty() {
            return Err(AppError::Validation(
                "audit report requires at least one category score".to_owned(),
            ));
        }

        Ok(Self {
            audit_id,
            target_url,
            categories,
            scores,
            finished_at,
        })
    }

    /// Returns the backend-issued audit identifier.
    #[must_use]
    pub fn audit_id(&self) -> &AuditId {
        &self.audit_id
    }

    /// Returns the audited URL.
    #[must_use]
    pub fn target_url(&self) -> &str {
        self.target_url.as_str()
    }

    /// Returns the categories the audit covered.
    #[must_use]
    pub fn categories(&self) -> &[AuditCategory] {
        self.categories.as_slice()
    }

    /// Returns the final per-category scores.
    #[must_use]
    pub fn scores(&self) -> &CategoryScores {
        &self.scores
    }

    /// Returns the backend-reported completion timestamp.
    #[must_use]
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}
