use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, header};
use serde::Deserialize;
use sitepulse_application::AuditGateway;
use sitepulse_core::{AppError, AppResult, AuditId};
use sitepulse_domain::{
    AuditCategory, AuditReport, AuditReportInput, AuditState, CategoryScores, StatusSnapshot,
};
use url::Url;

/// HTTP implementation of the audit gateway.
///
/// Speaks the backend's REST surface: `GET /web-audit/{id}/status` while the
/// audit runs and `GET /web-audit/{id}` once for the full result. Failures
/// are mapped onto the `AppError` retry taxonomy so the monitor never sees
/// transport details.
pub struct HttpAuditGateway {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: AuditState,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    scores: Option<BTreeMap<AuditCategory, f64>>,
}

impl StatusPayload {
    fn try_into_snapshot(self) -> AppResult<StatusSnapshot> {
        let scores = self.scores.map(CategoryScores::new).transpose()?;

        Ok(StatusSnapshot {
            state: self.status,
            progress: self.progress,
            scores,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReportPayload {
    id: String,
    url: String,
    #[serde(default)]
    categories: Vec<AuditCategory>,
    scores: BTreeMap<AuditCategory, f64>,
    finished_at: DateTime<Utc>,
}

impl ReportPayload {
    fn try_into_report(self) -> AppResult<AuditReport> {
        AuditReport::new(AuditReportInput {
            audit_id: AuditId::new(self.id)?,
            target_url: self.url,
            categories: self.categories,
            scores: CategoryScores::new(self.scores)?,
            finished_at: self.finished_at,
        })
    }
}

impl HttpAuditGateway {
    /// Creates a gateway against the given API base URL.
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        api_token: Option<String>,
    ) -> AppResult<Self> {
        let parsed = Url::parse(base_url).map_err(|error| {
            AppError::Validation(format!("invalid API base URL '{base_url}': {error}"))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "API base URL '{base_url}' must use http or https"
            )));
        }

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_token,
        })
    }

    async fn get_json<T>(&self, endpoint: String, context: &str) -> AppResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut request = self.http_client.get(endpoint);
        if let Some(token) = &self.api_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|error| {
            AppError::Unavailable(format!("failed to call {context}: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, context));
        }

        response.json::<T>().await.map_err(|error| {
            AppError::Internal(format!("failed to parse {context} response body: {error}"))
        })
    }
}

#[async_trait]
impl AuditGateway for HttpAuditGateway {
    async fn fetch_status(&self, audit_id: &AuditId) -> AppResult<StatusSnapshot> {
        let endpoint = format!("{}/web-audit/{audit_id}/status", self.base_url);
        let envelope = self
            .get_json::<ApiEnvelope<StatusPayload>>(endpoint, "audit status endpoint")
            .await?;

        envelope.data.try_into_snapshot()
    }

    async fn fetch_report(&self, audit_id: &AuditId) -> AppResult<AuditReport> {
        let endpoint = format!("{}/web-audit/{audit_id}", self.base_url);
        let envelope = self
            .get_json::<ApiEnvelope<ReportPayload>>(endpoint, "audit result endpoint")
            .await?;

        envelope.data.try_into_report()
    }
}

/// Maps a non-success HTTP status onto the retry taxonomy.
///
/// 429 means back off; 401/403 usually mean a token refresh is in flight and
/// 5xx a server hiccup, so all three retry silently. Anything else is a
/// contract problem and fails the watch.
fn classify_status(status: StatusCode, context: &str) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AppError::RateLimited(format!("{context} returned status 429"));
    }

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status.is_server_error()
    {
        return AppError::Unavailable(format!(
            "{context} returned status {}",
            status.as_u16()
        ));
    }

    if status == StatusCode::NOT_FOUND {
        return AppError::NotFound(format!("{context} returned status 404"));
    }

    AppError::Internal(format!(
        "{context} returned unexpected status {}",
        status.as_u16()
    ))
}
