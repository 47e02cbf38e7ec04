use async_trait::async_trait;
use sitepulse_core::{AppResult, AuditId};
use sitepulse_domain::{AuditReport, StatusSnapshot};

/// Port for reading audit state from the backend.
///
/// Implementations map their transport failures onto the `AppError` retry
/// taxonomy; the monitor only looks at error categories, never at transport
/// details.
#[async_trait]
pub trait AuditGateway: Send + Sync {
    /// Fetches the current status snapshot for one audit.
    async fn fetch_status(&self, audit_id: &AuditId) -> AppResult<StatusSnapshot>;

    /// Fetches the full audit result, called once after completion.
    async fn fetch_report(&self, audit_id: &AuditId) -> AppResult<AuditReport>;
}

/// Port receiving each eased displayed-progress frame.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Publishes one displayed value in the 0-100 range.
    async fn publish(&self, displayed: f64);
}
