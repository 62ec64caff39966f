//! Delivery into a local outbox directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::core::ReportDate;
use crate::errors::DeliveryError;
use crate::ports::{DeliveryReference, ReportDelivery};
use crate::report::ComposedReport;

/// What lands in the outbox for each delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// The message identifier, also the delivery reference.
    pub message_id: String,
    /// The day the report covers.
    pub report_date: ReportDate,
    /// The composed report.
    pub report: ComposedReport,
}

/// Writes each report as `<dir>/<date>-<message_id>.json`.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    /// Creates an outbox over `dir`. The directory is created on first send.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The outbox directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> DeliveryError {
    let detail = format!("{}: {e}", path.display());
    match e.kind() {
        IoErrorKind::PermissionDenied => DeliveryError::Unauthorized(detail),
        IoErrorKind::TimedOut => DeliveryError::Timeout(detail),
        _ => DeliveryError::Unavailable(detail),
    }
}

#[async_trait]
impl ReportDelivery for OutboxDelivery {
    async fn deliver(
        &self,
        report_date: ReportDate,
        report: &ComposedReport,
    ) -> Result<DeliveryReference, DeliveryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, &e))?;

        let message = OutboxMessage {
            message_id: Uuid::new_v4().to_string(),
            report_date,
            report: report.clone(),
        };
        let body = serde_json::to_vec_pretty(&message)
            .map_err(|e| DeliveryError::Unclassified(e.to_string()))?;
        let path = self
            .dir
            .join(format!("{report_date}-{}.json", message.message_id));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| io_error(&path, &e))?;

        info!(path = %path.display(), message_id = %message.message_id, "Report written to outbox");
        Ok(DeliveryReference::new(message.message_id))
    }
}
