//! Report delivery port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::ReportDate;
use crate::errors::DeliveryError;
use crate::report::ComposedReport;

/// Opaque handle returned by the delivery channel (a message id, a path, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryReference(String);

impl DeliveryReference {
    /// Wraps a channel-specific reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The raw reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where composed reports go.
#[async_trait]
pub trait ReportDelivery: Send + Sync {
    /// Sends the report and returns the channel's reference for it.
    async fn deliver(
        &self,
        report_date: ReportDate,
        report: &ComposedReport,
    ) -> Result<DeliveryReference, DeliveryError>;
}
