//! Cost data source port.

use async_trait::async_trait;

use crate::core::ReportDate;
use crate::errors::SourceError;
use crate::report::CostData;

/// Where the day's cost data comes from.
#[async_trait]
pub trait CostSource: Send + Sync {
    /// Fetches the cost data for one day.
    async fn fetch(&self, report_date: ReportDate) -> Result<CostData, SourceError>;
}
