//! Cost data as returned by the data source.

use serde::{Deserialize, Serialize};

use crate::core::ReportDate;

/// Spend attributed to one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    /// Service name as reported by the source.
    pub name: String,
    /// Amount in dollars.
    pub amount: f64,
}

impl ServiceCost {
    /// Creates a new service cost line.
    #[must_use]
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// One day of cost data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostData {
    /// The day the data covers.
    pub period: ReportDate,
    /// Total spend. `None` when the source had no data for the day.
    #[serde(default)]
    pub total: Option<f64>,
    /// Per-service breakdown.
    #[serde(default)]
    pub services: Vec<ServiceCost>,
}

impl CostData {
    /// Cost data with a total and no breakdown yet.
    #[must_use]
    pub fn new(period: ReportDate, total: f64) -> Self {
        Self {
            period,
            total: Some(total),
            services: Vec::new(),
        }
    }

    /// The source answered but had nothing for the day.
    #[must_use]
    pub fn empty(period: ReportDate) -> Self {
        Self {
            period,
            total: None,
            services: Vec::new(),
        }
    }

    /// Adds a service line.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.services.push(ServiceCost::new(name, amount));
        self
    }

    /// Returns true if the source reported a total.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.total.is_some()
    }
}
