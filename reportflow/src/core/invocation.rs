//! What the external scheduler hands the job when it wakes it up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::ReportDate;

/// Who triggered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// The daily schedule.
    #[default]
    Scheduled,
    /// An operator replay.
    Manual,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A wake-up from the scheduler.
///
/// Every field is optional on the wire; an empty JSON object is a plain
/// scheduled run for UTC yesterday.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Invocation {
    /// Who triggered the run.
    pub trigger_type: TriggerType,
    /// Explicit date to process instead of UTC yesterday.
    pub report_date: Option<ReportDate>,
    /// Hard deadline for the whole run, overriding configuration.
    pub timeout_seconds: Option<f64>,
}

impl Invocation {
    /// A scheduled run for UTC yesterday.
    #[must_use]
    pub fn scheduled() -> Self {
        Self::default()
    }

    /// A manual replay of a specific date.
    #[must_use]
    pub fn manual(report_date: ReportDate) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            report_date: Some(report_date),
            timeout_seconds: None,
        }
    }

    /// Sets the report date override.
    #[must_use]
    pub fn with_report_date(mut self, report_date: ReportDate) -> Self {
        self.report_date = Some(report_date);
        self
    }

    /// Sets the invocation deadline.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// The date this invocation works on.
    #[must_use]
    pub fn resolve_report_date(&self, now: DateTime<Utc>) -> ReportDate {
        self.report_date
            .unwrap_or_else(|| ReportDate::yesterday_of(now))
    }

    /// The invocation deadline, if a positive one that fits a `Duration` was given.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Parses a scheduler event payload.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
