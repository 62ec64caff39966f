//! Liveness monitoring over the ledger.
//!
//! The pipeline can only report on runs that happen. A run that never
//! starts is detected here, from the outside: each report date is expected
//! to be completed within a window after its scheduled time.

use chrono::{Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::ReportflowConfig;
use crate::core::ReportDate;
use crate::errors::LedgerError;
use crate::ports::{LedgerEntry, LedgerStore};
use crate::utils::Timestamp;

/// Whether a report date was completed in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LivenessStatus {
    /// A completed entry exists.
    Healthy {
        /// The completed entry.
        entry: LedgerEntry,
    },
    /// No entry yet, but the window is still open.
    Pending {
        /// When the run was scheduled.
        expected_at: Timestamp,
        /// When a missing entry becomes an alert.
        alert_at: Timestamp,
    },
    /// The window closed without a completed entry.
    Missing {
        /// When the run was scheduled.
        expected_at: Timestamp,
        /// How long past the window we are.
        overdue_seconds: i64,
    },
}

impl LivenessStatus {
    /// Returns true if operators should be alerted.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// A liveness verdict for one report date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessCheck {
    /// The date checked.
    pub report_date: ReportDate,
    /// The verdict.
    #[serde(flatten)]
    pub status: LivenessStatus,
}

/// Checks that scheduled runs actually complete.
#[derive(Clone)]
pub struct LivenessMonitor {
    store: Arc<dyn LedgerStore>,
    schedule_time: NaiveTime,
    window: Duration,
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("schedule_time", &self.schedule_time)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl LivenessMonitor {
    /// Creates a monitor for runs scheduled at `schedule_hour_utc`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, schedule_hour_utc: u32, window_hours: u32) -> Self {
        Self {
            store,
            schedule_time: NaiveTime::from_hms_opt(schedule_hour_utc.min(23), 0, 0)
                .unwrap_or(NaiveTime::MIN),
            window: Duration::hours(i64::from(window_hours)),
        }
    }

    /// Creates a monitor from the pipeline configuration.
    #[must_use]
    pub fn from_config(store: Arc<dyn LedgerStore>, config: &ReportflowConfig) -> Self {
        Self::new(store, config.schedule_hour_utc, config.liveness_window_hours)
    }

    /// When the run for `report_date` is scheduled: the next day, in UTC.
    #[must_use]
    pub fn expected_run_at(&self, report_date: ReportDate) -> Timestamp {
        Utc.from_utc_datetime(&report_date.next_day().as_naive().and_time(self.schedule_time))
    }

    /// The most recent date whose run is already due at `now`.
    #[must_use]
    pub fn latest_due_date(&self, now: Timestamp) -> ReportDate {
        let yesterday = ReportDate::yesterday_of(now);
        if self.expected_run_at(yesterday) <= now {
            yesterday
        } else {
            yesterday.previous_day()
        }
    }

    /// Checks one date.
    pub async fn check(
        &self,
        report_date: ReportDate,
        now: Timestamp,
    ) -> Result<LivenessStatus, LedgerError> {
        if let Some(entry) = self.store.get(report_date).await? {
            if entry.is_completed() {
                return Ok(LivenessStatus::Healthy { entry });
            }
        }

        let expected_at = self.expected_run_at(report_date);
        let alert_at = expected_at + self.window;
        if now < alert_at {
            debug!(%report_date, %alert_at, "Report not completed yet, window still open");
            return Ok(LivenessStatus::Pending {
                expected_at,
                alert_at,
            });
        }

        let overdue_seconds = (now - alert_at).num_seconds();
        error!(%report_date, %expected_at, overdue_seconds, "Report run missing");
        Ok(LivenessStatus::Missing {
            expected_at,
            overdue_seconds,
        })
    }

    /// Checks the dates whose windows matter at `now`.
    ///
    /// A date is only reported missing once its window has closed, by which
    /// time the following date is already due. Both are examined, and the
    /// older one wins if it is missing.
    pub async fn check_latest(&self, now: Timestamp) -> Result<LivenessCheck, LedgerError> {
        let latest = self.latest_due_date(now);
        let previous = latest.previous_day();

        let status = self.check(previous, now).await?;
        if status.is_alert() {
            return Ok(LivenessCheck {
                report_date: previous,
                status,
            });
        }

        Ok(LivenessCheck {
            report_date: latest,
            status: self.check(latest, now).await?,
        })
    }
}
