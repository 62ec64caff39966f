//! Durable ledger port and the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{ReportDate, TriggerType};
use crate::errors::LedgerError;

/// Persisted status of a ledger entry. Absence of an entry means not done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// The report was delivered and recorded.
    #[default]
    Completed,
}

/// Proof that a report date's work is done.
///
/// Written once by a successful run and never mutated afterwards. Only an
/// explicit `clear` removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The date this entry closes.
    pub report_date: ReportDate,
    /// Always `completed` for stored entries.
    #[serde(default)]
    pub status: LedgerStatus,
    /// When the run finalized.
    pub completed_at: DateTime<Utc>,
    /// Reference returned by the delivery channel.
    pub delivery_reference: String,
    /// Remote attempts made by the run that finalized.
    pub attempt_count: u32,
    /// Who triggered the finalizing run.
    #[serde(default)]
    pub trigger: TriggerType,
    /// Hex SHA-256 of the delivered report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_digest: Option<String>,
}

impl LedgerEntry {
    /// A completed entry.
    #[must_use]
    pub fn completed(
        report_date: ReportDate,
        delivery_reference: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            report_date,
            status: LedgerStatus::Completed,
            completed_at,
            delivery_reference: delivery_reference.into(),
            attempt_count: 0,
            trigger: TriggerType::Scheduled,
            report_digest: None,
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub const fn with_attempt_count(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    /// Sets the trigger.
    #[must_use]
    pub const fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger = trigger;
        self
    }

    /// Sets the report digest.
    #[must_use]
    pub fn with_report_digest(mut self, digest: impl Into<String>) -> Self {
        self.report_digest = Some(digest.into());
        self
    }

    /// Returns true for completed entries.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == LedgerStatus::Completed
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was written.
    Inserted,
    /// An entry already existed and was left untouched.
    Existing(LedgerEntry),
}

/// Protocol for the durable ledger backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reads the entry for a date.
    async fn get(&self, report_date: ReportDate) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Writes the entry only if none exists for its date. Must be atomic.
    async fn put_if_absent(&self, entry: LedgerEntry) -> Result<PutOutcome, LedgerError>;

    /// Removes the entry for a date. Returns whether one existed.
    async fn delete(&self, report_date: ReportDate) -> Result<bool, LedgerError>;
}

/// In-memory ledger store.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: Mutex<HashMap<ReportDate, LedgerEntry>>,
}

impl InMemoryLedgerStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, report_date: ReportDate) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.entries.lock().get(&report_date).cloned())
    }

    async fn put_if_absent(&self, entry: LedgerEntry) -> Result<PutOutcome, LedgerError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&entry.report_date) {
            return Ok(PutOutcome::Existing(existing.clone()));
        }
        entries.insert(entry.report_date, entry);
        Ok(PutOutcome::Inserted)
    }

    async fn delete(&self, report_date: ReportDate) -> Result<bool, LedgerError> {
        Ok(self.entries.lock().remove(&report_date).is_some())
    }
}
