//! Idempotency guard over the durable ledger.
//!
//! `claim` is advisory: it only reads. Two overlapping runs can both be told
//! to proceed and both deliver. `finalize` is the only safety net, and it
//! guarantees one ledger record per date, not one delivery.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core::ReportDate;
use crate::errors::LedgerError;
use crate::ports::{DeliveryReference, LedgerEntry, LedgerStore, PutOutcome};
use crate::utils::{Clock, SystemClock};

/// Result of consulting the ledger before work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// No completed entry; the run should do the work.
    Proceed,
    /// The date is already completed; the run must stop.
    AlreadyDone(LedgerEntry),
}

/// Result of recording completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// This call wrote the entry.
    Recorded(LedgerEntry),
    /// A concurrent run had already written one; it was left as is.
    AlreadyRecorded(LedgerEntry),
}

impl Finalized {
    /// The entry now stored for the date.
    #[must_use]
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Recorded(entry) | Self::AlreadyRecorded(entry) => entry,
        }
    }
}

/// Claims and finalizes one unit of work per report date.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard").finish_non_exhaustive()
    }
}

impl IdempotencyGuard {
    /// Creates a guard over a ledger store.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps completion entries from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Checks whether the date still needs work. Writes nothing.
    ///
    /// An unreachable store is an error; callers must not proceed without
    /// knowing the idempotency state.
    pub async fn claim(&self, report_date: ReportDate) -> Result<Claim, LedgerError> {
        match self.store.get(report_date).await? {
            Some(entry) if entry.is_completed() => {
                info!(
                    %report_date,
                    delivery_reference = %entry.delivery_reference,
                    "Report already completed"
                );
                Ok(Claim::AlreadyDone(entry))
            }
            _ => {
                info!(%report_date, "No completed entry, proceeding");
                Ok(Claim::Proceed)
            }
        }
    }

    /// Records completion with a minimal entry stamped by the guard's clock.
    pub async fn finalize(
        &self,
        report_date: ReportDate,
        delivery_reference: &DeliveryReference,
    ) -> Result<Finalized, LedgerError> {
        self.finalize_entry(LedgerEntry::completed(
            report_date,
            delivery_reference.as_str(),
            self.clock.now(),
        ))
        .await
    }

    /// Records a prepared completion entry.
    ///
    /// Losing the race to a concurrent run is not an error: the existing
    /// entry is kept and returned as `AlreadyRecorded`.
    pub async fn finalize_entry(&self, entry: LedgerEntry) -> Result<Finalized, LedgerError> {
        let report_date = entry.report_date;
        match self.store.put_if_absent(entry.clone()).await? {
            PutOutcome::Inserted => {
                info!(
                    %report_date,
                    delivery_reference = %entry.delivery_reference,
                    "Ledger entry recorded"
                );
                Ok(Finalized::Recorded(entry))
            }
            PutOutcome::Existing(existing) => {
                warn!(
                    %report_date,
                    ours = %entry.delivery_reference,
                    theirs = %existing.delivery_reference,
                    "Ledger entry already present; a concurrent run finalized first"
                );
                Ok(Finalized::AlreadyRecorded(existing))
            }
        }
    }

    /// Removes the entry so the date can be reprocessed. Operator action.
    pub async fn clear(&self, report_date: ReportDate) -> Result<bool, LedgerError> {
        let removed = self.store.delete(report_date).await?;
        if removed {
            warn!(%report_date, "Ledger entry cleared; date will be reprocessed");
        } else {
            info!(%report_date, "No ledger entry to clear");
        }
        Ok(removed)
    }

    /// Reads the entry for a date without any decision logic.
    pub async fn entry(&self, report_date: ReportDate) -> Result<Option<LedgerEntry>, LedgerError> {
        self.store.get(report_date).await
    }
}
