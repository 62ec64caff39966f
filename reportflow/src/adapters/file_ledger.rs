//! A ledger kept in one JSON file.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::ReportDate;
use crate::errors::LedgerError;
use crate::ports::{LedgerEntry, LedgerStore, PutOutcome};

type Entries = BTreeMap<ReportDate, LedgerEntry>;

/// Ledger entries keyed by date in a single JSON document.
///
/// Writes go to a sibling temp file that is renamed over the original, so
/// readers never see a partial document. The conditional write is atomic
/// within one process only; concurrent processes need a real store.
#[derive(Debug)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileLedgerStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, e: &std::io::Error) -> LedgerError {
        let detail = format!("{}: {e}", self.path.display());
        match e.kind() {
            IoErrorKind::TimedOut => LedgerError::Timeout(detail),
            _ => LedgerError::Unavailable(detail),
        }
    }

    async fn load(&self) -> Result<Entries, LedgerError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Entries::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| LedgerError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(self.unavailable(&e)),
        }
    }

    async fn save(&self, entries: &Entries) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(&e))?;
        }
        let body = serde_json::to_vec_pretty(entries)
            .map_err(|e| LedgerError::Unclassified(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.unavailable(&e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.unavailable(&e))?;
        debug!(path = %self.path.display(), entries = entries.len(), "Ledger saved");
        Ok(())
    }

    /// Every entry in the ledger, oldest date first.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }
}

#[async_trait]
impl LedgerStore for JsonFileLedgerStore {
    async fn get(&self, report_date: ReportDate) -> Result<Option<LedgerEntry>, LedgerError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(&report_date))
    }

    async fn put_if_absent(&self, entry: LedgerEntry) -> Result<PutOutcome, LedgerError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if let Some(existing) = entries.get(&entry.report_date) {
            return Ok(PutOutcome::Existing(existing.clone()));
        }
        entries.insert(entry.report_date, entry);
        self.save(&entries).await?;
        Ok(PutOutcome::Inserted)
    }

    async fn delete(&self, report_date: ReportDate) -> Result<bool, LedgerError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(&report_date).is_none() {
            return Ok(false);
        }
        self.save(&entries).await?;
        Ok(true)
    }
}
