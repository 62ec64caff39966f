//! Cost data from `<dir>/<YYYY-MM-DD>.json`.

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::ReportDate;
use crate::errors::SourceError;
use crate::ports::CostSource;
use crate::report::CostData;

/// Reads one JSON file per day from a directory.
///
/// A missing file is treated as data that is not available yet, so the
/// retry engine keeps polling for it.
#[derive(Debug, Clone)]
pub struct FileCostSource {
    dir: PathBuf,
}

impl FileCostSource {
    /// Creates a source over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The file holding a day's data.
    #[must_use]
    pub fn path_for(&self, report_date: ReportDate) -> PathBuf {
        self.dir.join(format!("{report_date}.json"))
    }

    /// The directory being read.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CostSource for FileCostSource {
    async fn fetch(&self, report_date: ReportDate) -> Result<CostData, SourceError> {
        let path = self.path_for(report_date);
        debug!(path = %path.display(), "Reading cost data");

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            let detail = format!("{}: {e}", path.display());
            match e.kind() {
                IoErrorKind::NotFound => SourceError::Unavailable(detail),
                IoErrorKind::PermissionDenied => SourceError::Unauthorized(detail),
                IoErrorKind::TimedOut => SourceError::Timeout(detail),
                _ => SourceError::Unclassified(detail),
            }
        })?;

        serde_json::from_str(&raw)
            .map_err(|e| SourceError::Unclassified(format!("{}: {e}", path.display())))
    }
}
