//! Deadline-aware cancellation scope for a single invocation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::CancellationToken;
use crate::errors::ErrorKind;

/// Why a scope stopped work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The invocation deadline passed.
    DeadlineExceeded,
    /// The token was cancelled with this reason.
    Cancelled(String),
}

impl CancelReason {
    /// The outcome tag for this reason.
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self {
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineExceeded => write!(f, "invocation deadline exceeded"),
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
        }
    }
}

/// A cancellation token plus an optional hard deadline.
///
/// Cheap to clone; clones share the token.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: Arc<CancellationToken>,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// A scope that is never cancelled unless its token is.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares an existing token.
    #[must_use]
    pub fn with_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Sets an absolute deadline. The earlier of two deadlines is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets a deadline relative to now. A deadline past what the clock can
    /// represent is no deadline.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// The shared token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    #[must_use]
    pub fn check(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled(self.token.reason().unwrap_or_default()));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                CancelReason::Cancelled(self.token.reason().unwrap_or_default())
            }
            () = deadline => CancelReason::DeadlineExceeded,
        }
    }
}
