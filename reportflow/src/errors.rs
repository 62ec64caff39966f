//! Error types for the reportflow job.
//!
//! Every remote collaborator has its own closed error enum. Each enum knows
//! whether a failure is worth retrying through [`Classify`], so the retry
//! engine never has to inspect messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::JobState;

/// Whether a failure may go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient: rate limiting, timeouts, temporary unavailability.
    Retryable,
    /// Permanent: authorization, malformed input, programming defects.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// The `error_kind` tag carried by outcome events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The collaborator asked us to slow down.
    RateLimited,
    /// The call did not answer in time.
    Timeout,
    /// The collaborator could not be reached.
    Unavailable,
    /// Credentials were missing or refused.
    Unauthorized,
    /// The collaborator refused the shape of the request.
    MalformedRequest,
    /// The delivery channel rejected the report.
    Rejected,
    /// The report could not be composed from the fetched data.
    ComposeFailed,
    /// The ledger could not be consulted before work started.
    LedgerUnavailable,
    /// The report was delivered but its completion could not be recorded.
    FinalizeRaceResidual,
    /// The invocation deadline expired.
    DeadlineExceeded,
    /// The invocation was cancelled.
    Cancelled,
    /// Anything the collaborator could not tag.
    Unclassified,
}

impl ErrorKind {
    /// Returns the snake_case tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Unauthorized => "unauthorized",
            Self::MalformedRequest => "malformed_request",
            Self::Rejected => "rejected",
            Self::ComposeFailed => "compose_failed",
            Self::LedgerUnavailable => "ledger_unavailable",
            Self::FinalizeRaceResidual => "finalize_race_residual",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error onto the retry taxonomy.
pub trait Classify {
    /// Whether the failure should be retried.
    fn class(&self) -> ErrorClass;

    /// The tag reported in outcome events.
    fn kind(&self) -> ErrorKind;

    /// Shorthand for `self.class() == ErrorClass::Retryable`.
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Failures of the cost data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Throttled by the source.
    #[error("cost source rate limited: {0}")]
    RateLimited(String),

    /// The request timed out.
    #[error("cost source timed out: {0}")]
    Timeout(String),

    /// The source could not be reached or has no data yet.
    #[error("cost source unavailable: {0}")]
    Unavailable(String),

    /// Access was denied.
    #[error("cost source refused credentials: {0}")]
    Unauthorized(String),

    /// The source rejected the query.
    #[error("cost source rejected request: {0}")]
    MalformedRequest(String),

    /// An untagged failure.
    #[error("cost source failed: {0}")]
    Unclassified(String),
}

impl Classify for SourceError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_) => ErrorClass::Retryable,
            Self::Unauthorized(_) | Self::MalformedRequest(_) | Self::Unclassified(_) => {
                ErrorClass::Fatal
            }
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }
}

/// Failures of the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Throttled by the channel.
    #[error("delivery throttled: {0}")]
    Throttled(String),

    /// The channel has temporarily paused sending.
    #[error("delivery sending paused: {0}")]
    SendingPaused(String),

    /// The send timed out.
    #[error("delivery timed out: {0}")]
    Timeout(String),

    /// The channel could not be reached.
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),

    /// Access was denied.
    #[error("delivery refused credentials: {0}")]
    Unauthorized(String),

    /// The channel rejected the message itself.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// An untagged failure.
    #[error("delivery failed: {0}")]
    Unclassified(String),
}

impl Classify for DeliveryError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Throttled(_)
            | Self::SendingPaused(_)
            | Self::Timeout(_)
            | Self::Unavailable(_) => ErrorClass::Retryable,
            Self::Unauthorized(_) | Self::Rejected(_) | Self::Unclassified(_) => ErrorClass::Fatal,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Throttled(_) | Self::SendingPaused(_) => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }
}

/// Failures of the durable ledger store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The store could not be reached.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time.
    #[error("ledger store timed out: {0}")]
    Timeout(String),

    /// Stored data could not be decoded.
    #[error("ledger store is corrupt: {0}")]
    Corrupt(String),

    /// An untagged failure.
    #[error("ledger store failed: {0}")]
    Unclassified(String),
}

impl Classify for LedgerError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => ErrorClass::Retryable,
            Self::Corrupt(_) | Self::Unclassified(_) => ErrorClass::Fatal,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => ErrorKind::LedgerUnavailable,
            Self::Corrupt(_) | Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }
}

/// Failures of the local compose step. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComposeError {
    /// A cost amount was NaN or infinite.
    #[error("non-finite amount {amount} for '{item}'")]
    NonFiniteAmount {
        /// The service name, or `total`.
        item: String,
        /// The offending value.
        amount: f64,
    },

    /// The data source answered for a different day.
    #[error("cost data covers {actual}, expected {expected}")]
    PeriodMismatch {
        /// The report date being composed.
        expected: String,
        /// The period the data claims to cover.
        actual: String,
    },
}

impl Classify for ComposeError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::ComposeFailed
    }
}

/// Failures of the outcome event sink. Never propagated past the reporter.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the event failed.
    #[error("event sink io error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be encoded.
    #[error("event sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink refused the event.
    #[error("event sink rejected event: {0}")]
    Rejected(String),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable held a value that could not be used.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// The variable or field name.
        var: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file was not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A state machine transition that the job does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job state transition {from} -> {to}")]
pub struct InvalidTransition {
    /// The current state.
    pub from: JobState,
    /// The rejected target state.
    pub to: JobState,
}

/// Errors raised while assembling a pipeline.
///
/// Collaborator failures during a run never surface here; they are
/// classified and reported through the run's outcome event.
#[derive(Debug, Error)]
pub enum ReportflowError {
    /// Configuration failed validation.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A required component was not supplied to a builder.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_classification() {
        assert!(SourceError::RateLimited("Throttling".into()).is_retryable());
        assert!(SourceError::Timeout("read".into()).is_retryable());
        assert!(SourceError::Unavailable("503".into()).is_retryable());
        assert_eq!(
            SourceError::Unauthorized("AccessDenied".into()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            SourceError::MalformedRequest("bad range".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_unclassified_errors_are_fatal() {
        assert_eq!(SourceError::Unclassified("?".into()).class(), ErrorClass::Fatal);
        assert_eq!(DeliveryError::Unclassified("?".into()).class(), ErrorClass::Fatal);
        assert_eq!(LedgerError::Unclassified("?".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_delivery_error_classification() {
        assert!(DeliveryError::Throttled("x".into()).is_retryable());
        assert!(DeliveryError::SendingPaused("x".into()).is_retryable());
        assert_eq!(
            DeliveryError::SendingPaused("x".into()).kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(DeliveryError::Rejected("x".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_ledger_error_kind() {
        assert_eq!(
            LedgerError::Timeout("x".into()).kind(),
            ErrorKind::LedgerUnavailable
        );
        assert_eq!(LedgerError::Corrupt("x".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_compose_error_always_fatal() {
        let err = ComposeError::NonFiniteAmount {
            item: "total".into(),
            amount: f64::NAN,
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(err.kind(), ErrorKind::ComposeFailed);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::FinalizeRaceResidual).unwrap();
        assert_eq!(json, "\"finalize_race_residual\"");
        assert_eq!(ErrorKind::MalformedRequest.to_string(), "malformed_request");
    }

    #[test]
    fn test_builder_errors_display() {
        assert_eq!(
            ReportflowError::MissingComponent("ledger").to_string(),
            "missing component: ledger"
        );
        let err: ReportflowError = ConfigError::Invalid {
            var: "max_attempts".into(),
            reason: "must be at least 1".into(),
        }
        .into();
        assert!(matches!(err, ReportflowError::Config(_)));
    }
}
