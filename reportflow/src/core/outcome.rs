//! Outcome events and the summary returned to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::{JobState, ReportDate, Step, TriggerType};
use crate::errors::ErrorKind;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    /// The date was already completed by an earlier run.
    AlreadyDone,
    /// The report was delivered and recorded.
    Success,
    /// Transient failures outlasted the retry budget or the deadline.
    RetryableExhausted,
    /// A permanent failure stopped the run.
    FatalError,
}

impl OutcomeResult {
    /// Returns true for results operators must be alerted about.
    #[must_use]
    pub const fn is_alert(self) -> bool {
        matches!(self, Self::RetryableExhausted | Self::FatalError)
    }

    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyDone => "already_done",
            Self::Success => "success",
            Self::RetryableExhausted => "retryable_exhausted",
            Self::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single structured record emitted when a run ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    /// The run this event closes.
    pub run_id: Uuid,
    /// The date the run worked on.
    pub report_date: ReportDate,
    /// Who triggered the run.
    pub trigger: TriggerType,
    /// How the run ended.
    pub result: OutcomeResult,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
    /// The step that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    /// The failure tag, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// The last error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Remote attempts made per step.
    pub attempts_by_step: BTreeMap<String, u32>,
    /// Reference returned by the delivery channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_reference: Option<String>,
    /// The terminal state the run reached.
    pub final_state: JobState,
    /// True when the run ended in `ALERTED`.
    pub alert: bool,
}

impl OutcomeEvent {
    /// Wall time of the run.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// What the invocation boundary returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// How the run ended.
    pub result: OutcomeResult,
    /// The date the run worked on.
    pub report_date: ReportDate,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
    /// The run identifier, matching the outcome event.
    pub run_id: Uuid,
    /// The step that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    /// The failure tag, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Reference returned by the delivery channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_reference: Option<String>,
}

impl RunSummary {
    /// Returns true if operators should be alerted.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        self.result.is_alert()
    }
}

impl From<&OutcomeEvent> for RunSummary {
    fn from(event: &OutcomeEvent) -> Self {
        Self {
            result: event.result,
            report_date: event.report_date,
            duration_ms: event.duration_ms,
            run_id: event.run_id,
            failed_step: event.failed_step,
            error_kind: event.error_kind,
            delivery_reference: event.delivery_reference.clone(),
        }
    }
}
