//! Job state and step enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a single job run.
///
/// ```text
/// INIT -> CHECKING_LEDGER -> {ALREADY_DONE | FETCHING | FAILED}
/// FETCHING -> {COMPOSING | FAILED}
/// COMPOSING -> {DELIVERING | FAILED}
/// DELIVERING -> {FINALIZING | FAILED}
/// FINALIZING -> {COMPLETED | FINALIZE_RETRYING | FAILED}
/// FINALIZE_RETRYING -> {COMPLETED | ALERTED}
/// FAILED -> ALERTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Run created, nothing done yet.
    Init,
    /// Consulting the idempotency guard.
    CheckingLedger,
    /// The date was already completed. Terminal.
    AlreadyDone,
    /// Fetching cost data.
    Fetching,
    /// Composing the report.
    Composing,
    /// Delivering the report.
    Delivering,
    /// Recording completion in the ledger.
    Finalizing,
    /// Recording completion on the extended retry budget.
    FinalizeRetrying,
    /// Report delivered and recorded. Terminal.
    Completed,
    /// A step failed; an alert follows.
    Failed,
    /// Failure surfaced to operators. Terminal.
    Alerted,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Init
    }
}

impl JobState {
    /// Returns true for states a run ends in.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AlreadyDone | Self::Completed | Self::Alerted)
    }

    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::CheckingLedger)
                | (
                    Self::CheckingLedger,
                    Self::AlreadyDone | Self::Fetching | Self::Failed
                )
                | (Self::Fetching, Self::Composing | Self::Failed)
                | (Self::Composing, Self::Delivering | Self::Failed)
                | (Self::Delivering, Self::Finalizing | Self::Failed)
                | (
                    Self::Finalizing,
                    Self::Completed | Self::FinalizeRetrying | Self::Failed
                )
                | (Self::FinalizeRetrying, Self::Completed | Self::Alerted)
                | (Self::Failed, Self::Alerted)
        )
    }

    /// The step whose work this state performs, if any.
    #[must_use]
    pub const fn step(self) -> Option<Step> {
        match self {
            Self::CheckingLedger => Some(Step::Claim),
            Self::Fetching => Some(Step::Fetch),
            Self::Composing => Some(Step::Compose),
            Self::Delivering => Some(Step::Deliver),
            Self::Finalizing | Self::FinalizeRetrying => Some(Step::Finalize),
            _ => None,
        }
    }

    /// Returns the SCREAMING_SNAKE_CASE name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::CheckingLedger => "CHECKING_LEDGER",
            Self::AlreadyDone => "ALREADY_DONE",
            Self::Fetching => "FETCHING",
            Self::Composing => "COMPOSING",
            Self::Delivering => "DELIVERING",
            Self::Finalizing => "FINALIZING",
            Self::FinalizeRetrying => "FINALIZE_RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Alerted => "ALERTED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work inside a run, as named in `failed_step` and attempt counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Consulting the ledger.
    Claim,
    /// Fetching cost data.
    Fetch,
    /// Composing the report.
    Compose,
    /// Delivering the report.
    Deliver,
    /// Recording completion.
    Finalize,
}

impl Step {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Fetch => "fetch",
            Self::Compose => "compose",
            Self::Deliver => "deliver",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
