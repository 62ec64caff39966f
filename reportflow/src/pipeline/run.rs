//! The in-memory record of one invocation.

use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::retry::{RetryFailure, RetryFailureKind};
use crate::cancellation::CancelReason;
use crate::core::{JobState, OutcomeEvent, OutcomeResult, ReportDate, Step, TriggerType};
use crate::errors::{Classify, ErrorKind, InvalidTransition};
use crate::observability::SpanTimer;
use crate::utils::Timestamp;

/// One execution of the pipeline for one report date.
///
/// Never persisted. Only a successful run leaves a trace, as a ledger entry.
#[derive(Debug)]
pub struct JobRun {
    run_id: Uuid,
    report_date: ReportDate,
    trigger: TriggerType,
    state: JobState,
    history: Vec<JobState>,
    attempts_by_step: BTreeMap<String, u32>,
    started_at: Timestamp,
    timer: SpanTimer,
}

impl JobRun {
    /// Starts a run in `INIT`.
    #[must_use]
    pub fn new(report_date: ReportDate, trigger: TriggerType, started_at: Timestamp) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            report_date,
            trigger,
            state: JobState::Init,
            history: vec![JobState::Init],
            attempts_by_step: BTreeMap::new(),
            started_at,
            timer: SpanTimer::start("report_run"),
        }
    }

    /// The run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The date being processed.
    #[must_use]
    pub const fn report_date(&self) -> ReportDate {
        self.report_date
    }

    /// Who triggered the run.
    #[must_use]
    pub const fn trigger(&self) -> TriggerType {
        self.trigger
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    /// Every state entered so far, starting with `INIT`.
    #[must_use]
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// When the run started (wall clock).
    #[must_use]
    pub const fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Remote attempts per step.
    #[must_use]
    pub const fn attempts_by_step(&self) -> &BTreeMap<String, u32> {
        &self.attempts_by_step
    }

    /// Attempts recorded for one step.
    #[must_use]
    pub fn attempts(&self, step: Step) -> u32 {
        self.attempts_by_step.get(step.as_str()).copied().unwrap_or(0)
    }

    /// Attempts across all steps.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.attempts_by_step.values().sum()
    }

    /// Elapsed run time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.timer.elapsed_ms()
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(run_id = %self.run_id, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Adds attempts to a step's counter.
    pub fn record_attempts(&mut self, step: Step, attempts: u32) {
        *self.attempts_by_step.entry(step.as_str().to_string()).or_insert(0) += attempts;
    }

    /// Jumps straight to `ALERTED`. Only for internal defects.
    pub(crate) fn force_alerted(&mut self) {
        self.state = JobState::Alerted;
        self.history.push(JobState::Alerted);
    }

    /// Builds the outcome event for a finished run.
    pub(crate) fn outcome_event(&self, termination: Termination) -> OutcomeEvent {
        OutcomeEvent {
            run_id: self.run_id,
            report_date: self.report_date,
            trigger: self.trigger,
            result: termination.result,
            duration_ms: self.elapsed_ms(),
            failed_step: termination.failed_step,
            error_kind: termination.error_kind,
            error_message: termination.error_message,
            attempts_by_step: self.attempts_by_step.clone(),
            delivery_reference: termination.delivery_reference,
            final_state: self.state,
            alert: self.state == JobState::Alerted,
        }
    }
}

/// How `execute` ended, before it is stamped with run metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Termination {
    pub result: OutcomeResult,
    pub failed_step: Option<Step>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub delivery_reference: Option<String>,
}

impl Termination {
    pub fn success(delivery_reference: String) -> Self {
        Self {
            result: OutcomeResult::Success,
            failed_step: None,
            error_kind: None,
            error_message: None,
            delivery_reference: Some(delivery_reference),
        }
    }

    pub fn already_done(delivery_reference: String) -> Self {
        Self {
            result: OutcomeResult::AlreadyDone,
            ..Self::success(delivery_reference)
        }
    }

    pub fn failed(result: OutcomeResult, step: Step, kind: ErrorKind, message: String) -> Self {
        Self {
            result,
            failed_step: Some(step),
            error_kind: Some(kind),
            error_message: Some(message),
            delivery_reference: None,
        }
    }

    /// Deadline and cancellation count as exhaustion, never as fatal.
    pub fn cancelled(step: Step, reason: &CancelReason) -> Self {
        Self::failed(
            OutcomeResult::RetryableExhausted,
            step,
            reason.error_kind(),
            reason.to_string(),
        )
    }

    pub fn from_retry<E: Classify + std::fmt::Display>(step: Step, failure: &RetryFailure<E>) -> Self {
        let message = failure.to_string();
        match (failure.kind, &failure.cancel_reason) {
            (RetryFailureKind::Cancelled, Some(reason)) => Self {
                error_message: Some(message),
                ..Self::cancelled(step, reason)
            },
            (RetryFailureKind::Fatal, _) => Self::failed(
                OutcomeResult::FatalError,
                step,
                failure.last_error.as_ref().map_or(ErrorKind::Unclassified, Classify::kind),
                message,
            ),
            _ => Self::failed(
                OutcomeResult::RetryableExhausted,
                step,
                failure.last_error.as_ref().map_or(ErrorKind::Unclassified, Classify::kind),
                message,
            ),
        }
    }

    #[must_use]
    pub fn with_delivery_reference(mut self, reference: String) -> Self {
        self.delivery_reference = Some(reference);
        self
    }

    #[must_use]
    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use chrono::Utc;

    fn run() -> JobRun {
        JobRun::new(
            ReportDate::from_ymd(2024, 3, 1).unwrap(),
            TriggerType::Scheduled,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_run_starts_in_init() {
        let run = run();
        assert_eq!(run.state(), JobState::Init);
        assert_eq!(run.history(), &[JobState::Init]);
        assert_eq!(run.total_attempts(), 0);
    }

    #[test]
    fn test_transition_records_history() {
        let mut run = run();
        run.transition(JobState::CheckingLedger).unwrap();
        run.transition(JobState::AlreadyDone).unwrap();
        assert_eq!(
            run.history(),
            &[JobState::Init, JobState::CheckingLedger, JobState::AlreadyDone]
        );
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut run = run();
        let err = run.transition(JobState::Delivering).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: JobState::Init,
                to: JobState::Delivering
            }
        );
        assert_eq!(run.state(), JobState::Init);
    }

    #[test]
    fn test_attempts_accumulate() {
        let mut run = run();
        run.record_attempts(Step::Fetch, 2);
        run.record_attempts(Step::Finalize, 1);
        run.record_attempts(Step::Finalize, 3);
        assert_eq!(run.attempts(Step::Fetch), 2);
        assert_eq!(run.attempts(Step::Finalize), 4);
        assert_eq!(run.attempts(Step::Deliver), 0);
        assert_eq!(run.total_attempts(), 6);
    }

    #[test]
    fn test_termination_from_exhausted_retry() {
        let failure = RetryFailure {
            kind: RetryFailureKind::Exhausted,
            last_error: Some(SourceError::Timeout("read".into())),
            cancel_reason: None,
            attempts: 3,
            delays: vec![],
        };
        let t = Termination::from_retry(Step::Fetch, &failure);
        assert_eq!(t.result, OutcomeResult::RetryableExhausted);
        assert_eq!(t.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(t.failed_step, Some(Step::Fetch));
    }

    #[test]
    fn test_termination_from_cancelled_retry_is_not_fatal() {
        let failure: RetryFailure<SourceError> = RetryFailure {
            kind: RetryFailureKind::Cancelled,
            last_error: None,
            cancel_reason: Some(CancelReason::DeadlineExceeded),
            attempts: 1,
            delays: vec![],
        };
        let t = Termination::from_retry(Step::Deliver, &failure);
        assert_eq!(t.result, OutcomeResult::RetryableExhausted);
        assert_eq!(t.error_kind, Some(ErrorKind::DeadlineExceeded));
    }
}
