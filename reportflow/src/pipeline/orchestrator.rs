//! The report pipeline: claim, fetch, compose, deliver, finalize.
//!
//! Every invocation ends in exactly one outcome event, whatever happens
//! inside. Failures never escape `run` as errors; they become an `ALERTED`
//! run with a tagged result.

use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use super::guard::{Claim, Finalized, IdempotencyGuard};
use super::retry::{with_retry, RetryFailureKind};
use super::run::{JobRun, Termination};
use crate::cancellation::{CancelScope, CancellationToken};
use crate::config::ReportflowConfig;
use crate::core::{Invocation, JobState, OutcomeResult, RunSummary, Step};
use crate::errors::{Classify, ErrorKind, InvalidTransition, ReportflowError};
use crate::events::EventSink;
use crate::observability::OutcomeReporter;
use crate::ports::{CostSource, LedgerEntry, LedgerStore, ReportDelivery};
use crate::report::compose;
use crate::utils::{Clock, SystemClock};

/// Runs the daily report job against its collaborators.
#[derive(Clone)]
pub struct ReportPipeline {
    source: Arc<dyn CostSource>,
    delivery: Arc<dyn ReportDelivery>,
    guard: IdempotencyGuard,
    reporter: OutcomeReporter,
    clock: Arc<dyn Clock>,
    config: ReportflowConfig,
}

impl std::fmt::Debug for ReportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReportPipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder() -> ReportPipelineBuilder {
        ReportPipelineBuilder::default()
    }

    /// The idempotency guard, for operator actions such as clearing a date.
    #[must_use]
    pub const fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// The configuration the pipeline runs with.
    #[must_use]
    pub const fn config(&self) -> &ReportflowConfig {
        &self.config
    }

    /// Runs one invocation to completion.
    pub async fn run(&self, invocation: Invocation) -> RunSummary {
        self.run_with_token(invocation, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs one invocation that can be cancelled from outside.
    ///
    /// The invocation's own timeout takes precedence over the configured one.
    pub async fn run_with_token(
        &self,
        invocation: Invocation,
        token: Arc<CancellationToken>,
    ) -> RunSummary {
        let mut scope = CancelScope::new().with_token(token);
        if let Some(timeout) = invocation
            .timeout()
            .or_else(|| self.config.invocation_timeout())
        {
            scope = scope.with_timeout(timeout);
        }
        self.run_in_scope(&invocation, &scope).await
    }

    /// Runs one invocation inside an existing scope.
    pub async fn run_in_scope(&self, invocation: &Invocation, scope: &CancelScope) -> RunSummary {
        let report_date = invocation.resolve_report_date(self.clock.now());
        let mut run = JobRun::new(report_date, invocation.trigger_type, self.clock.now());
        let span = info_span!(
            "report_run",
            run_id = %run.run_id(),
            %report_date,
            trigger = %invocation.trigger_type,
        );

        let termination = match self.execute(&mut run, scope).instrument(span.clone()).await {
            Ok(termination) => termination,
            Err(e) => {
                span.in_scope(|| {
                    error!(error = %e, state = %run.state(), "Run aborted on illegal transition");
                });
                run.force_alerted();
                Termination {
                    failed_step: e.from.step(),
                    ..Termination::failed(
                        OutcomeResult::FatalError,
                        Step::Claim,
                        ErrorKind::Unclassified,
                        e.to_string(),
                    )
                }
            }
        };

        let event = run.outcome_event(termination);
        if let Some(slo) = self.config.slo().filter(|slo| event.duration() > *slo) {
            warn!(
                run_id = %event.run_id,
                duration_ms = event.duration_ms,
                slo_ms = u64::try_from(slo.as_millis()).unwrap_or(u64::MAX),
                "Run exceeded latency objective"
            );
        }
        self.reporter.emit(&event).instrument(span).await;
        RunSummary::from(&event)
    }

    async fn execute(
        &self,
        run: &mut JobRun,
        scope: &CancelScope,
    ) -> Result<Termination, InvalidTransition> {
        let report_date = run.report_date();
        info!("Report run started");

        run.transition(JobState::CheckingLedger)?;
        let claim = tokio::select! {
            biased;
            reason = scope.cancelled() => {
                return alert(run, Termination::cancelled(Step::Claim, &reason));
            }
            claim = self.guard.claim(report_date) => claim,
        };
        match claim {
            Ok(Claim::AlreadyDone(entry)) => {
                run.transition(JobState::AlreadyDone)?;
                return Ok(Termination::already_done(entry.delivery_reference));
            }
            Ok(Claim::Proceed) => {}
            Err(e) => {
                // Proceeding blind could send a duplicate.
                return alert(
                    run,
                    Termination::failed(
                        OutcomeResult::FatalError,
                        Step::Claim,
                        ErrorKind::LedgerUnavailable,
                        e.to_string(),
                    ),
                );
            }
        }

        run.transition(JobState::Fetching)?;
        let source = &self.source;
        let fetched = with_retry(&self.config.fetch_retry, "fetch", scope, move |_| {
            source.fetch(report_date)
        })
        .await;
        let data = match fetched {
            Ok(outcome) => {
                run.record_attempts(Step::Fetch, outcome.attempts);
                outcome.value
            }
            Err(failure) => {
                run.record_attempts(Step::Fetch, failure.attempts);
                return alert(run, Termination::from_retry(Step::Fetch, &failure));
            }
        };

        run.transition(JobState::Composing)?;
        let report = match compose(report_date, &data) {
            Ok(report) => report,
            Err(e) => {
                return alert(
                    run,
                    Termination::failed(OutcomeResult::FatalError, Step::Compose, e.kind(), e.to_string()),
                );
            }
        };

        run.transition(JobState::Delivering)?;
        let delivery = &self.delivery;
        let composed = &report;
        let delivered = with_retry(&self.config.deliver_retry, "deliver", scope, move |_| {
            delivery.deliver(report_date, composed)
        })
        .await;
        let reference = match delivered {
            Ok(outcome) => {
                run.record_attempts(Step::Deliver, outcome.attempts);
                outcome.value
            }
            Err(failure) => {
                run.record_attempts(Step::Deliver, failure.attempts);
                return alert(run, Termination::from_retry(Step::Deliver, &failure));
            }
        };
        info!(delivery_reference = %reference, "Report delivered");

        run.transition(JobState::Finalizing)?;
        let entry = LedgerEntry::completed(report_date, reference.as_str(), self.clock.now())
            .with_attempt_count(run.total_attempts() + 1)
            .with_trigger(run.trigger())
            .with_report_digest(report.digest());
        self.finalize(run, scope, entry).await
    }

    /// The report is already out; from here on every failure is a residual
    /// duplicate risk for the next run.
    async fn finalize(
        &self,
        run: &mut JobRun,
        scope: &CancelScope,
        entry: LedgerEntry,
    ) -> Result<Termination, InvalidTransition> {
        let reference = entry.delivery_reference.clone();

        run.record_attempts(Step::Finalize, 1);
        let first = tokio::select! {
            biased;
            result = self.guard.finalize_entry(entry.clone()) => result,
            reason = scope.cancelled() => {
                warn!(%reason, "Finalize interrupted after delivery");
                let termination = Termination::cancelled(Step::Finalize, &reason)
                    .with_error_kind(ErrorKind::FinalizeRaceResidual)
                    .with_delivery_reference(reference);
                return alert(run, termination);
            }
        };

        let error = match first {
            Ok(finalized) => return complete(run, &finalized, reference),
            Err(e) if !e.is_retryable() => {
                error!(error = %e, "Finalize failed permanently after delivery");
                let termination = Termination::failed(
                    OutcomeResult::FatalError,
                    Step::Finalize,
                    ErrorKind::FinalizeRaceResidual,
                    e.to_string(),
                )
                .with_delivery_reference(reference);
                return alert(run, termination);
            }
            Err(e) => e,
        };

        warn!(error = %error, "Finalize failed after delivery, retrying");
        run.transition(JobState::FinalizeRetrying)?;
        let guard = &self.guard;
        let pending = &entry;
        let retried = with_retry(&self.config.finalize_retry, "finalize", scope, move |_| {
            guard.finalize_entry(pending.clone())
        })
        .await;

        match retried {
            Ok(outcome) => {
                run.record_attempts(Step::Finalize, outcome.attempts);
                complete(run, &outcome.value, reference)
            }
            Err(failure) => {
                run.record_attempts(Step::Finalize, failure.attempts);
                error!(
                    delivery_reference = %reference,
                    error = %failure,
                    "Report delivered but not recorded; the next run may send it again"
                );
                let result = if failure.kind == RetryFailureKind::Fatal {
                    OutcomeResult::FatalError
                } else {
                    OutcomeResult::RetryableExhausted
                };
                run.transition(JobState::Alerted)?;
                Ok(Termination::failed(
                    result,
                    Step::Finalize,
                    ErrorKind::FinalizeRaceResidual,
                    failure.to_string(),
                )
                .with_delivery_reference(reference))
            }
        }
    }
}

fn alert(run: &mut JobRun, termination: Termination) -> Result<Termination, InvalidTransition> {
    run.transition(JobState::Failed)?;
    run.transition(JobState::Alerted)?;
    Ok(termination)
}

/// Reports this run's own reference even when a concurrent run's entry won.
fn complete(
    run: &mut JobRun,
    finalized: &Finalized,
    reference: String,
) -> Result<Termination, InvalidTransition> {
    run.transition(JobState::Completed)?;
    if let Finalized::AlreadyRecorded(existing) = finalized {
        info!(
            existing_reference = %existing.delivery_reference,
            "Concurrent run recorded first; keeping its entry"
        );
    }
    Ok(Termination::success(reference))
}

/// Builder for [`ReportPipeline`].
#[derive(Default)]
pub struct ReportPipelineBuilder {
    source: Option<Arc<dyn CostSource>>,
    delivery: Option<Arc<dyn ReportDelivery>>,
    ledger: Option<Arc<dyn LedgerStore>>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    config: ReportflowConfig,
}

impl std::fmt::Debug for ReportPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPipelineBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReportPipelineBuilder {
    /// Sets the cost data source.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn CostSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the delivery channel.
    #[must_use]
    pub fn delivery(mut self, delivery: Arc<dyn ReportDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Sets the durable ledger.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets where outcome events go. Defaults to the log.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the wall clock used for date selection and ledger timestamps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets retry budgets, timeouts and the latency objective.
    #[must_use]
    pub fn config(mut self, config: ReportflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator is missing or the configuration
    /// is invalid.
    pub fn build(self) -> Result<ReportPipeline, ReportflowError> {
        self.config.validate()?;
        let source = self.source.ok_or(ReportflowError::MissingComponent("source"))?;
        let delivery = self
            .delivery
            .ok_or(ReportflowError::MissingComponent("delivery"))?;
        let ledger = self.ledger.ok_or(ReportflowError::MissingComponent("ledger"))?;
        let reporter = self
            .sink
            .map_or_else(OutcomeReporter::default, OutcomeReporter::new);

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(ReportPipeline {
            source,
            delivery,
            guard: IdempotencyGuard::new(ledger).with_clock(clock.clone()),
            reporter,
            clock,
            config: self.config,
        })
    }
}
