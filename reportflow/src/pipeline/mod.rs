//! Pipeline building and execution.
//!
//! This module provides:
//! - The retry engine
//! - The idempotency guard over the ledger
//! - The per-invocation job run and its state machine
//! - The orchestrator that drives a run from claim to finalize

mod guard;
mod orchestrator;
mod retry;
mod run;

#[cfg(test)]
mod integration_tests;

pub use guard::{Claim, Finalized, IdempotencyGuard};
pub use orchestrator::{ReportPipeline, ReportPipelineBuilder};
pub use retry::{
    should_retry, with_retry, with_retry_classified, BackoffStrategy, JitterStrategy,
    RetryConfig, RetryDecision, RetryFailure, RetryFailureKind, RetryOutcome, RetryState,
};
pub use run::JobRun;
