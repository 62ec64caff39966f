//! Core domain model types for reportflow.
//!
//! This module contains the fundamental types used throughout the job:
//! - The report date key and how it is resolved from an invocation
//! - Job state and step enums
//! - Outcome events and run summaries

mod date;
mod invocation;
mod outcome;
mod state;

pub use date::{ReportDate, ReportDateError};
pub use invocation::{Invocation, TriggerType};
pub use outcome::{OutcomeEvent, OutcomeResult, RunSummary};
pub use state::{JobState, Step};
