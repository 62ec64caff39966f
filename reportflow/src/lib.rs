//! # Reportflow
//!
//! A scheduled, idempotent, retrying daily cost report job.
//!
//! Once per day the job fetches yesterday's cost data, composes a report,
//! delivers it, and durably records completion in a ledger. It provides:
//!
//! - **Retry engine**: bounded attempts with exponential backoff and
//!   retryable/fatal classification
//! - **Idempotency guard**: one completed ledger entry per report date
//! - **Pipeline orchestrator**: an explicit state machine from claim to finalize
//! - **Outcome reporting**: exactly one structured outcome event per run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reportflow::prelude::*;
//!
//! let pipeline = ReportPipeline::builder()
//!     .source(Arc::new(my_source))
//!     .delivery(Arc::new(my_delivery))
//!     .ledger(Arc::new(InMemoryLedgerStore::new()))
//!     .build()?;
//!
//! let summary = pipeline.run(Invocation::scheduled()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod monitor;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod report;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancelReason, CancelScope, CancellationToken};
    pub use crate::config::{LoggingConfig, ReportflowConfig};
    pub use crate::core::{
        Invocation, JobState, OutcomeEvent, OutcomeResult, ReportDate, RunSummary, Step,
        TriggerType,
    };
    pub use crate::errors::{
        Classify, ComposeError, DeliveryError, ErrorClass, ErrorKind, LedgerError,
        ReportflowError, SourceError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::monitor::{LivenessCheck, LivenessMonitor, LivenessStatus};
    pub use crate::observability::OutcomeReporter;
    pub use crate::pipeline::{
        Claim, Finalized, IdempotencyGuard, JobRun, ReportPipeline, ReportPipelineBuilder,
        RetryConfig,
    };
    pub use crate::ports::{
        CostSource, DeliveryReference, InMemoryLedgerStore, LedgerEntry, LedgerStore,
        ReportDelivery,
    };
    pub use crate::report::{compose, ComposedReport, CostData, ServiceCost};
    pub use crate::utils::{Clock, FixedClock, SystemClock};
}
