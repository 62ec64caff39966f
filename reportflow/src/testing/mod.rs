//! Testing utilities for reportflow pipelines.
//!
//! This module provides:
//! - Scripted collaborators that fail on demand
//! - A harness wiring them into a pipeline with a fixed clock

mod fixtures;
mod mocks;

pub use fixtures::{sample_cost_data, TestHarness};
pub use mocks::{FailingEventSink, FlakyLedgerStore, ScriptedDelivery, ScriptedSource};
