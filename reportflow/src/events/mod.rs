//! Event sink system for observability.
//!
//! Outcome events leave the job through an [`EventSink`]. Sinks are the
//! boundary to the external metrics and alerting collaborator.

mod sink;

pub use sink::{CollectingEventSink, EventSink, JsonLinesEventSink, LoggingEventSink, NoOpEventSink};
