//! Outcome reporting: the one component allowed to fail silently.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::OutcomeEvent;
use crate::events::{EventSink, LoggingEventSink};

/// Event type under which outcome events are published.
pub const OUTCOME_EVENT_TYPE: &str = "report.outcome";

/// Publishes outcome events to the metrics collaborator.
///
/// Emission is fire-and-forget: failures are logged and swallowed so they
/// can never fail a run.
#[derive(Clone)]
pub struct OutcomeReporter {
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for OutcomeReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeReporter").finish_non_exhaustive()
    }
}

impl Default for OutcomeReporter {
    fn default() -> Self {
        Self::new(Arc::new(LoggingEventSink::default()))
    }
}

impl OutcomeReporter {
    /// Creates a reporter publishing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Logs the outcome and hands it to the sink.
    pub async fn emit(&self, event: &OutcomeEvent) {
        if event.alert {
            error!(
                run_id = %event.run_id,
                report_date = %event.report_date,
                result = %event.result,
                failed_step = ?event.failed_step,
                error_kind = ?event.error_kind,
                error = ?event.error_message,
                duration_ms = event.duration_ms,
                "Report run alerted"
            );
        } else {
            info!(
                run_id = %event.run_id,
                report_date = %event.report_date,
                result = %event.result,
                duration_ms = event.duration_ms,
                "Report run finished"
            );
        }

        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(run_id = %event.run_id, error = %e, "Failed to encode outcome event");
                return;
            }
        };

        if let Err(e) = self.sink.emit(OUTCOME_EVENT_TYPE, Some(payload)).await {
            warn!(run_id = %event.run_id, error = %e, "Failed to emit outcome event");
        }
    }
}
