//! A ready-wired pipeline over scripted collaborators.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use super::mocks::{FlakyLedgerStore, ScriptedDelivery, ScriptedSource};
use crate::config::ReportflowConfig;
use crate::core::{OutcomeEvent, ReportDate};
use crate::errors::ReportflowError;
use crate::events::CollectingEventSink;
use crate::observability::OUTCOME_EVENT_TYPE;
use crate::pipeline::ReportPipeline;
use crate::report::CostData;
use crate::utils::{Clock, FixedClock};

/// A small day of spend with a few services.
#[must_use]
pub fn sample_cost_data(report_date: ReportDate) -> CostData {
    CostData::new(report_date, 123.45)
        .with_service("Compute", 80.0)
        .with_service("Storage", 30.45)
        .with_service("Network", 13.0)
}

/// Scripted collaborators plus the clock and config to run them with.
///
/// The clock starts at 08:00 UTC on 2024-03-02, so scheduled runs work on
/// 2024-03-01 and the source serves [`sample_cost_data`] for it.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The cost source.
    pub source: Arc<ScriptedSource>,
    /// The delivery channel.
    pub delivery: Arc<ScriptedDelivery>,
    /// The ledger.
    pub ledger: Arc<FlakyLedgerStore>,
    /// Captured outcome events.
    pub events: Arc<CollectingEventSink>,
    /// The wall clock.
    pub clock: Arc<FixedClock>,
    /// Pipeline configuration.
    pub config: ReportflowConfig,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        let now: DateTime<Utc> = Utc
            .with_ymd_and_hms(2024, 3, 2, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let report_date = ReportDate::yesterday_of(now);
        Self {
            source: Arc::new(ScriptedSource::returning(sample_cost_data(report_date))),
            delivery: Arc::new(ScriptedDelivery::new()),
            ledger: Arc::new(FlakyLedgerStore::new()),
            events: Arc::new(CollectingEventSink::new()),
            clock: Arc::new(FixedClock::new(now)),
            config: ReportflowConfig::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReportflowConfig) -> Self {
        self.config = config;
        self
    }

    /// The date a scheduled run would pick right now.
    #[must_use]
    pub fn report_date(&self) -> ReportDate {
        ReportDate::yesterday_of(self.clock.now())
    }

    /// Builds a pipeline over the harness collaborators.
    pub fn pipeline(&self) -> Result<ReportPipeline, ReportflowError> {
        ReportPipeline::builder()
            .source(self.source.clone())
            .delivery(self.delivery.clone())
            .ledger(self.ledger.clone())
            .event_sink(self.events.clone())
            .clock(self.clock.clone())
            .config(self.config.clone())
            .build()
    }

    /// Outcome events emitted so far, oldest first.
    #[must_use]
    pub fn outcome_events(&self) -> Vec<OutcomeEvent> {
        self.events
            .payloads_of_type(OUTCOME_EVENT_TYPE)
            .into_iter()
            .filter_map(|payload| serde_json::from_value(payload).ok())
            .collect()
    }
}
