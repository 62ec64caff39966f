//! End-to-end scenarios for the report pipeline.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cancellation::CancellationToken;
use crate::config::ReportflowConfig;
use crate::core::{Invocation, JobState, OutcomeResult, ReportDate, Step, TriggerType};
use crate::errors::{DeliveryError, ErrorKind, LedgerError, ReportflowError, SourceError};
use crate::pipeline::ReportPipeline;
use crate::ports::{InMemoryLedgerStore, LedgerStore};
use crate::report::CostData;
use crate::testing::{sample_cost_data, FailingEventSink, ScriptedDelivery, ScriptedSource, TestHarness};

fn attempts(event: &crate::core::OutcomeEvent, step: Step) -> u32 {
    event.attempts_by_step.get(step.as_str()).copied().unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_records_completion() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    assert_eq!(summary.delivery_reference.as_deref(), Some("msg-1"));
    assert!(!summary.is_alert());

    let entry = harness
        .ledger
        .get(harness.report_date())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.delivery_reference, "msg-1");
    assert_eq!(entry.attempt_count, 3);
    assert_eq!(entry.trigger, TriggerType::Scheduled);

    let (_, report, _) = harness.delivery.delivered().remove(0);
    assert_eq!(entry.report_digest, Some(report.digest()));
    assert_eq!(report.subject, "Daily Cost Report - $123.45");

    let events = harness.outcome_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].final_state, JobState::Completed);
    assert_eq!(events[0].run_id, summary.run_id);
    assert_eq!(attempts(&events[0], Step::Fetch), 1);
    assert_eq!(attempts(&events[0], Step::Deliver), 1);
    assert_eq!(attempts(&events[0], Step::Finalize), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_already_done() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline().unwrap();

    let first = pipeline.run(Invocation::scheduled()).await;
    let second = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(first.result, OutcomeResult::Success);
    assert_eq!(second.result, OutcomeResult::AlreadyDone);
    assert_eq!(second.delivery_reference.as_deref(), Some("msg-1"));
    assert_eq!(harness.delivery.delivered_count(), 1);
    assert_eq!(harness.source.call_count(), 1);

    let events = harness.outcome_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].final_state, JobState::AlreadyDone);
    assert!(!events[1].alert);
    assert!(events[1].attempts_by_step.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_exhaustion_backs_off_then_alerts() {
    let harness = TestHarness::new();
    harness
        .source
        .set_fallback(Err(SourceError::RateLimited("Throttling".into())));
    let pipeline = harness.pipeline().unwrap();
    let start = Instant::now();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Fetch));
    assert_eq!(summary.error_kind, Some(ErrorKind::RateLimited));
    assert_eq!(summary.duration_ms, 3_000);

    let offsets: Vec<Duration> = harness
        .source
        .call_instants()
        .into_iter()
        .map(|at| at - start)
        .collect();
    assert_eq!(
        offsets,
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
    );

    assert_eq!(harness.delivery.call_count(), 0);
    assert!(harness.ledger.inner().is_empty());

    let events = harness.outcome_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].alert);
    assert_eq!(events[0].final_state, JobState::Alerted);
    assert_eq!(attempts(&events[0], Step::Fetch), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_fetch_error_short_circuits() {
    let harness = TestHarness::new();
    harness
        .source
        .set_fallback(Err(SourceError::Unauthorized("AccessDenied".into())));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::FatalError);
    assert_eq!(summary.failed_step, Some(Step::Fetch));
    assert_eq!(summary.error_kind, Some(ErrorKind::Unauthorized));
    assert_eq!(summary.duration_ms, 0);
    assert_eq!(harness.source.call_count(), 1);

    let events = harness.outcome_events();
    assert_eq!(attempts(&events[0], Step::Fetch), 1);
    assert!(events[0].alert);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_absorbed() {
    let harness = TestHarness::new();
    let date = harness.report_date();
    harness.source.push(Err(SourceError::Timeout("read timed out".into())));
    harness.source.push(Ok(sample_cost_data(date)));
    harness
        .delivery
        .push_failure(DeliveryError::Throttled("Throttling".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    assert_eq!(summary.duration_ms, 2_000);
    let events = harness.outcome_events();
    assert_eq!(attempts(&events[0], Step::Fetch), 2);
    assert_eq!(attempts(&events[0], Step::Deliver), 2);

    let entry = harness.ledger.get(date).await.unwrap().unwrap();
    assert_eq!(entry.attempt_count, 5);
}

#[tokio::test(start_paused = true)]
async fn test_date_is_yesterday_in_utc() {
    let harness = TestHarness::new();
    harness.clock.set(
        chrono::FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 2, 2, 0, 0)
            .unwrap()
            .with_timezone(&Utc),
    );
    let expected = ReportDate::from_ymd(2024, 2, 29).unwrap();
    harness.source.push(Ok(sample_cost_data(expected)));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    // 02:00 in Tokyo is still 1 March in UTC.
    assert_eq!(summary.report_date, expected);
    assert_eq!(summary.result, OutcomeResult::Success);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_run_at_eight_utc() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.report_date, ReportDate::from_ymd(2024, 3, 1).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_manual_override_date() {
    let harness = TestHarness::new();
    let date = ReportDate::from_ymd(2024, 2, 15).unwrap();
    harness.source.push(Ok(sample_cost_data(date)));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::manual(date)).await;

    assert_eq!(summary.report_date, date);
    assert_eq!(summary.result, OutcomeResult::Success);
    let entry = harness.ledger.get(date).await.unwrap().unwrap();
    assert_eq!(entry.trigger, TriggerType::Manual);
    assert!(harness
        .ledger
        .get(harness.report_date())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_write_one_entry() {
    let harness = TestHarness::new();
    harness.source.set_latency(Duration::from_millis(10));
    let pipeline = harness.pipeline().unwrap();

    let (a, b) = tokio::join!(
        pipeline.run(Invocation::scheduled()),
        pipeline.run(Invocation::scheduled())
    );

    // The advisory claim lets both through; finalize keeps one record.
    assert_eq!(a.result, OutcomeResult::Success);
    assert_eq!(b.result, OutcomeResult::Success);
    assert_eq!(harness.delivery.delivered_count(), 2);
    assert_eq!(harness.ledger.inner().len(), 1);
    assert_eq!(harness.ledger.put_calls(), 2);

    let entry = harness
        .ledger
        .get(harness.report_date())
        .await
        .unwrap()
        .unwrap();
    assert!(entry.delivery_reference == "msg-1" || entry.delivery_reference == "msg-2");
}

#[tokio::test(start_paused = true)]
async fn test_claim_ledger_unavailable_is_fatal() {
    let harness = TestHarness::new();
    harness
        .ledger
        .fail_next_gets(1, LedgerError::Unavailable("connection refused".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::FatalError);
    assert_eq!(summary.failed_step, Some(Step::Claim));
    assert_eq!(summary.error_kind, Some(ErrorKind::LedgerUnavailable));
    assert_eq!(harness.source.call_count(), 0);
    assert_eq!(harness.delivery.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_compose_failure_is_fatal() {
    let harness = TestHarness::new();
    let wrong_day = ReportDate::from_ymd(2024, 1, 1).unwrap();
    harness.source.push(Ok(sample_cost_data(wrong_day)));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::FatalError);
    assert_eq!(summary.failed_step, Some(Step::Compose));
    assert_eq!(summary.error_kind, Some(ErrorKind::ComposeFailed));
    assert_eq!(harness.delivery.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_data_still_delivers() {
    let harness = TestHarness::new();
    harness
        .source
        .push(Ok(CostData::empty(harness.report_date())));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    let (_, report, _) = harness.delivery.delivered().remove(0);
    assert_eq!(report.subject, "Daily Cost Report - No Data");
}

#[tokio::test(start_paused = true)]
async fn test_fatal_delivery_error() {
    let harness = TestHarness::new();
    let pipeline = ReportPipeline::builder()
        .source(harness.source.clone())
        .delivery(Arc::new(ScriptedDelivery::failing(DeliveryError::Rejected(
            "MessageRejected".into(),
        ))))
        .ledger(harness.ledger.clone())
        .event_sink(harness.events.clone())
        .clock(harness.clock.clone())
        .build()
        .unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::FatalError);
    assert_eq!(summary.failed_step, Some(Step::Deliver));
    assert_eq!(summary.error_kind, Some(ErrorKind::Rejected));
    assert!(harness.ledger.inner().is_empty());
    assert_eq!(attempts(&harness.outcome_events()[0], Step::Deliver), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_backoff_is_exhaustion() {
    let harness = TestHarness::new();
    harness
        .source
        .set_fallback(Err(SourceError::RateLimited("Throttling".into())));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline
        .run(Invocation::scheduled().with_timeout_seconds(2.5))
        .await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Fetch));
    assert_eq!(summary.error_kind, Some(ErrorKind::DeadlineExceeded));
    assert!(summary.duration_ms >= 2_500 && summary.duration_ms < 3_000);
    assert_eq!(harness.source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_inflight_attempt() {
    let harness = TestHarness::new();
    harness.delivery.set_latency(Duration::from_secs(60));
    let config = ReportflowConfig {
        invocation_timeout_seconds: Some(5.0),
        ..ReportflowConfig::default()
    };
    let harness = harness.with_config(config);
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Deliver));
    assert_eq!(summary.error_kind, Some(ErrorKind::DeadlineExceeded));
    assert_eq!(harness.delivery.call_count(), 1);
    assert_eq!(harness.delivery.delivered_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_timeouts_run_without_deadline() {
    let payloads = [
        // Too large for a Duration.
        Invocation::from_json(r#"{"timeout_seconds": 1e20}"#).unwrap(),
        // A valid Duration that overflows the clock.
        Invocation::scheduled().with_timeout_seconds(1e19),
    ];

    for invocation in payloads {
        let harness = TestHarness::new();
        let pipeline = harness.pipeline().unwrap();

        let summary = pipeline.run(invocation).await;

        assert_eq!(summary.result, OutcomeResult::Success);
        assert_eq!(harness.delivery.delivered_count(), 1);
        assert_eq!(harness.outcome_events().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_finalize_alerts_with_reference() {
    let harness = TestHarness::new();
    harness.ledger.set_put_latency(Duration::from_secs(60));
    let config = ReportflowConfig {
        invocation_timeout_seconds: Some(5.0),
        ..ReportflowConfig::default()
    };
    let harness = harness.with_config(config);
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Finalize));
    assert_eq!(summary.error_kind, Some(ErrorKind::FinalizeRaceResidual));
    assert_eq!(summary.delivery_reference.as_deref(), Some("msg-1"));
    assert_eq!(harness.delivery.delivered_count(), 1);
    assert_eq!(harness.ledger.put_calls(), 1);
    assert!(harness.ledger.inner().is_empty());

    let events = harness.outcome_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].final_state, JobState::Alerted);
    assert_eq!(attempts(&events[0], Step::Finalize), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation_is_not_fatal() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline().unwrap();
    let token = Arc::new(CancellationToken::new());
    token.cancel("shutdown");

    let summary = pipeline
        .run_with_token(Invocation::scheduled(), token)
        .await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Claim));
    assert_eq!(summary.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(harness.source.call_count(), 0);
    assert_eq!(harness.outcome_events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_recovers_after_transient_failures() {
    let harness = TestHarness::new();
    harness
        .ledger
        .fail_next_puts(2, LedgerError::Unavailable("throttled".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    assert_eq!(harness.ledger.put_calls(), 3);
    assert_eq!(harness.ledger.inner().len(), 1);
    let events = harness.outcome_events();
    assert_eq!(events[0].final_state, JobState::Completed);
    assert_eq!(attempts(&events[0], Step::Finalize), 3);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_commit_hidden_by_timeout() {
    let harness = TestHarness::new();
    harness
        .ledger
        .fail_next_puts_after_commit(1, LedgerError::Timeout("lost ack".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    assert_eq!(summary.delivery_reference.as_deref(), Some("msg-1"));
    assert_eq!(harness.ledger.inner().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_exhaustion_alerts_and_leaves_date_open() {
    let harness = TestHarness::new();
    harness
        .ledger
        .fail_next_puts(7, LedgerError::Unavailable("region outage".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::RetryableExhausted);
    assert_eq!(summary.failed_step, Some(Step::Finalize));
    assert_eq!(summary.error_kind, Some(ErrorKind::FinalizeRaceResidual));
    assert_eq!(summary.delivery_reference.as_deref(), Some("msg-1"));
    assert!(harness.ledger.inner().is_empty());

    let events = harness.outcome_events();
    assert_eq!(events[0].final_state, JobState::Alerted);
    assert_eq!(attempts(&events[0], Step::Finalize), 7);

    // The date stays open, so the next run delivers again.
    let retry = pipeline.run(Invocation::scheduled()).await;
    assert_eq!(retry.result, OutcomeResult::Success);
    assert_eq!(retry.delivery_reference.as_deref(), Some("msg-2"));
    assert_eq!(harness.delivery.delivered_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_finalize_error_alerts() {
    let harness = TestHarness::new();
    harness
        .ledger
        .fail_next_puts(1, LedgerError::Corrupt("bad checksum".into()));
    let pipeline = harness.pipeline().unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::FatalError);
    assert_eq!(summary.failed_step, Some(Step::Finalize));
    assert_eq!(summary.error_kind, Some(ErrorKind::FinalizeRaceResidual));
    assert_eq!(harness.ledger.put_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_does_not_fail_run() {
    let harness = TestHarness::new();
    let sink = Arc::new(FailingEventSink::new());
    let pipeline = ReportPipeline::builder()
        .source(harness.source.clone())
        .delivery(harness.delivery.clone())
        .ledger(harness.ledger.clone())
        .event_sink(sink.clone())
        .clock(harness.clock.clone())
        .build()
        .unwrap();

    let summary = pipeline.run(Invocation::scheduled()).await;

    assert_eq!(summary.result, OutcomeResult::Success);
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test]
async fn test_builder_requires_collaborators() {
    let err = ReportPipeline::builder()
        .source(Arc::new(ScriptedSource::new()))
        .ledger(Arc::new(InMemoryLedgerStore::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ReportflowError::MissingComponent("delivery")));

    let err = ReportPipeline::builder()
        .source(Arc::new(ScriptedSource::new()))
        .delivery(Arc::new(ScriptedDelivery::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ReportflowError::MissingComponent("ledger")));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let config = ReportflowConfig {
        slo_seconds: -1.0,
        ..ReportflowConfig::default()
    };
    let err = ReportPipeline::builder()
        .source(Arc::new(ScriptedSource::new()))
        .delivery(Arc::new(ScriptedDelivery::new()))
        .ledger(Arc::new(InMemoryLedgerStore::new()))
        .config(config)
        .build()
        .unwrap_err();
    assert!(matches!(err, ReportflowError::Config(_)));
}
