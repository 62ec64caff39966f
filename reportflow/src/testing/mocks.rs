//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::core::ReportDate;
use crate::errors::{DeliveryError, LedgerError, SinkError, SourceError};
use crate::events::EventSink;
use crate::ports::{
    CostSource, DeliveryReference, InMemoryLedgerStore, LedgerEntry, LedgerStore, PutOutcome,
    ReportDelivery,
};
use crate::report::{ComposedReport, CostData};

/// A cost source that replays queued responses, then a fallback.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<CostData, SourceError>>>,
    fallback: Mutex<Option<Result<CostData, SourceError>>>,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    /// Creates a source with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source that always returns `data`.
    #[must_use]
    pub fn returning(data: CostData) -> Self {
        let source = Self::new();
        source.set_fallback(Ok(data));
        source
    }

    /// Creates a source that always fails with `error`.
    #[must_use]
    pub fn failing(error: SourceError) -> Self {
        let source = Self::new();
        source.set_fallback(Err(error));
        source
    }

    /// Queues one response ahead of the fallback.
    pub fn push(&self, response: Result<CostData, SourceError>) {
        self.script.lock().push_back(response);
    }

    /// Sets the response used once the queue is empty.
    pub fn set_fallback(&self, response: Result<CostData, SourceError>) {
        *self.fallback.lock() = Some(response);
    }

    /// Makes every call take `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns the number of times fetch was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns when each call started.
    #[must_use]
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CostSource for ScriptedSource {
    async fn fetch(&self, _report_date: ReportDate) -> Result<CostData, SourceError> {
        self.calls.lock().push(Instant::now());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted
            .or_else(|| self.fallback.lock().clone())
            .unwrap_or_else(|| Err(SourceError::Unclassified("script exhausted".to_string())))
    }
}

/// A delivery channel that replays queued failures and records what it sent.
#[derive(Debug, Default)]
pub struct ScriptedDelivery {
    script: Mutex<VecDeque<DeliveryError>>,
    fallback: Mutex<Option<DeliveryError>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<(ReportDate, ComposedReport, DeliveryReference)>>,
}

impl ScriptedDelivery {
    /// Creates a delivery channel that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delivery channel that always fails with `error`.
    #[must_use]
    pub fn failing(error: DeliveryError) -> Self {
        let delivery = Self::new();
        *delivery.fallback.lock() = Some(error);
        delivery
    }

    /// Queues one failure ahead of the fallback behavior.
    pub fn push_failure(&self, error: DeliveryError) {
        self.script.lock().push_back(error);
    }

    /// Makes every call take `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns the number of times deliver was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns every successful delivery, oldest first.
    #[must_use]
    pub fn delivered(&self) -> Vec<(ReportDate, ComposedReport, DeliveryReference)> {
        self.delivered.lock().clone()
    }

    /// Returns the number of successful deliveries.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl ReportDelivery for ScriptedDelivery {
    async fn deliver(
        &self,
        report_date: ReportDate,
        report: &ComposedReport,
    ) -> Result<DeliveryReference, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self.script.lock().pop_front();
        if let Some(error) = scripted.or_else(|| self.fallback.lock().clone()) {
            return Err(error);
        }
        let mut delivered = self.delivered.lock();
        let reference = DeliveryReference::new(format!("msg-{}", delivered.len() + 1));
        delivered.push((report_date, report.clone(), reference.clone()));
        Ok(reference)
    }
}

#[derive(Debug, Clone)]
struct PutFailure {
    error: LedgerError,
    commit: bool,
}

/// A ledger store that fails on demand in front of an in-memory store.
#[derive(Debug, Default)]
pub struct FlakyLedgerStore {
    inner: InMemoryLedgerStore,
    get_failures: Mutex<VecDeque<LedgerError>>,
    put_failures: Mutex<VecDeque<PutFailure>>,
    put_latency: Mutex<Option<Duration>>,
    put_calls: AtomicUsize,
}

impl FlakyLedgerStore {
    /// Creates a store that does not fail yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` reads fail with `error`.
    pub fn fail_next_gets(&self, n: usize, error: LedgerError) {
        self.get_failures
            .lock()
            .extend(std::iter::repeat(error).take(n));
    }

    /// Makes the next `n` conditional writes fail with `error` without writing.
    pub fn fail_next_puts(&self, n: usize, error: LedgerError) {
        self.queue_put_failures(n, error, false);
    }

    /// Makes the next `n` conditional writes apply, then report `error`.
    ///
    /// Models a timeout that hides a committed write.
    pub fn fail_next_puts_after_commit(&self, n: usize, error: LedgerError) {
        self.queue_put_failures(n, error, true);
    }

    fn queue_put_failures(&self, n: usize, error: LedgerError, commit: bool) {
        self.put_failures
            .lock()
            .extend(std::iter::repeat(PutFailure { error, commit }).take(n));
    }

    /// Delays every conditional write by `latency` before it applies.
    pub fn set_put_latency(&self, latency: Duration) {
        *self.put_latency.lock() = Some(latency);
    }

    /// Returns the number of conditional writes attempted.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// The store behind the failures.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryLedgerStore {
        &self.inner
    }
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn get(&self, report_date: ReportDate) -> Result<Option<LedgerEntry>, LedgerError> {
        let failure = self.get_failures.lock().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.inner.get(report_date).await,
        }
    }

    async fn put_if_absent(&self, entry: LedgerEntry) -> Result<PutOutcome, LedgerError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.put_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.put_failures.lock().pop_front();
        match failure {
            Some(PutFailure { error, commit }) => {
                if commit {
                    self.inner.put_if_absent(entry).await?;
                }
                Err(error)
            }
            None => self.inner.put_if_absent(entry).await,
        }
    }

    async fn delete(&self, report_date: ReportDate) -> Result<bool, LedgerError> {
        self.inner.delete(report_date).await
    }
}

/// An event sink that rejects every event.
#[derive(Debug, Default)]
pub struct FailingEventSink {
    attempts: AtomicUsize,
}

impl FailingEventSink {
    /// Creates a failing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many events were offered.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for FailingEventSink {
    async fn emit(
        &self,
        event_type: &str,
        _data: Option<serde_json::Value>,
    ) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected(format!("sink offline, dropped {event_type}")))
    }
}
