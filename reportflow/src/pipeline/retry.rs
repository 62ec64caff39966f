//! Retry engine with exponential backoff and retryable/fatal classification.
//!
//! An operation is attempted up to `max_attempts` times. After a retryable
//! failure on attempt `n` the engine sleeps `base * 2^(n-1)` (capped at
//! `max_delay_ms`) before trying again. A fatal failure stops immediately.
//! Both the attempt itself and the backoff sleep race the [`CancelScope`],
//! so a deadline or token cancellation abandons the work in progress.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::cancellation::{CancelReason, CancelScope};
use crate::errors::{Classify, ErrorClass};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt-1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to spread out concurrent retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The extended budget used once a delivered report fails to finalize.
    ///
    /// More attempts and shorter waits than the remote steps, since giving
    /// up here risks a duplicate delivery on the next run.
    #[must_use]
    pub fn finalize_default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// The attempt budget, never less than one.
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// The un-jittered delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let n = attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(n - 1))
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(n)),
            BackoffStrategy::Constant => base,
        };
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = u64::try_from(self.delay_for_attempt(attempt).as_millis()).unwrap_or(u64::MAX);
        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

/// State tracking for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts started so far.
    pub attempts: u32,
    /// Delays scheduled between attempts, in order.
    pub delays: Vec<Duration>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the budget allows another attempt.
    #[must_use]
    pub fn has_remaining(&self, config: &RetryConfig) -> bool {
        self.attempts < config.effective_max_attempts()
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts left, give up.
    GiveUp,
    /// Don't retry, the error is fatal.
    NotRetryable,
}

/// Decides what to do after a failed attempt.
///
/// On `Retry` the delay is recorded in `state`.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, class: ErrorClass) -> RetryDecision {
    match class {
        ErrorClass::Fatal => RetryDecision::NotRetryable,
        ErrorClass::Retryable if !state.has_remaining(config) => RetryDecision::GiveUp,
        ErrorClass::Retryable => {
            let delay = config.jittered_delay_for_attempt(state.attempts);
            state.delays.push(delay);
            RetryDecision::Retry(delay)
        }
    }
}

/// A successful retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    /// The operation's value.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Delays slept between attempts.
    pub delays: Vec<Duration>,
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryFailureKind {
    /// Every attempt failed retryably.
    Exhausted,
    /// An attempt failed fatally.
    Fatal,
    /// The scope was cancelled or its deadline passed.
    Cancelled,
}

/// A terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    /// Why the engine stopped.
    pub kind: RetryFailureKind,
    /// The last error seen. `None` only when cancelled before any attempt failed.
    pub last_error: Option<E>,
    /// Set when `kind` is `Cancelled`.
    pub cancel_reason: Option<CancelReason>,
    /// Attempts started.
    pub attempts: u32,
    /// Delays scheduled between attempts.
    pub delays: Vec<Duration>,
}

impl<E> RetryFailure<E> {
    fn from_state(kind: RetryFailureKind, last_error: Option<E>, state: RetryState) -> Self {
        Self {
            kind,
            last_error,
            cancel_reason: None,
            attempts: state.attempts,
            delays: state.delays,
        }
    }

    fn cancelled(reason: CancelReason, last_error: Option<E>, state: RetryState) -> Self {
        Self {
            cancel_reason: Some(reason),
            ..Self::from_state(RetryFailureKind::Cancelled, last_error, state)
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.cancel_reason, &self.last_error) {
            (RetryFailureKind::Cancelled, Some(reason), _) => {
                write!(f, "{reason} after {} attempt(s)", self.attempts)
            }
            (RetryFailureKind::Exhausted, _, Some(err)) => {
                write!(f, "gave up after {} attempt(s): {err}", self.attempts)
            }
            (_, _, Some(err)) => write!(f, "{err}"),
            _ => write!(f, "operation failed after {} attempt(s)", self.attempts),
        }
    }
}

/// Executes an operation with retry logic, classifying errors via [`Classify`].
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    key: &str,
    scope: &CancelScope,
    operation: F,
) -> Result<RetryOutcome<T>, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    with_retry_classified(config, key, scope, |e: &E| e.class(), operation).await
}

/// Executes an operation with retry logic and an explicit classifier.
///
/// The operation receives the 1-based attempt number. It may run more than
/// once, so it must tolerate at-least-once execution.
pub async fn with_retry_classified<T, E, C, F, Fut>(
    config: &RetryConfig,
    key: &str,
    scope: &CancelScope,
    classify: C,
    mut operation: F,
) -> Result<RetryOutcome<T>, RetryFailure<E>>
where
    C: Fn(&E) -> ErrorClass,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut state = RetryState::new();
    let mut last_error: Option<E> = None;

    loop {
        if let Some(reason) = scope.check() {
            tracing::warn!(key, attempts = state.attempts, %reason, "Retry loop cancelled");
            return Err(RetryFailure::cancelled(reason, last_error, state));
        }

        state.attempts += 1;
        let attempt = state.attempts;
        tracing::debug!(key, attempt, "Starting attempt");

        let result = tokio::select! {
            biased;
            reason = scope.cancelled() => {
                tracing::warn!(key, attempt, %reason, "Attempt abandoned");
                return Err(RetryFailure::cancelled(reason, last_error, state));
            }
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(key, attempt, "Succeeded after retry");
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: state.attempts,
                    delays: state.delays,
                });
            }
            Err(error) => error,
        };

        let class = classify(&error);
        match should_retry(&mut state, config, class) {
            RetryDecision::Retry(delay) => {
                tracing::warn!(
                    key,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Retrying after error"
                );
                last_error = Some(error);
                tokio::select! {
                    biased;
                    reason = scope.cancelled() => {
                        tracing::warn!(key, attempt, %reason, "Backoff interrupted");
                        return Err(RetryFailure::cancelled(reason, last_error, state));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::GiveUp => {
                tracing::error!(key, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryFailure::from_state(
                    RetryFailureKind::Exhausted,
                    Some(error),
                    state,
                ));
            }
            RetryDecision::NotRetryable => {
                tracing::error!(key, attempt, error = %error, "Fatal error, not retrying");
                return Err(RetryFailure::from_state(
                    RetryFailureKind::Fatal,
                    Some(error),
                    state,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn throttled() -> SourceError {
        SourceError::RateLimited("Throttling".to_string())
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_retry_config_deserialize_partial() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[test]
    fn test_delay_exponential() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_linear_and_constant() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let constant = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for_attempt(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);
        assert_eq!(config.delay_for_attempt(11), Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Full);
        for _ in 0..20 {
            assert!(config.jittered_delay_for_attempt(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_should_retry_decisions() {
        let config = RetryConfig::new().with_max_attempts(2);
        let mut state = RetryState::new();

        state.attempts = 1;
        assert_eq!(
            should_retry(&mut state, &config, ErrorClass::Retryable),
            RetryDecision::Retry(Duration::from_millis(1000))
        );
        state.attempts = 2;
        assert_eq!(
            should_retry(&mut state, &config, ErrorClass::Retryable),
            RetryDecision::GiveUp
        );
        assert_eq!(
            should_retry(&mut state, &config, ErrorClass::Fatal),
            RetryDecision::NotRetryable
        );
        assert_eq!(state.delays, vec![Duration::from_millis(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_uses_b_then_2b() {
        let config = RetryConfig::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let result: Result<RetryOutcome<()>, _> = with_retry(&config, "fetch", &CancelScope::new(), |_| {
            let calls = calls.clone();
            async move {
                calls.lock().push(Instant::now());
                Err(throttled())
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Exhausted);
        assert_eq!(failure.attempts, 3);
        assert_eq!(
            failure.delays,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(failure.last_error, Some(throttled()));

        let offsets: Vec<Duration> = calls.lock().iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
        );
        // No delay after the final attempt.
        assert_eq!(Instant::now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_short_circuits_without_delay() {
        let config = RetryConfig::new();
        let start = Instant::now();
        let mut calls = 0;

        let result: Result<RetryOutcome<()>, _> = with_retry(&config, "fetch", &CancelScope::new(), |_| {
            calls += 1;
            async { Err(SourceError::Unauthorized("AccessDenied".to_string())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Fatal);
        assert_eq!(failure.attempts, 1);
        assert!(failure.delays.is_empty());
        assert_eq!(calls, 1);
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let config = RetryConfig::new().with_max_attempts(5).with_base_delay_ms(10);

        let result = with_retry(&config, "deliver", &CancelScope::new(), |attempt| async move {
            if attempt < 3 {
                Err(throttled())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, 42);
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.delays,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_disables_retry() {
        let config = RetryConfig::new().with_max_attempts(1);
        let result: Result<RetryOutcome<()>, _> =
            with_retry(&config, "fetch", &CancelScope::new(), |_| async { Err(throttled()) }).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Exhausted);
        assert_eq!(failure.attempts, 1);
        assert!(failure.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_treated_as_one() {
        let config = RetryConfig::new().with_max_attempts(0);
        let result = with_retry(&config, "fetch", &CancelScope::new(), |_| async {
            Ok::<_, SourceError>("data")
        })
        .await
        .unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier_is_honoured() {
        let config = RetryConfig::new();
        let result: Result<RetryOutcome<()>, _> = with_retry_classified(
            &config,
            "custom",
            &CancelScope::new(),
            |_: &String| ErrorClass::Fatal,
            |_| async { Err("anything".to_string()) },
        )
        .await;
        assert_eq!(result.unwrap_err().kind, RetryFailureKind::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_backoff() {
        let config = RetryConfig::new().with_base_delay_ms(10_000);
        let scope = CancelScope::new().with_timeout(Duration::from_secs(2));
        let start = Instant::now();

        let result: Result<RetryOutcome<()>, _> =
            with_retry(&config, "fetch", &scope, |_| async { Err(throttled()) }).await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Cancelled);
        assert_eq!(failure.cancel_reason, Some(CancelReason::DeadlineExceeded));
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.last_error, Some(throttled()));
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_inflight_attempt() {
        let config = RetryConfig::new();
        let scope = CancelScope::new().with_timeout(Duration::from_secs(1));

        let result: Result<RetryOutcome<()>, RetryFailure<SourceError>> = with_retry(&config, "deliver", &scope, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Cancelled);
        assert!(failure.last_error.is_none());
    }

    #[tokio::test]
    async fn test_already_cancelled_scope_makes_no_attempt() {
        let scope = CancelScope::new();
        scope.token().cancel("shutdown");
        let mut calls = 0;

        let result: Result<RetryOutcome<()>, RetryFailure<SourceError>> =
            with_retry(&RetryConfig::new(), "fetch", &scope, |_| {
                calls += 1;
                async { Ok(()) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, RetryFailureKind::Cancelled);
        assert_eq!(failure.attempts, 0);
        assert_eq!(calls, 0);
    }
}
