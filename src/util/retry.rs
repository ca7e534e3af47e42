//! Retry with a linear, capped backoff schedule.
//!
//! Remote rate limits in this domain are fixed-window, so the delay before
//! attempt `k` grows linearly (`base * (k - 1)`) and is capped at
//! `max_interval` instead of growing exponentially. Total retry duration and
//! call cadence are part of the observable contract.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::sleep::sleep_or_cancel;
use crate::auth::CredentialRefreshCoordinator;
use crate::error::{
    Disposition, ErrorClassifier, Fault, FaultClassifier, Result, ATTEMPTS_PROPERTY,
    RETRIES_EXHAUSTED_PROPERTY,
};

/// Retry policy configuration.
///
/// Immutable once built; clone it freely or share it across concurrent
/// retriers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    max_attempts: u32,
    /// Delay before the second attempt; later delays grow by this step.
    base_interval: Duration,
    /// Upper bound on any single delay.
    max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Build a validated policy.
    ///
    /// Fails with a configuration fault when `max_attempts` is zero or
    /// `base_interval` exceeds `max_interval`.
    pub fn new(max_attempts: u32, base_interval: Duration, max_interval: Duration) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Fault::configuration("max_attempts must be at least 1")
                .with_property("max_attempts", max_attempts.to_string()));
        }
        if base_interval > max_interval {
            return Err(Fault::configuration(
                "base_interval must not exceed max_interval",
            )
            .with_property("base_interval_ms", base_interval.as_millis().to_string())
            .with_property("max_interval_ms", max_interval.as_millis().to_string()));
        }
        Ok(Self {
            max_attempts,
            base_interval,
            max_interval,
        })
    }

    /// Try once, never sleep.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Delay slept before `attempt` (1-based). Attempt 1 runs immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_interval
            .saturating_mul(attempt - 1)
            .min(self.max_interval)
    }

    /// Delays before attempts `2..=max_attempts`.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (2..=self.max_attempts).map(|attempt| self.delay_before(attempt))
    }
}

/// Runs remote operations under a [`RetryPolicy`].
///
/// Each `execute` call keeps its own attempt counter and refresh budget, so
/// one retrier can serve concurrent callers.
///
/// # Example
/// ```no_run
/// use converge::error::Fault;
/// use converge::util::retry::{BackoffRetrier, RetryPolicy};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> converge::error::Result<()> {
/// let retrier = BackoffRetrier::new(RetryPolicy::default());
/// let volume_id = retrier
///     .execute(&CancellationToken::new(), || async {
///         Ok::<_, Fault>("vol-1".to_string())
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BackoffRetrier {
    policy: RetryPolicy,
    classifier: Arc<dyn FaultClassifier>,
    refresh: Option<Arc<CredentialRefreshCoordinator>>,
}

impl BackoffRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: Arc::new(ErrorClassifier),
            refresh: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Recover from rejected credentials through `coordinator`. Without one,
    /// credential faults are terminal.
    pub fn with_refresh(mut self, coordinator: Arc<CredentialRefreshCoordinator>) -> Self {
        self.refresh = Some(coordinator);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails terminally, runs out of
    /// attempts, or `cancel` fires.
    pub async fn execute<F, Fut, T>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let span = tracing::info_span!(
            "retry",
            operation_id = %Uuid::new_v4(),
            max_attempts = self.policy.max_attempts,
        );
        self.run(cancel, operation).instrument(span).await
    }

    async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut budget = self.refresh.as_ref().map(|r| r.budget());
        // `attempt` is the budgeted position in the schedule; `invocations`
        // also counts the free retry after each refresh.
        let mut attempt: u32 = 1;
        let mut invocations: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Fault::cancelled("operation cancelled before attempt")
                    .with_property(ATTEMPTS_PROPERTY, invocations.to_string()));
            }

            let generation = self
                .refresh
                .as_ref()
                .map(|r| r.credential().generation())
                .unwrap_or_default();

            invocations += 1;
            let fault = match operation().await {
                Ok(value) => {
                    if invocations > 1 {
                        tracing::info!(attempt, invocations, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(fault) => fault,
            };

            match self.classifier.classify(&fault) {
                Disposition::Terminal => {
                    tracing::debug!(attempt, error = %fault, "terminal fault, not retrying");
                    return Err(fault);
                }
                Disposition::RetryableAfterRefresh => {
                    let (Some(coordinator), Some(budget)) = (self.refresh.as_ref(), budget.as_mut())
                    else {
                        tracing::debug!(error = %fault, "no credential refresh configured");
                        return Err(fault);
                    };
                    tracing::warn!(attempt, error = %fault, "credential rejected, refreshing");
                    coordinator
                        .refresh_within(budget, fault, generation, cancel)
                        .await
                        .map_err(|refresh_fault| {
                            if refresh_fault.is_cancelled() {
                                refresh_fault
                                    .with_property(ATTEMPTS_PROPERTY, invocations.to_string())
                            } else {
                                refresh_fault
                            }
                        })?;
                    // The retry after a refresh does not consume an attempt.
                    continue;
                }
                Disposition::RetryableTransient => {
                    if attempt >= max_attempts {
                        tracing::error!(attempts = attempt, error = %fault, "retry budget exhausted");
                        return Err(fault
                            .wrap(format!("retry budget exhausted after {attempt} attempt(s)"))
                            .with_property(RETRIES_EXHAUSTED_PROPERTY, "true")
                            .with_property(ATTEMPTS_PROPERTY, invocations.to_string()));
                    }

                    attempt += 1;
                    let delay = self.policy.delay_before(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %fault,
                        "retrying after transient fault"
                    );
                    sleep_or_cancel(delay, cancel)
                        .await
                        .map_err(|cancelled| {
                            cancelled
                                .wrap(fault.to_string())
                                .with_property(ATTEMPTS_PROPERTY, invocations.to_string())
                        })?;
                }
            }
        }
    }
}
