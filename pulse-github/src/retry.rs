//! Rate-limit backoff around a query executor

use async_trait::async_trait;
use chrono::Utc;
use pulse_core::LimitsConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::graphql::{QueryExecutor, QueryResponse};
use crate::pagination::Budget;
use crate::{Error, Result};

/// Bounded exponential backoff for rate-limited requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_attempts: limits.retry_attempts.max(1),
            base_delay: limits.retry_base_delay,
            max_delay: limits.retry_max_delay,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay for a failure, waiting for the advertised reset when it is later
    fn delay_for(&self, retry: u32, err: &Error) -> Duration {
        let backoff = self.backoff(retry);
        let until_reset = match err {
            Error::RateLimited {
                reset_at: Some(at), ..
            } => (*at - Utc::now()).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        backoff.max(until_reset).min(self.max_delay)
    }
}

/// Executor wrapper that retries rate-limited requests
///
/// Any other failure is returned on the first attempt. Once attempts run
/// out the last `RateLimited` error is returned for the caller to treat as
/// a per-unit failure.
///
/// Callers claim the first attempt from their budget; each retry claims one
/// more from the budget given to [`RetryingExecutor::with_budget`].
#[derive(Debug)]
pub struct RetryingExecutor<E> {
    inner: E,
    policy: RetryPolicy,
    budget: Budget,
}

impl<E> RetryingExecutor<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            budget: Budget::unlimited(),
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: QueryExecutor> QueryExecutor for RetryingExecutor<E> {
    async fn execute(&self, query: &str, variables: &Value) -> Result<QueryResponse> {
        let mut retry = 0;
        loop {
            match self.inner.execute(query, variables).await {
                Err(err) if err.is_rate_limited() && retry + 1 < self.policy.max_attempts => {
                    if let Err(exhausted) = self.budget.try_acquire() {
                        warn!(reason = %exhausted, "Rate limited with no request budget left");
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(retry, &err);
                    warn!(
                        attempt = retry + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}
