//! Retry policy and executor
//!
//! Every failure is retried until the attempt budget runs out. The executor
//! reports how many attempts ran and how long the whole sequence took,
//! measured from the start of the first attempt, so callers can record one
//! end-to-end latency per logical call.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed-count, fixed-delay retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,

    /// Pause before every retry
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(1, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// Fixed number of retries with a constant delay
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause after failed attempt `attempt` (1-based). Zero once the budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_attempts() {
            return Duration::ZERO;
        }
        self.delay
    }
}

/// Result of a retried call
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final attempt's result
    pub result: Result<T, E>,
    /// Attempts made, at least 1
    pub attempts: u32,
    /// From the first attempt's start to the last attempt's end
    pub elapsed: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }

    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an async call with retries; `f` receives the 1-based attempt number
    pub async fn execute_with_context<F, Fut, T, E>(&self, label: &str, mut f: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            debug!("{}: attempt {} of {}", label, attempt, max_attempts);

            match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{}: succeeded after {} attempts", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        if max_attempts > 1 {
                            warn!("{}: failed after {} attempts: {}", label, attempt, error);
                        }
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        };
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        "{}: attempt {} failed: {}. Retrying in {:?}",
                        label, attempt, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Blocking flavour for calls made from pool threads
    pub fn execute_blocking<F, T, E>(&self, label: &str, mut f: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            debug!("{}: attempt {} of {}", label, attempt, max_attempts);

            match f(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{}: succeeded after {} attempts", label, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(error) if attempt >= max_attempts => {
                    if max_attempts > 1 {
                        warn!("{}: failed after {} attempts: {}", label, attempt, error);
                    }
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(error) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        "{}: attempt {} failed: {}. Retrying in {:?}",
                        label, attempt, error, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
