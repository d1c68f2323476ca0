//! Bounded retry policies with configurable backoff
//!
//! Every recoverable failure kind (queue submission, local execution, disk
//! writes, reductions) gets its own [`RetryPolicy`]. Policies are plain data
//! so they can live in the run configuration and be tuned per error kind.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one error kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Backoff strategy between attempts
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays
    #[serde(default)]
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: BackoffStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay between every attempt
    Fixed,
    /// Delay grows by a constant increment
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Delay is multiplied by `base` after each attempt
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: default_exponential_base(),
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy with a hard attempt cap
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: BackoffStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }

    /// Exponential policy starting at `initial_delay`
    pub fn exponential(attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            backoff: BackoffStrategy::default(),
            initial_delay,
            max_delay,
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }

    /// Policy that never sleeps, used by tests and dry runs
    pub fn immediate(attempts: u32) -> Self {
        Self::fixed(attempts, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match &self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear { increment } => {
                self.initial_delay + increment.saturating_mul(attempt - 1)
            }
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(attempt as i32 - 1);
                let secs = self.initial_delay.as_secs_f64() * multiplier;
                if secs.is_finite() {
                    Duration::from_secs_f64(secs.clamp(0.0, self.max_delay.as_secs_f64()))
                } else {
                    self.max_delay
                }
            }
        };

        self.apply_jitter(base_delay.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }

    /// Describe every setting that would make the policy unusable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.attempts == 0 {
            problems.push("attempts must be at least 1".to_string());
        }
        if let BackoffStrategy::Exponential { base } = self.backoff {
            if !base.is_finite() || base <= 0.0 {
                problems.push(format!("backoff base must be a positive number, got {}", base));
            }
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            problems.push(format!(
                "jitter_factor must be between 0 and 1, got {}",
                self.jitter_factor
            ));
        }
        problems
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

/// Outcome of a retried operation that ran out of attempts
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy's attempt budget is spent
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    context: &str,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", context, attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if !policy.allows_retry(attempt) {
                    warn!(
                        "{} failed after {} attempt(s): {}",
                        context, attempt, err
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    context, attempt, policy.attempts, delay, err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_exponential_base() -> f64 {
    2.0
}
