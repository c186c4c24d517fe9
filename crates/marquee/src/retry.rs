//! 🔁 Retry with capped exponential backoff.
//!
//! Only transient failures (see [`crate::error::is_transient`]) are retried.
//! Everything else comes straight back on the first attempt, because retrying
//! a syntax error is not resilience, it's denial.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, warn};

use crate::error::is_transient;

/// ⏳ How long to wait, how much longer each time, and when to stop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub start_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// `None` retries until the thing comes back. Or the heat death of the universe.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// 📐 `min(start_delay * factor^attempt, max_delay)`, with `attempt` counted from 0.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.start_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled.max(0.0))
        }
    }

    /// 🧪 zero sleeps, fixed budget. for tests that don't want to nap.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            start_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
            max_attempts: Some(max_attempts),
        }
    }
}

/// 🔄 Run `op` until it succeeds, fails for real, or runs out of attempts.
///
/// `label` goes into every log line so the 3am reader knows which call is flapping.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                attempt += 1;
                if let Some(max_attempts) = policy.max_attempts {
                    if attempt >= max_attempts {
                        error!(
                            "💀 {label}: giving up after {attempt} attempts: {:#}",
                            err
                        );
                        return Err(err);
                    }
                }
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    "⚠️ {label}: attempt {attempt} failed ({:#}), retrying in {:?}",
                    err, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!("💀 {label}: failed permanently: {:#}", err);
                return Err(err);
            }
        }
    }
}
