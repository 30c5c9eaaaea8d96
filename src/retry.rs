use crate::config::ProcessingConfig;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

/// How the retry engine treats a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Throttled by the remote side, optionally with a server-provided wait.
    RateLimited(Option<Duration>),
    Transient,
    Permanent,
}

pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls allowed, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the extra random delay, as a fraction of the backoff.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            jitter: config.jitter,
        }
    }

    /// `base_delay * 2^attempt` plus up to `jitter` of that again.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        if self.jitter <= 0.0 {
            return exponential;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        exponential + exponential.mul_f64(extra)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let hint = match err.retry_class() {
                RetryClass::Permanent => return Err(err),
                RetryClass::RateLimited(hint) => hint,
                RetryClass::Transient => None,
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                warn!(
                    target = "export.retry",
                    call = name,
                    attempts = attempt,
                    error = %err,
                    "retry_exhausted"
                );
                return Err(err);
            }
            let delay = match hint {
                Some(wait) if !wait.is_zero() => wait,
                _ => self.backoff(attempt - 1),
            };
            warn!(
                target = "export.retry",
                call = name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying_call"
            );
            sleep(delay).await;
        }
    }
}

/// Keeps at least `1 / rps` between the end of one call and the start of
/// the next. Calls through one limiter are serialised.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_finished: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_second(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_finished: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let mut last = self.last_finished.lock().await;
        if let Some(previous) = *last {
            let ready = previous + self.min_interval;
            if ready > Instant::now() {
                debug!(
                    target = "export.retry",
                    wait_ms = (ready - Instant::now()).as_millis() as u64,
                    "rate_limit_wait"
                );
                sleep_until(ready).await;
            }
        }
        let output = fut.await;
        *last = Some(Instant::now());
        output
    }
}

/// Retry policy and rate limiter applied together to every remote call.
#[derive(Debug)]
pub struct Submitter {
    policy: RetryPolicy,
    limiter: RateLimiter,
}

impl Submitter {
    pub fn new(policy: RetryPolicy, limiter: RateLimiter) -> Self {
        Self { policy, limiter }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(
            RetryPolicy::from_config(config),
            RateLimiter::per_second(config.requests_per_second),
        )
    }

    pub async fn call<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.policy
            .run(name, || self.limiter.run(op()))
            .await
    }
}
