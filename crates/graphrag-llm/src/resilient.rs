//! Resilient generation calls
//!
//! Wraps any [`TextGenerator`] with:
//!
//! - a per-call timeout (a timed-out call is not retried),
//! - bounded retry with exponential backoff for transient failures and rate
//!   limits (honoring a server-provided retry-after when it is longer),
//! - no retry for permanent failures.

use async_trait::async_trait;
use rand::random;
use std::time::Duration;

use crate::error::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Relative jitter, `0.1` = ±10%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::exponential()
        }
    }

    /// Backoff before retry number `attempt + 1` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let clamped = (base * jitter_factor).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

/// [`TextGenerator`] decorator adding timeout and retry.
pub struct ResilientGenerator<G> {
    inner: G,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl<G: TextGenerator> ResilientGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.generate(request))
                .await
                .unwrap_or(Err(GenerationError::Timeout(limit))),
            None => self.inner.generate(request).await,
        }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for ResilientGenerator<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let backoff = self.policy.delay_for_attempt(attempt);
                    let delay = err
                        .retry_after()
                        .map_or(backoff, |hint| hint.max(backoff))
                        .min(self.policy.max_delay);
                    tracing::warn!(
                        generator = %self.inner.describe(),
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::FnGenerator;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn counting<F>(f: F) -> (Arc<AtomicU32>, impl TextGenerator)
    where
        F: Fn(u32) -> Result<String, GenerationError> + Send + Sync,
    {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let g = FnGenerator::new(move |_req: &GenerationRequest| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            f(n)
        });
        (calls, g)
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let p = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential()
        };
        approx::assert_relative_eq!(p.delay_for_attempt(0).as_secs_f64(), 0.5);
        approx::assert_relative_eq!(p.delay_for_attempt(1).as_secs_f64(), 1.0);
        approx::assert_relative_eq!(p.delay_for_attempt(2).as_secs_f64(), 2.0);
        assert_eq!(p.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_in_band() {
        let p = RetryPolicy::exponential();
        for _ in 0..100 {
            let d = p.delay_for_attempt(0).as_secs_f64();
            assert!((0.45..=0.55).contains(&d), "{d}");
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let (calls, g) = counting(|n| {
            if n < 2 {
                Err(GenerationError::Transient("503".into()))
            } else {
                Ok("done".into())
            }
        });
        let r = ResilientGenerator::new(g, fast_policy(3), None);
        assert_eq!(r.generate(&GenerationRequest::new("p")).await.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (calls, g) = counting(|_| Err(GenerationError::RateLimited { retry_after: None }));
        let r = ResilientGenerator::new(g, fast_policy(4), None);
        let err = r.generate(&GenerationRequest::new("p")).await.unwrap_err();
        assert!(matches!(err, GenerationError::RateLimited { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let (calls, g) = counting(|_| Err(GenerationError::Permanent("content filtered".into())));
        let r = ResilientGenerator::new(g, fast_policy(5), None);
        assert!(matches!(
            r.generate(&GenerationRequest::new("p")).await,
            Err(GenerationError::Permanent(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Slow;

    #[async_trait]
    impl TextGenerator for Slow {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn timeout_is_a_failure_and_not_retried() {
        let r = ResilientGenerator::new(Slow, fast_policy(3), Some(Duration::from_millis(20)));
        let started = std::time::Instant::now();
        let err = r.generate(&GenerationRequest::new("p")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(d) if d == Duration::from_millis(20)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
