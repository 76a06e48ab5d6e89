//! Retry-with-backoff wrapper shared by every external call.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, CompletionError, CompletionRequest, TextCompletion};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-suggested minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CompletionError {
    fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Provider { transient, .. } => *transient,
            CompletionError::RateLimited { .. } | CompletionError::Timeout(_) => true,
            // Re-prompting is the caller's job; blind retries repeat the same output.
            CompletionError::MalformedOutput(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CompletionError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let mut backoff = self.backoff_for(attempt);
                    if let Some(hint) = e.retry_after() {
                        backoff = backoff.max(hint);
                    }
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::error!(operation = label, attempt, error = %e, "Giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Decorates a backend with a per-call timeout and the retry policy.
pub struct RetryingCompletion<C> {
    inner: C,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<C: TextCompletion> RetryingCompletion<C> {
    pub fn new(inner: C, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl<C: TextCompletion> TextCompletion for RetryingCompletion<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let label = request.operation.clone();
        self.policy
            .run(&label, || {
                let request = request.clone();
                async move {
                    match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(CompletionError::Timeout(self.timeout)),
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::Canned;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(1500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(1500));
    }

    #[test]
    fn test_malformed_output_is_not_retryable() {
        assert!(!CompletionError::MalformedOutput("x".into()).is_retryable());
        assert!(!CompletionError::rejected("401").is_retryable());
        assert!(CompletionError::provider("reset").is_retryable());
        assert!(CompletionError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let inner = Canned::new(vec![
            Err(CompletionError::RateLimited { retry_after: None }),
            Err(CompletionError::provider("connection reset")),
            Ok(Completion::new("done")),
        ]);
        let client = RetryingCompletion::new(inner, fast_policy(5), Duration::from_secs(5));

        let result = client.complete(CompletionRequest::new("test")).await.unwrap();
        assert_eq!(result.text, "done");
        assert_eq!(client.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_budget() {
        let inner = Canned::new(vec![
            Err(CompletionError::provider("a")),
            Err(CompletionError::provider("b")),
            Ok(Completion::new("too late")),
        ]);
        let client = RetryingCompletion::new(inner, fast_policy(2), Duration::from_secs(5));

        let err = client.complete(CompletionRequest::new("test")).await.unwrap_err();
        assert_eq!(err, CompletionError::provider("b"));
        assert_eq!(client.inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_malformed_output() {
        let inner = Canned::new(vec![
            Err(CompletionError::MalformedOutput("bad".into())),
            Ok(Completion::new("unused")),
        ]);
        let client = RetryingCompletion::new(inner, fast_policy(5), Duration::from_secs(5));

        let err = client.complete(CompletionRequest::new("test")).await.unwrap_err();
        assert!(matches!(err, CompletionError::MalformedOutput(_)));
        assert_eq!(client.inner.calls(), 1);
    }

    struct Slow;

    #[async_trait]
    impl TextCompletion for Slow {
        async fn complete(&self, _: CompletionRequest) -> Result<Completion, CompletionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Completion::new("never"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_retryable_error() {
        let client = RetryingCompletion::new(Slow, fast_policy(2), Duration::from_millis(10));
        let err = client.complete(CompletionRequest::new("slow")).await.unwrap_err();
        assert_eq!(err, CompletionError::Timeout(Duration::from_millis(10)));
    }
}
