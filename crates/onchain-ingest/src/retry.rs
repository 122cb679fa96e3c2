//! Exponential backoff for transient source failures.

use std::future::Future;
use std::time::Duration;

use onchain_core::constants::DEFAULT_RPC_MAX_ATTEMPTS;
use onchain_core::error::SourceError;
use tracing::warn;

/// How often and how patiently to repeat a failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each further failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RPC_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    /// Sleep before attempt `attempt + 1`, given `attempt` (1-based) just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `call` until it succeeds, fails permanently, or the policy is spent.
///
/// Permanent errors are returned unchanged. Spending every attempt on
/// transient errors yields [`SourceError::RetriesExhausted`] wrapping the last one.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    method: &str,
    mut call: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                return Err(SourceError::RetriesExhausted {
                    method: method.to_owned(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(method, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient source failure, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport() -> SourceError {
        SourceError::Transport { method: "getblockcount".into(), message: "reset".into() }
    }

    fn rpc(code: i64) -> SourceError {
        SourceError::Rpc { method: "getblockhash".into(), code, message: "x".into() }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(5), "getblockcount", || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(transport()),
                1 => Err(rpc(-28)),
                _ => Ok(7u64),
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = with_retry(&RetryPolicy::immediate(5), "getblockhash", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(rpc(-5))
        })
        .await;
        assert_eq!(result, Err(rpc(-5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = with_retry(&RetryPolicy::immediate(3), "getblockcount", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transport())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SourceError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_transient());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(transport().is_transient());
        assert!(rpc(-28).is_transient());
        assert!(rpc(-10).is_transient());
        assert!(rpc(-8).is_transient());
        assert!(!rpc(-5).is_transient());
        assert!(!SourceError::Malformed { method: "m".into(), message: "x".into() }.is_transient());
    }
}
