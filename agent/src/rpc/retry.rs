//! Bounded exponential backoff for idempotent calls

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::AgentError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Retries an idempotent call until it succeeds, fails terminally, or runs
/// out of attempts. Waits 2s, 4s, 8s ... capped at one minute between tries.
#[derive(Debug, Clone)]
pub struct Retry {
    max_attempts: u32,
    backoff: CooldownOptions,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl Retry {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: CooldownOptions::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: CooldownOptions) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `call`, retrying retriable failures.
    ///
    /// Returns the last error once attempts are exhausted, the first terminal
    /// error immediately, and `Cancelled` if `ctx` fires while waiting.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        name: &str,
        mut call: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;
            if !err.is_retriable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let wait = calc_exp_backoff(&self.backoff, attempt - 1);
            warn!(call = name, attempt, ?wait, "Retriable failure: {}", err);
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(AgentError::Cancelled(format!("{} was cancelled while retrying: {}", name, err)));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::status::{RpcCode, RpcError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast() -> CooldownOptions {
        CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = Retry::new(5)
            .with_backoff(fast())
            .run(&CancellationToken::new(), "test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AgentError::Rpc(RpcError::new(RpcCode::Unavailable, "down")))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_aborts_on_terminal_code() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = Retry::new(5)
            .with_backoff(fast())
            .run(&CancellationToken::new(), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Rpc(RpcError::new(RpcCode::PermissionDenied, "no")))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = Retry::new(3)
            .with_backoff(fast())
            .run(&CancellationToken::new(), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Rpc(RpcError::new(RpcCode::Internal, "boom")))
            })
            .await;

        assert_eq!(result.unwrap_err().code(), RpcCode::Internal);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result: Result<(), _> = Retry::new(10)
            .run(&ctx, "test", || async {
                Err(AgentError::Rpc(RpcError::new(RpcCode::Unavailable, "down")))
            })
            .await;

        assert!(matches!(result, Err(AgentError::Cancelled(_))));
    }
}
