//! Per-operation cancellation and deadline
//!
//! Every [`UserStore`](crate::UserStore) operation takes an [`OpContext`].
//! Waiting for the accounting guard and staging statements race against the
//! context; when the context wins, the operation future is dropped, which
//! releases the guard and rolls back the open transaction. Commits are not
//! raced.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that never cancels and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the context is already canceled or past its deadline
    pub fn check(&self) -> Result<()> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(StoreError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `operation` until it completes or the context ends.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let canceled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = canceled => Err(StoreError::Canceled),
            () = expired => Err(StoreError::DeadlineExceeded),
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = OpContext::background();
        let value = ctx.run(async { Ok::<_, StoreError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_already_canceled() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = OpContext::background().with_cancellation(token);

        let result = ctx.run(async { Ok::<_, StoreError>(()) }).await;
        assert!(matches!(result, Err(StoreError::Canceled)));
    }

    #[tokio::test]
    async fn test_cancel_during_operation() {
        let token = CancellationToken::new();
        let ctx = OpContext::background().with_cancellation(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Canceled)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(20));

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StoreError>(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let ctx = OpContext::background().with_timeout(Duration::from_secs(5));
        let result = ctx
            .run(async { Err::<(), _>(StoreError::NotFound("id 1".to_string())) })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
