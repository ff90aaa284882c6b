//! Async utilities for cancellation-aware stream reads.
//!
//! Every open stream read in the engine is paired with a
//! `CancellationToken`; `OrCancelExt` races a future against that token and
//! optionally against an idle deadline.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a raced future did not produce its output.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CancelErr {
    /// The token was cancelled first.
    Cancelled,
    /// The deadline passed before the future resolved.
    DeadlineElapsed(Duration),
}

/// Extension trait for making futures cancellable.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Race this future against the cancellation token.
    ///
    /// Returns `Ok(output)` if the future completes first, or
    /// `Err(CancelErr::Cancelled)` if the token is cancelled.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;

    /// Race this future against the token and, when `deadline` is set,
    /// against a timer of that length.
    ///
    /// Cancellation wins ties: an already-cancelled token always yields
    /// `Cancelled`, even with a zero deadline.
    async fn or_cancel_within(
        self,
        token: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }

    async fn or_cancel_within(
        self,
        token: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<Self::Output, CancelErr> {
        let Some(limit) = deadline else {
            return self.or_cancel(token).await;
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
            _ = tokio::time::sleep(limit) => Err(CancelErr::DeadlineElapsed(limit)),
        }
    }
}
