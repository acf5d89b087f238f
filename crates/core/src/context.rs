//! Call context — deadline and cancellation carried into every validator call.
//!
//! A dispatch receives a [`CallContext`] from its caller and derives a child
//! for each validator. Cancelling a parent cancels all children; a child's
//! deadline never extends past its parent's.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;

#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context with no deadline that is never cancelled unless asked to.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// A fresh context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    /// A child sharing this context's deadline, cancelled along with it.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    /// A child whose deadline is the earlier of ours and `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(candidate),
                None => candidate,
            }),
            token: self.token.child_token(),
        }
    }

    /// A child that applies `fallback` only when no deadline is set yet.
    pub fn child_or_timeout(&self, fallback: Duration) -> Self {
        match self.deadline {
            Some(_) => self.child(),
            None => self.child_with_timeout(fallback),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), CallError> {
        if self.token.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CallError::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Drive `fut` until it completes, the deadline passes, or the context is cancelled.
    ///
    /// The future is dropped on expiry, which is what aborts in-flight work
    /// (child processes spawned with `kill_on_drop`, pending RPC calls).
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, CallError>
    where
        F: Future,
    {
        self.check()?;
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CallError::Cancelled),
            _ = expiry => Err(CallError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
