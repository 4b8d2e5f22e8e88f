use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{ChorusError, Result};

/// Cancellation and deadline signal for one top-level query.
///
/// Cloning a `QueryContext` yields another handle to the **same** signal:
/// canceling any clone cancels them all. Every concurrent task of a fan-out
/// receives a clone, so one `cancel()` aborts all in-flight provider calls.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context with no deadline that is only canceled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context that is canceled with `self` but can also be canceled
    /// on its own. The deadline is inherited.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the context has been canceled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `fut` to completion unless the context is canceled or its
    /// deadline passes first. The losing future is dropped, which aborts any
    /// network exchange it owns.
    pub async fn run<T, F>(&self, provider: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(ChorusError::Canceled {
                provider: provider.to_string(),
            });
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ChorusError::Canceled {
                provider: provider.to_string(),
            }),
            _ = expired => Err(ChorusError::Timeout {
                provider: provider.to_string(),
            }),
            result = fut => result,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
