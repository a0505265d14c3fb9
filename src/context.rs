//! Cooperative cancellation and deadlines for blocking waits.
//!
//! A [`WaitContext`] is cheap to clone and carries an optional deadline plus
//! the cancellation signals of every ancestor. Deriving a child never affects
//! the parent: cancelling a child handle leaves the parent running, while
//! cancelling the parent is observed by all children.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::select_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Reason a context finished.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ContextError {
    /// A [`CancelHandle`] fired.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Handle that cancels the context it was created with, and its children.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancels the associated context. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Deadline and cancellation scope passed to every blocking wait.
#[derive(Clone, Debug, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    signals: Vec<watch::Receiver<bool>>,
}

impl WaitContext {
    /// Returns a context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child that expires after `timeout`, or at the parent's
    /// deadline when that comes first. A timeout too large to represent as
    /// an instant adds no deadline of its own.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derives a child that expires at `deadline`, or at the parent's
    /// deadline when that comes first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = self
            .deadline
            .map_or(deadline, |current| current.min(deadline));
        Self {
            deadline: Some(effective),
            signals: self.signals.clone(),
        }
    }

    /// Derives a child together with the handle that cancels it.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(receiver);
        (
            Self {
                deadline: self.deadline,
                signals,
            },
            CancelHandle {
                sender: Arc::new(sender),
            },
        )
    }

    /// Returns the effective deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reports whether the context has already finished, without blocking.
    #[must_use]
    pub fn error(&self) -> Option<ContextError> {
        if self.signals.iter().any(|signal| *signal.borrow()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.cancelled() => ContextError::Cancelled,
                    () = sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    async fn cancelled(&self) {
        if self.signals.is_empty() {
            return pending().await;
        }
        let waits = self.signals.iter().cloned().map(|mut signal| {
            Box::pin(async move {
                // A dropped handle can never cancel.
                if signal.wait_for(|flag| *flag).await.is_err() {
                    pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn background_never_finishes() {
        let ctx = WaitContext::background();
        assert_eq!(ctx.error(), None);
        let outcome = timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(outcome.is_err(), "background context must stay pending");
    }

    #[tokio::test]
    async fn deadline_is_reported_as_exceeded() {
        let ctx = WaitContext::background().with_timeout(Duration::from_millis(5));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.error(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (ctx, handle) = WaitContext::background().with_cancel();
        let waiter = tokio::spawn(async move { ctx.done().await });
        handle.cancel();
        let reason = waiter.await.expect("join waiter");
        assert_eq!(reason, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn children_observe_parent_cancellation_but_not_vice_versa() {
        let (parent, parent_handle) = WaitContext::background().with_cancel();
        let (child, child_handle) = parent.with_cancel();

        child_handle.cancel();
        assert_eq!(child.error(), Some(ContextError::Cancelled));
        assert_eq!(parent.error(), None);

        let (sibling, _sibling_handle) = parent.with_cancel();
        parent_handle.cancel();
        assert_eq!(sibling.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn unrepresentable_timeout_keeps_the_parent_deadline() {
        let unbounded = WaitContext::background().with_timeout(Duration::MAX);
        assert_eq!(unbounded.deadline(), None);
        assert_eq!(unbounded.error(), None);

        let parent = WaitContext::background().with_timeout(Duration::from_secs(30));
        let child = parent.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn child_keeps_the_earlier_deadline() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let parent = WaitContext::background().with_timeout(Duration::from_secs(1));
            let child = parent.with_timeout(Duration::from_secs(60));
            assert_eq!(child.deadline(), parent.deadline());
        });
    }
}
