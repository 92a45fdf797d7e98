//! Cancellation token for cooperative cancellation.

use crate::errors::StepflowError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications. Receives the reason.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
struct TokenInner {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: Mutex<Vec<CancelCallback>>,
    /// Child and linked tokens. Dropped tokens are pruned on registration.
    children: Mutex<Vec<Weak<TokenInner>>>,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
}

/// A token for cooperative cancellation.
///
/// Clones share the same state. Cancellation is idempotent - only the first
/// cancellation reason is kept. Child tokens observe their parent's
/// cancellation, but cancelling a child never touches the parent.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled as soon as any of `sources` is.
    #[must_use]
    pub fn linked(sources: &[&Self]) -> Self {
        let token = Self::new();
        for source in sources {
            source.forward_to(&token);
        }
        token
    }

    /// Creates a child token that is cancelled together with `self`.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        self.forward_to(&child);
        child
    }

    fn forward_to(&self, target: &Self) {
        let mut children = self.inner.children.lock();
        if !self.is_cancelled() {
            children.retain(|child| child.strong_count() > 0);
            children.push(Arc::downgrade(&target.inner));
            return;
        }
        drop(children);
        target.cancel(self.reason().unwrap_or_default());
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = {
            // readers that see the flag block here until the reason is set
            let mut slot = self.inner.reason.write();
            if self
                .inner
                .cancelled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            let reason = reason.into();
            *slot = Some(reason.clone());
            reason
        };

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            invoke(callback, &reason);
        }

        let children = std::mem::take(&mut *self.inner.children.lock());
        for inner in children.iter().filter_map(Weak::upgrade) {
            Self { inner }.cancel(reason.as_str());
        }

        self.inner.notify.notify_waiters();
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut callbacks = self.inner.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            let reason = self.reason().unwrap_or_default();
            invoke(Box::new(callback), &reason);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Returns `Err(StepflowError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), StepflowError> {
        if self.is_cancelled() {
            Err(StepflowError::Cancelled(
                self.reason().unwrap_or_else(|| "cancelled".to_string()),
            ))
        } else {
            Ok(())
        }
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns how many callbacks and live child tokens are waiting for
    /// cancellation.
    pub fn listener_count(&self) -> usize {
        let children = {
            let mut children = self.inner.children.lock();
            children.retain(|child| child.strong_count() > 0);
            children.len()
        };
        self.inner.callbacks.lock().len() + children
    }

    /// Returns true if both handles share the same underlying token.
    #[must_use]
    pub fn same_token(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn invoke(callback: CancelCallback, reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(reason);
    })) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_token_cancel() {
        let token = CancellationToken::new();
        token.cancel("User requested");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("User requested".to_string()));
        assert!(token.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        // First reason wins
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel("from clone");

        assert!(token.is_cancelled());
        assert!(token.same_token(&clone));
    }

    #[test]
    fn test_on_cancel_before_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        token.on_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel("test");

        let seen = Arc::new(Mutex::new(String::new()));
        let seen_clone = seen.clone();

        // Should invoke immediately
        token.on_cancel(move |reason| {
            *seen_clone.lock() = reason.to_string();
        });

        assert_eq!(seen.lock().as_str(), "test");
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();

        token.on_cancel(|_| {
            panic!("Intentional panic");
        });

        // Should not panic
        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        parent.cancel("shutdown");

        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some("shutdown".to_string()));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel("fail fast");

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_linked_token() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let linked = CancellationToken::linked(&[&a, &b]);

        b.cancel("b");

        assert!(linked.is_cancelled());
        assert!(!a.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel("gone");

        let child = parent.child_token();
        assert_eq!(child.reason(), Some("gone".to_string()));
        assert_eq!(parent.listener_count(), 0);
    }

    #[test]
    fn test_dropped_children_are_released() {
        let parent = CancellationToken::new();
        for _ in 0..500 {
            let child = parent.child_token();
            let linked = CancellationToken::linked(&[&parent, &child]);
            drop(linked);
            drop(child);
        }
        assert_eq!(parent.listener_count(), 0);

        let kept = parent.child_token();
        assert_eq!(parent.listener_count(), 1);
        parent.cancel("done");
        assert!(kept.is_cancelled());
        assert_eq!(parent.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("wake up");

        let reason = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, Some("wake up".to_string()));
    }

    #[test]
    fn test_cancelled_future_ready_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("done");
        tokio_test::block_on(token.cancelled());
    }
}
