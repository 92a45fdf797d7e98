//! FIFO work queue shared by pool workers.

use crate::cancellation::CancellationToken;
use crate::steps::StepHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<StepHandle>,
    closed: bool,
}

/// A blocking FIFO of steps.
///
/// Producers [`push`](WorkQueue::push) until the queue is
/// [`close`](WorkQueue::close)d; consumers park in
/// [`next`](WorkQueue::next) until an item arrives, the queue is closed and
/// drained, or their token is cancelled.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step. Returns false if the queue is already closed.
    pub fn push(&self, step: StepHandle) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(step);
        }
        self.notify.notify_waiters();
        true
    }

    /// Marks the queue as complete. Remaining items are still handed out.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Returns true once [`WorkQueue::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of queued, not yet dequeued steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no step is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Removes and returns the next step without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<StepHandle> {
        self.state.lock().items.pop_front()
    }

    /// Waits for the next step.
    ///
    /// Returns `None` when the queue is closed and empty, or when `token` is
    /// cancelled. Cancellation is checked before every dequeue.
    pub async fn next(&self, token: &CancellationToken) -> Option<StepHandle> {
        loop {
            // Register interest before inspecting the queue so a push or
            // close between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if token.is_cancelled() {
                return None;
            }

            {
                let mut state = self.state.lock();
                if let Some(step) = state.items.pop_front() {
                    return Some(step);
                }
                if state.closed {
                    return None;
                }
            }

            tokio::select! {
                () = &mut notified => {}
                () = token.cancelled() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NoOpStep;
    use std::sync::Arc;
    use std::time::Duration;

    fn handle(name: &str) -> StepHandle {
        StepHandle::new(Arc::new(NoOpStep::new(name)))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(handle("a"));
        queue.push(handle("b"));
        queue.close();

        let token = CancellationToken::new();
        assert_eq!(queue.next(&token).await.unwrap().name(), "a");
        assert_eq!(queue.next(&token).await.unwrap().name(), "b");
        assert!(queue.next(&token).await.is_none());
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let queue = WorkQueue::new();
        queue.close();

        assert!(!queue.push(handle("late")));
        assert!(queue.is_empty());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                queue.next(&token).await.map(|s| s.name().to_string())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(handle("late"));

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_close() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(&CancellationToken::new()).await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_dequeue() {
        let queue = WorkQueue::new();
        queue.push(handle("never"));

        let token = CancellationToken::new();
        token.cancel("stop");

        assert!(queue.next(&token).await.is_none());
        assert_eq!(queue.len(), 1);
    }
}
