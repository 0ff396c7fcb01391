use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use vitalmon_common::types::BiometricAlert;

/// Why a push did not enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Closed,
}

struct QueueState {
    items: VecDeque<Arc<BiometricAlert>>,
    closed: bool,
}

/// Bounded FIFO between the dispatcher and one observer worker.
///
/// Pushes are synchronous except for [`push_wait`]; the single worker pops
/// asynchronously. Closing keeps queued alerts poppable so workers drain
/// before exiting.
///
/// [`push_wait`]: AlertQueue::push_wait
pub(crate) struct AlertQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    item_ready: Notify,
    space_ready: Notify,
}

impl AlertQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    /// Push unless full.
    pub(crate) fn try_push(&self, alert: &Arc<BiometricAlert>) -> Result<(), PushError> {
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PushError::Closed);
            }
            if state.items.len() >= self.capacity {
                return Err(PushError::Full);
            }
            state.items.push_back(Arc::clone(alert));
        }
        self.item_ready.notify_one();
        Ok(())
    }

    /// Push, evicting the oldest queued alert when full. Returns the evicted
    /// alert, if any.
    pub(crate) fn push_evict(
        &self,
        alert: &Arc<BiometricAlert>,
    ) -> Result<Option<Arc<BiometricAlert>>, PushError> {
        let evicted = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PushError::Closed);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(Arc::clone(alert));
            evicted
        };
        self.item_ready.notify_one();
        Ok(evicted)
    }

    /// Push, waiting up to `timeout` for space.
    pub(crate) async fn push_wait(
        &self,
        alert: &Arc<BiometricAlert>,
        timeout: Duration,
    ) -> Result<(), PushError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.try_push(alert) {
                Ok(()) => return Ok(()),
                Err(PushError::Closed) => return Err(PushError::Closed),
                Err(PushError::Full) => {}
            }
            if tokio::time::timeout_at(deadline, self.space_ready.notified())
                .await
                .is_err()
            {
                // Deadline hit; one final attempt settles the outcome.
                return self.try_push(alert);
            }
        }
    }

    /// Pop the next alert, waiting until one arrives. Returns `None` once
    /// the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<Arc<BiometricAlert>> {
        loop {
            {
                let mut state = self.lock_state();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.space_ready.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.item_ready.notified().await;
        }
    }

    /// Close the queue. Later pushes fail with [`PushError::Closed`]; queued
    /// alerts remain poppable.
    pub(crate) fn close(&self) {
        {
            let mut state = self.lock_state();
            state.closed = true;
        }
        self.item_ready.notify_one();
        self.space_ready.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalmon_common::types::{BiometricAlert, BiometricDataPoint, MeasurementType, Severity};

    fn make_alert(marker: &str) -> Arc<BiometricAlert> {
        let dp = BiometricDataPoint::new("p1", MeasurementType::HeartRate, 120.0);
        Arc::new(BiometricAlert::new(
            "r1",
            "Tachycardia watch",
            Severity::High,
            marker,
            dp,
        ))
    }

    #[tokio::test]
    async fn test_try_push_reports_full() {
        let queue = AlertQueue::new(2);
        assert!(queue.try_push(&make_alert("a")).is_ok());
        assert!(queue.try_push(&make_alert("b")).is_ok());
        assert_eq!(queue.try_push(&make_alert("c")), Err(PushError::Full));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_push_evict_drops_oldest() {
        let queue = AlertQueue::new(2);
        queue.try_push(&make_alert("a")).unwrap();
        queue.try_push(&make_alert("b")).unwrap();
        let evicted = queue.push_evict(&make_alert("c")).unwrap();
        assert_eq!(evicted.map(|a| a.message.clone()).as_deref(), Some("a"));

        let first = queue.pop().await.unwrap();
        let second = queue.pop().await.unwrap();
        assert_eq!(first.message, "b");
        assert_eq!(second.message, "c");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = AlertQueue::new(4);
        queue.try_push(&make_alert("a")).unwrap();
        queue.close();
        assert_eq!(queue.try_push(&make_alert("b")), Err(PushError::Closed));
        assert_eq!(queue.pop().await.map(|a| a.message.clone()).as_deref(), Some("a"));
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_push_wait_times_out_when_full() {
        let queue = AlertQueue::new(1);
        queue.try_push(&make_alert("a")).unwrap();
        let result = queue
            .push_wait(&make_alert("b"), Duration::from_millis(20))
            .await;
        assert_eq!(result, Err(PushError::Full));
    }

    #[tokio::test]
    async fn test_push_wait_proceeds_when_space_frees() {
        let queue = Arc::new(AlertQueue::new(1));
        queue.try_push(&make_alert("a")).unwrap();

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                queue.pop().await
            })
        };

        let result = queue
            .push_wait(&make_alert("b"), Duration::from_secs(2))
            .await;
        assert!(result.is_ok());
        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.message, "a");
    }
}
