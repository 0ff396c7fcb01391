use crate::queue::{AlertQueue, PushError};
use crate::AlertObserver;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing;
use vitalmon_common::types::BiometricAlert;

/// What to do when an observer's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued alert to make room.
    DropOldest,
    /// Reject the incoming alert.
    DropNewest,
    /// Wait up to `block_timeout_ms` for space, then reject.
    Block,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

fn default_queue_depth() -> usize {
    256
}

fn default_block_timeout_ms() -> u64 {
    2_000
}

fn default_notify_timeout_ms() -> u64 {
    10_000
}

/// Dispatcher tuning, operator-configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-observer queue depth.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Behavior when an observer's queue is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// How long the `block` policy waits for space.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Upper bound for a single notify attempt.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            overflow: OverflowPolicy::default(),
            block_timeout_ms: default_block_timeout_ms(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

/// Per-observer delivery counters.
#[derive(Debug, Default)]
pub struct ObserverStats {
    delivered: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

impl ObserverStats {
    pub fn snapshot(&self) -> ObserverStatsSnapshot {
        ObserverStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one observer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObserverStatsSnapshot {
    pub delivered: u64,
    pub filtered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dropped: u64,
}

/// Per-observer view returned by [`AlertDispatcher::observer_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ObserverReport {
    pub id: String,
    pub channel: String,
    pub queued: usize,
    pub stats: ObserverStatsSnapshot,
}

struct ObserverWorker {
    id: String,
    channel: String,
    queue: Arc<AlertQueue>,
    stats: Arc<ObserverStats>,
    handle: Option<JoinHandle<()>>,
}

/// Fans generated alerts out to registered observers, one bounded queue and
/// one worker task per observer, so a slow or failing channel cannot stall
/// the others or the ingest path.
pub struct AlertDispatcher {
    config: DispatchConfig,
    workers: Mutex<Vec<ObserverWorker>>,
}

impl AlertDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a worker for `observer` and start delivering to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, observer: Arc<dyn AlertObserver>) {
        let queue = Arc::new(AlertQueue::new(self.config.queue_depth));
        let stats = Arc::new(ObserverStats::default());
        let id = observer.id().to_string();
        let channel = observer.channel().to_string();
        let notify_timeout = Duration::from_millis(self.config.notify_timeout_ms);
        let handle = tokio::spawn(worker_loop(
            observer,
            Arc::clone(&queue),
            Arc::clone(&stats),
            notify_timeout,
        ));
        tracing::debug!(observer = %id, channel = %channel, "Observer registered");
        self.lock_workers().push(ObserverWorker {
            id,
            channel,
            queue,
            stats,
            handle: Some(handle),
        });
    }

    /// Close the observer's queue, drain it, and drop the worker. Returns
    /// false when no observer with the id is registered.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed: Vec<ObserverWorker> = {
            let mut workers = self.lock_workers();
            let mut kept = Vec::with_capacity(workers.len());
            let mut removed = Vec::new();
            for worker in workers.drain(..) {
                if worker.id == id {
                    removed.push(worker);
                } else {
                    kept.push(worker);
                }
            }
            *workers = kept;
            removed
        };

        if removed.is_empty() {
            return false;
        }
        for mut worker in removed {
            worker.queue.close();
            if let Some(handle) = worker.handle.take() {
                if let Err(e) = handle.await {
                    tracing::warn!(observer = %id, error = %e, "Observer worker ended abnormally");
                }
            }
        }
        true
    }

    /// Enqueue one alert to every observer according to the overflow policy.
    pub async fn dispatch(&self, alert: &Arc<BiometricAlert>) {
        let targets: Vec<(String, Arc<AlertQueue>, Arc<ObserverStats>)> = self
            .lock_workers()
            .iter()
            .map(|w| (w.id.clone(), Arc::clone(&w.queue), Arc::clone(&w.stats)))
            .collect();

        for (id, queue, stats) in targets {
            let outcome = match self.config.overflow {
                OverflowPolicy::DropOldest => match queue.push_evict(alert) {
                    Ok(None) => Ok(()),
                    Ok(Some(evicted)) => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            observer = %id,
                            alert_id = %evicted.id,
                            "Observer queue full, dropped oldest alert"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                OverflowPolicy::DropNewest => queue.try_push(alert),
                OverflowPolicy::Block => {
                    queue
                        .push_wait(alert, Duration::from_millis(self.config.block_timeout_ms))
                        .await
                }
            };

            match outcome {
                Ok(()) => {}
                Err(PushError::Full) => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        observer = %id,
                        alert_id = %alert.id,
                        "Observer queue full, dropped alert"
                    );
                }
                Err(PushError::Closed) => {
                    tracing::debug!(
                        observer = %id,
                        alert_id = %alert.id,
                        "Observer queue closed, alert not delivered"
                    );
                }
            }
        }
    }

    pub fn observer_ids(&self) -> Vec<String> {
        self.lock_workers().iter().map(|w| w.id.clone()).collect()
    }

    pub fn observer_stats(&self) -> Vec<ObserverReport> {
        self.lock_workers()
            .iter()
            .map(|w| ObserverReport {
                id: w.id.clone(),
                channel: w.channel.clone(),
                queued: w.queue.len(),
                stats: w.stats.snapshot(),
            })
            .collect()
    }

    /// Close every queue and wait for workers to drain. Observers stay
    /// listed so final counters remain readable; dispatching after shutdown
    /// is a no-op.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut workers = self.lock_workers();
            workers
                .iter_mut()
                .filter_map(|w| {
                    w.queue.close();
                    w.handle.take().map(|h| (w.id.clone(), h))
                })
                .collect()
        };
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(observer = %id, error = %e, "Observer worker ended abnormally");
            }
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<ObserverWorker>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        // Unblock workers parked on pop so their tasks can exit.
        for worker in self.lock_workers().iter() {
            worker.queue.close();
        }
    }
}

async fn worker_loop(
    observer: Arc<dyn AlertObserver>,
    queue: Arc<AlertQueue>,
    stats: Arc<ObserverStats>,
    notify_timeout: Duration,
) {
    while let Some(alert) = queue.pop().await {
        match tokio::time::timeout(notify_timeout, observer.notify(&alert)).await {
            Ok(Ok(Some(_))) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(None)) => {
                stats.filtered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    observer = observer.id(),
                    channel = observer.channel(),
                    error = %e,
                    "Failed to send notification"
                );
            }
            Err(_) => {
                stats.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    observer = observer.id(),
                    channel = observer.channel(),
                    timeout_ms = notify_timeout.as_millis() as u64,
                    "Notification attempt timed out"
                );
            }
        }
    }
    tracing::debug!(observer = observer.id(), "Observer worker stopped");
}
