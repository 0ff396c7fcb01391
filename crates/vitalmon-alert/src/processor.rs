use crate::context::SubjectContext;
use crate::rule::AlertRule;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing;
use vitalmon_common::types::{BiometricAlert, BiometricDataPoint};
use vitalmon_notify::dispatch::{AlertDispatcher, DispatchConfig, ObserverReport};
use vitalmon_notify::AlertObserver;

fn default_trend_capacity() -> usize {
    10
}

fn default_max_subjects() -> usize {
    10_000
}

/// Processor tuning, operator-configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Values retained per (subject, measurement) trend history.
    #[serde(default = "default_trend_capacity")]
    pub trend_capacity: usize,
    /// Upper bound on tracked subject contexts. The least recently
    /// touched context is evicted when a new subject would exceed it.
    #[serde(default = "default_max_subjects")]
    pub max_subjects: usize,
    /// Observer fan-out tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            trend_capacity: default_trend_capacity(),
            max_subjects: default_max_subjects(),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Ingest pipeline counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    points_ingested: AtomicU64,
    alerts_fired: AtomicU64,
    dropped_missing_subject: AtomicU64,
    non_numeric_values: AtomicU64,
    suppressed_cooldown: AtomicU64,
    contexts_evicted: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            points_ingested: self.points_ingested.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            dropped_missing_subject: self.dropped_missing_subject.load(Ordering::Relaxed),
            non_numeric_values: self.non_numeric_values.load(Ordering::Relaxed),
            suppressed_cooldown: self.suppressed_cooldown.load(Ordering::Relaxed),
            contexts_evicted: self.contexts_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the ingest counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub points_ingested: u64,
    pub alerts_fired: u64,
    pub dropped_missing_subject: u64,
    pub non_numeric_values: u64,
    pub suppressed_cooldown: u64,
    pub contexts_evicted: u64,
}

struct ContextSlot {
    ctx: Arc<Mutex<SubjectContext>>,
    /// Monotonic touch counter for least-recently-used eviction.
    last_touch: AtomicU64,
}

/// Orchestrates the alerting pipeline: maintains per-subject contexts,
/// evaluates registered rules against each incoming data point, and fans
/// fired alerts out to observers through an [`AlertDispatcher`].
///
/// All methods take `&self`; the processor is meant to be shared as
/// `Arc<BiometricEventProcessor>` across ingest tasks.
pub struct BiometricEventProcessor {
    config: ProcessorConfig,
    rules: RwLock<Vec<Arc<AlertRule>>>,
    contexts: RwLock<HashMap<String, ContextSlot>>,
    touch_seq: AtomicU64,
    dispatcher: AlertDispatcher,
    stats: IngestStats,
}

impl BiometricEventProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let dispatcher = AlertDispatcher::new(config.dispatch.clone());
        Self {
            config,
            rules: RwLock::new(Vec::new()),
            contexts: RwLock::new(HashMap::new()),
            touch_seq: AtomicU64::new(0),
            dispatcher,
            stats: IngestStats::default(),
        }
    }

    /// Add a rule. Returns the shared handle so callers can keep toggling
    /// its active flag. Duplicate ids are allowed; `remove_rule` removes
    /// every rule carrying the id.
    pub async fn add_rule(&self, rule: AlertRule) -> Arc<AlertRule> {
        let rule = Arc::new(rule);
        self.rules.write().await.push(Arc::clone(&rule));
        rule
    }

    /// Remove all rules with this id. Returns true if any was removed.
    pub async fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write().await;
        let len_before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() < len_before
    }

    /// Get a rule by its id.
    pub async fn rule(&self, id: &str) -> Option<Arc<AlertRule>> {
        self.rules.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Pause or resume every rule with this id. Returns true if any rule
    /// matched.
    pub async fn set_rule_active(&self, id: &str, active: bool) -> bool {
        let rules = self.rules.read().await;
        let mut found = false;
        for rule in rules.iter().filter(|r| r.id == id) {
            rule.set_active(active);
            found = true;
        }
        found
    }

    /// Snapshot of the registered rules in registration order.
    pub async fn rules(&self) -> Vec<Arc<AlertRule>> {
        self.rules.read().await.to_vec()
    }

    /// Register an observer behind its own dispatch queue and worker.
    /// Must be called from within a tokio runtime.
    pub fn register_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.dispatcher.register(observer);
    }

    /// Remove an observer after its queued alerts drain. Returns false if
    /// no observer carries the id.
    pub async fn unregister_observer(&self, id: &str) -> bool {
        self.dispatcher.unregister(id).await
    }

    pub fn observer_stats(&self) -> Vec<ObserverReport> {
        self.dispatcher.observer_stats()
    }

    /// Shared handle to one subject's context, if tracked.
    pub async fn context(&self, subject_id: &str) -> Option<Arc<Mutex<SubjectContext>>> {
        self.contexts
            .read()
            .await
            .get(subject_id)
            .map(|slot| Arc::clone(&slot.ctx))
    }

    /// Shared handle to one subject's context, created on first touch.
    /// Counts as a touch for least-recently-used eviction.
    pub async fn context_or_create(&self, subject_id: &str) -> Arc<Mutex<SubjectContext>> {
        let seq = self.touch_seq.fetch_add(1, Ordering::Relaxed);

        {
            let contexts = self.contexts.read().await;
            if let Some(slot) = contexts.get(subject_id) {
                slot.last_touch.store(seq, Ordering::Relaxed);
                return Arc::clone(&slot.ctx);
            }
        }

        let mut contexts = self.contexts.write().await;
        // Another ingest may have created the slot while we waited for the
        // write lock.
        if let Some(slot) = contexts.get(subject_id) {
            slot.last_touch.store(seq, Ordering::Relaxed);
            return Arc::clone(&slot.ctx);
        }

        if contexts.len() >= self.config.max_subjects.max(1) {
            let oldest = contexts
                .iter()
                .min_by_key(|(_, slot)| slot.last_touch.load(Ordering::Relaxed))
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                contexts.remove(&oldest);
                self.stats.contexts_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    subject_id = %oldest,
                    "Evicted least recently used subject context"
                );
            }
        }

        let slot = ContextSlot {
            ctx: Arc::new(Mutex::new(SubjectContext::new(
                subject_id,
                self.config.trend_capacity,
            ))),
            last_touch: AtomicU64::new(seq),
        };
        let ctx = Arc::clone(&slot.ctx);
        contexts.insert(subject_id.to_string(), slot);
        ctx
    }

    pub async fn subject_count(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one data point: update the subject's context, evaluate every
    /// active matching rule, and fan fired alerts out to observers.
    ///
    /// Returns the fired alerts in rule-registration order. Data points
    /// without a subject id are dropped.
    pub async fn ingest(&self, point: BiometricDataPoint) -> Vec<BiometricAlert> {
        if point.subject_id.is_empty() {
            self.stats
                .dropped_missing_subject
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                measurement = %point.measurement,
                "Dropped data point without subject id"
            );
            return Vec::new();
        }
        self.stats.points_ingested.fetch_add(1, Ordering::Relaxed);

        let ctx = self.context_or_create(&point.subject_id).await;
        let rules: Vec<Arc<AlertRule>> = self.rules.read().await.to_vec();

        let now = Utc::now();
        let mut alerts = Vec::new();
        {
            let mut guard = ctx.lock().await;
            guard.observe(&point);

            let mut counted_non_numeric = false;
            for rule in &rules {
                if !rule.applies_to(&point) {
                    continue;
                }

                if rule.condition.requires_numeric() && point.value.as_f64().is_none() {
                    // Count once per point, however many rules skip it.
                    if !counted_non_numeric {
                        self.stats.non_numeric_values.fetch_add(1, Ordering::Relaxed);
                        counted_non_numeric = true;
                    }
                    continue;
                }

                if !rule.evaluate(&point) {
                    continue;
                }

                if guard.in_cooldown(&rule.id, rule.cooldown(), now) {
                    self.stats
                        .suppressed_cooldown
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        rule_id = %rule.id,
                        subject_id = %point.subject_id,
                        "Alert suppressed (cooldown active)"
                    );
                    continue;
                }

                guard.record_fire(&rule.id, now);
                let message = format!(
                    "{} for subject {}: observed {}",
                    rule.description, point.subject_id, point.value
                );
                alerts.push(BiometricAlert::new(
                    rule.id.clone(),
                    rule.name.clone(),
                    rule.severity,
                    message,
                    point.clone(),
                ));
            }
        }

        if !alerts.is_empty() {
            self.stats
                .alerts_fired
                .fetch_add(alerts.len() as u64, Ordering::Relaxed);
            for alert in &alerts {
                let shared = Arc::new(alert.clone());
                self.dispatcher.dispatch(&shared).await;
            }
        }

        alerts
    }

    /// Stop accepting alert deliveries and wait for observer queues to
    /// drain.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
