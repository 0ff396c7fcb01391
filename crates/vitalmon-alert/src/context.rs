use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use vitalmon_common::types::{BiometricDataPoint, BiometricValue, MeasurementType};

/// Rolling per-subject state: the latest value per measurement type, a
/// short trend history per measurement type, and per-rule firing records
/// used for cooldown suppression.
///
/// Contexts are owned by the processor and created lazily on the first
/// data point for a subject.
#[derive(Debug)]
pub struct SubjectContext {
    subject_id: String,
    last_values: HashMap<MeasurementType, BiometricValue>,
    trends: HashMap<MeasurementType, VecDeque<BiometricValue>>,
    alert_counts: HashMap<String, u64>,
    last_fired: HashMap<String, DateTime<Utc>>,
    trend_capacity: usize,
}

impl SubjectContext {
    pub fn new(subject_id: impl Into<String>, trend_capacity: usize) -> Self {
        Self {
            subject_id: subject_id.into(),
            last_values: HashMap::new(),
            trends: HashMap::new(),
            alert_counts: HashMap::new(),
            last_fired: HashMap::new(),
            trend_capacity: trend_capacity.max(1),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Record one data point: replaces the latest value and appends to the
    /// trend history, evicting the oldest entries beyond the capacity.
    pub fn observe(&mut self, point: &BiometricDataPoint) {
        self.last_values
            .insert(point.measurement, point.value.clone());

        let trend = self.trends.entry(point.measurement).or_default();
        trend.push_back(point.value.clone());
        while trend.len() > self.trend_capacity {
            trend.pop_front();
        }
    }

    /// Record that `rule_id` fired for this subject at `at`.
    pub fn record_fire(&mut self, rule_id: &str, at: DateTime<Utc>) {
        *self.alert_counts.entry(rule_id.to_string()).or_insert(0) += 1;
        self.last_fired.insert(rule_id.to_string(), at);
    }

    /// True when `rule_id` fired for this subject less than `cooldown` ago.
    /// A zero or negative cooldown never suppresses.
    pub fn in_cooldown(&self, rule_id: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        if cooldown <= Duration::zero() {
            return false;
        }
        self.last_fired
            .get(rule_id)
            .is_some_and(|last| now - *last < cooldown)
    }

    pub fn last_value(&self, measurement: &MeasurementType) -> Option<&BiometricValue> {
        self.last_values.get(measurement)
    }

    /// Trend history for one measurement type, oldest first.
    pub fn trend(&self, measurement: &MeasurementType) -> Vec<BiometricValue> {
        self.trends
            .get(measurement)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn alert_count(&self, rule_id: &str) -> u64 {
        self.alert_counts.get(rule_id).copied().unwrap_or(0)
    }

    pub fn last_fired(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(rule_id).copied()
    }

    /// Total alerts fired for this subject across all rules.
    pub fn total_alerts(&self) -> u64 {
        self.alert_counts.values().sum()
    }
}
