use crate::context::SubjectContext;
use crate::error::EngineError;
use crate::processor::{BiometricEventProcessor, ProcessorConfig};
use crate::rule::{AlertRule, ComparisonOp, RuleCondition};
use crate::templates::{ClinicalRuleEngine, RuleTemplate};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::Arc;
use vitalmon_common::types::{
    BiometricAlert, BiometricDataPoint, BiometricValue, MeasurementType, Severity,
};
use vitalmon_notify::error::{NotifyError, Result as NotifyResult};
use vitalmon_notify::observers::email::EmailObserver;
use vitalmon_notify::{AlertObserver, NotificationResult};

fn hr_point(subject: &str, bpm: f64) -> BiometricDataPoint {
    BiometricDataPoint::new(subject, MeasurementType::HeartRate, bpm)
}

fn hr_rule(id: &str, threshold: f64) -> AlertRule {
    AlertRule::new(
        id,
        "High heart rate",
        MeasurementType::HeartRate,
        RuleCondition::Threshold {
            operator: ComparisonOp::GreaterThan,
            threshold,
        },
        Severity::High,
    )
}

// ── Rule tests ──

#[test]
fn comparison_ops_at_exact_threshold() {
    let at_boundary = [
        (ComparisonOp::GreaterThan, false),
        (ComparisonOp::GreaterEqual, true),
        (ComparisonOp::LessThan, false),
        (ComparisonOp::LessEqual, true),
        (ComparisonOp::Equal, true),
        (ComparisonOp::NotEqual, false),
    ];
    for (op, expected) in at_boundary {
        assert_eq!(
            op.check(100.0, 100.0),
            expected,
            "{op} at exact threshold"
        );
    }

    assert!(ComparisonOp::GreaterThan.check(100.1, 100.0));
    assert!(ComparisonOp::LessThan.check(99.9, 100.0));
    assert!(ComparisonOp::NotEqual.check(99.9, 100.0));
}

#[test]
fn comparison_op_parses_long_and_short_forms() {
    assert_eq!(
        "greater_than".parse::<ComparisonOp>().unwrap(),
        ComparisonOp::GreaterThan
    );
    assert_eq!("gte".parse::<ComparisonOp>().unwrap(), ComparisonOp::GreaterEqual);
    assert_eq!("ne".parse::<ComparisonOp>().unwrap(), ComparisonOp::NotEqual);
    assert!("sideways".parse::<ComparisonOp>().is_err());
}

#[test]
fn rule_applies_to_measurement_scope_and_active_flag() {
    vitalmon_common::id::init(1, 1);
    let unscoped = hr_rule("r1", 100.0);
    assert!(unscoped.applies_to(&hr_point("p1", 120.0)));
    assert!(unscoped.applies_to(&hr_point("p2", 120.0)));
    // Different measurement type never matches
    let glucose = BiometricDataPoint::new("p1", MeasurementType::Glucose, 5.0);
    assert!(!unscoped.applies_to(&glucose));

    let scoped = hr_rule("r2", 100.0).with_subject("p1");
    assert!(scoped.applies_to(&hr_point("p1", 120.0)));
    assert!(!scoped.applies_to(&hr_point("p2", 120.0)));

    // Paused rules match nothing until re-enabled
    let paused = hr_rule("r3", 100.0);
    paused.set_active(false);
    assert!(!paused.applies_to(&hr_point("p1", 120.0)));
    assert!(!paused.evaluate(&hr_point("p1", 120.0)));
    paused.set_active(true);
    assert!(paused.applies_to(&hr_point("p1", 120.0)));
}

#[test]
fn threshold_rule_needs_a_numeric_reading() {
    vitalmon_common::id::init(1, 1);
    let rule = hr_rule("r1", 100.0);

    let mut composite = HashMap::new();
    composite.insert("systolic".to_string(), 150.0);
    let dp = BiometricDataPoint::new("p1", MeasurementType::HeartRate, composite);
    assert!(!rule.evaluate(&dp));

    // Text that parses as a number still counts as a reading
    let dp = BiometricDataPoint::new("p1", MeasurementType::HeartRate, "128");
    assert!(rule.evaluate(&dp));

    let dp = BiometricDataPoint::new("p1", MeasurementType::HeartRate, "elevated");
    assert!(!rule.evaluate(&dp));
}

#[test]
fn rule_default_description_names_the_threshold() {
    let rule = hr_rule("r1", 100.0);
    assert_eq!(rule.description, "heart_rate above 100");

    let rule = AlertRule::new(
        "r2",
        "Low SpO2",
        MeasurementType::OxygenSaturation,
        RuleCondition::Threshold {
            operator: ComparisonOp::LessEqual,
            threshold: 92.0,
        },
        Severity::Critical,
    );
    assert_eq!(rule.description, "oxygen_saturation at or below 92");
}

#[test]
fn custom_condition_sees_the_full_data_point() {
    vitalmon_common::id::init(1, 1);
    let rule = AlertRule::new(
        "r1",
        "Sensor fault",
        MeasurementType::HeartRate,
        RuleCondition::Custom {
            condition_id: "sensor_fault".to_string(),
            predicate: Arc::new(|dp: &BiometricDataPoint| {
                dp.metadata.get("sensor_status").is_some_and(|s| s == "fault")
            }),
        },
        Severity::Low,
    );

    let flagged = hr_point("p1", 70.0).with_metadata("sensor_status", "fault");
    assert!(rule.evaluate(&flagged));
    assert!(!rule.evaluate(&hr_point("p1", 70.0)));
}

// ── Context tests ──

#[test]
fn context_trend_keeps_the_ten_most_recent_values() {
    vitalmon_common::id::init(1, 1);
    let mut ctx = SubjectContext::new("p1", 10);
    for bpm in 1..=15 {
        ctx.observe(&hr_point("p1", bpm as f64));
    }

    let trend = ctx.trend(&MeasurementType::HeartRate);
    assert_eq!(trend.len(), 10);
    let expected: Vec<BiometricValue> = (6..=15).map(|v| BiometricValue::from(v as f64)).collect();
    assert_eq!(trend, expected);
    assert_eq!(
        ctx.last_value(&MeasurementType::HeartRate),
        Some(&BiometricValue::from(15.0))
    );
}

#[test]
fn context_tracks_last_value_per_measurement() {
    vitalmon_common::id::init(1, 1);
    let mut ctx = SubjectContext::new("p1", 10);
    ctx.observe(&hr_point("p1", 72.0));
    ctx.observe(&BiometricDataPoint::new(
        "p1",
        MeasurementType::Temperature,
        36.6,
    ));
    ctx.observe(&hr_point("p1", 75.0));

    assert_eq!(
        ctx.last_value(&MeasurementType::HeartRate),
        Some(&BiometricValue::from(75.0))
    );
    assert_eq!(
        ctx.last_value(&MeasurementType::Temperature),
        Some(&BiometricValue::from(36.6))
    );
    assert_eq!(ctx.last_value(&MeasurementType::Glucose), None);
}

#[test]
fn context_cooldown_window() {
    let mut ctx = SubjectContext::new("p1", 10);
    let fired_at = Utc::now();
    ctx.record_fire("r1", fired_at);

    assert!(ctx.in_cooldown("r1", Duration::minutes(10), fired_at + Duration::minutes(5)));
    assert!(!ctx.in_cooldown("r1", Duration::minutes(10), fired_at + Duration::minutes(10)));
    assert!(!ctx.in_cooldown("r2", Duration::minutes(10), fired_at + Duration::minutes(5)));
    // Zero cooldown never suppresses
    assert!(!ctx.in_cooldown("r1", Duration::zero(), fired_at));

    assert_eq!(ctx.alert_count("r1"), 1);
    assert_eq!(ctx.alert_count("r2"), 0);
    assert_eq!(ctx.last_fired("r1"), Some(fired_at));
    assert_eq!(ctx.total_alerts(), 1);
}

// ── Processor tests ──

#[tokio::test]
async fn processor_end_to_end_heart_rate_scenario() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    let alerts = processor.ingest(hr_point("p1", 120.0)).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "hr-high");
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].subject_id, "p1");
    assert!(
        alerts[0].message.contains("heart_rate above 100"),
        "message was: {}",
        alerts[0].message
    );
    assert!(alerts[0].message.contains("observed 120"));

    let alerts = processor.ingest(hr_point("p1", 80.0)).await;
    assert!(alerts.is_empty());

    let stats = processor.stats();
    assert_eq!(stats.points_ingested, 2);
    assert_eq!(stats.alerts_fired, 1);
}

#[tokio::test]
async fn processor_honors_subject_scope() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor
        .add_rule(hr_rule("hr-p1", 100.0).with_subject("p1"))
        .await;

    assert_eq!(processor.ingest(hr_point("p2", 120.0)).await.len(), 0);
    assert_eq!(processor.ingest(hr_point("p1", 120.0)).await.len(), 1);
}

#[tokio::test]
async fn processor_set_rule_active_toggles_firing() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    assert!(processor.set_rule_active("hr-high", false).await);
    assert!(processor.ingest(hr_point("p1", 120.0)).await.is_empty());

    assert!(processor.set_rule_active("hr-high", true).await);
    assert_eq!(processor.ingest(hr_point("p1", 120.0)).await.len(), 1);

    assert!(!processor.set_rule_active("no-such-rule", true).await);
}

#[tokio::test]
async fn processor_remove_rule_is_idempotent() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    assert!(!processor.remove_rule("no-such-rule").await);
    assert_eq!(processor.rules().await.len(), 1);

    assert!(processor.remove_rule("hr-high").await);
    assert!(!processor.remove_rule("hr-high").await);
    assert!(processor.rules().await.is_empty());
}

#[tokio::test]
async fn processor_cooldown_suppresses_repeat_alerts() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor
        .add_rule(hr_rule("hr-high", 100.0).with_cooldown(10))
        .await;

    assert_eq!(processor.ingest(hr_point("p1", 120.0)).await.len(), 1);
    // Still above threshold, but within the cooldown window
    assert_eq!(processor.ingest(hr_point("p1", 125.0)).await.len(), 0);
    assert_eq!(processor.stats().suppressed_cooldown, 1);

    // Cooldown is per subject
    assert_eq!(processor.ingest(hr_point("p2", 125.0)).await.len(), 1);
}

#[tokio::test]
async fn processor_without_cooldown_fires_every_time() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    assert_eq!(processor.ingest(hr_point("p1", 120.0)).await.len(), 1);
    assert_eq!(processor.ingest(hr_point("p1", 125.0)).await.len(), 1);
    assert_eq!(processor.stats().suppressed_cooldown, 0);
}

#[tokio::test]
async fn processor_updates_context_before_evaluating() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    let alerts = processor.ingest(hr_point("p1", 120.0)).await;
    assert_eq!(alerts.len(), 1);

    let ctx = processor.context("p1").await.unwrap();
    let ctx = ctx.lock().await;
    // The triggering point is already part of the trend history
    assert_eq!(ctx.trend(&MeasurementType::HeartRate).len(), 1);
    assert_eq!(ctx.alert_count("hr-high"), 1);
}

#[tokio::test]
async fn processor_drops_points_without_subject() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    let alerts = processor.ingest(hr_point("", 120.0)).await;
    assert!(alerts.is_empty());
    assert_eq!(processor.subject_count().await, 0);

    let stats = processor.stats();
    assert_eq!(stats.dropped_missing_subject, 1);
    assert_eq!(stats.points_ingested, 0);
}

#[tokio::test]
async fn processor_counts_non_numeric_readings() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor
        .add_rule(AlertRule::new(
            "bp-high",
            "High blood pressure",
            MeasurementType::BloodPressure,
            RuleCondition::Threshold {
                operator: ComparisonOp::GreaterThan,
                threshold: 140.0,
            },
            Severity::High,
        ))
        .await;

    let mut reading = HashMap::new();
    reading.insert("systolic".to_string(), 150.0);
    reading.insert("diastolic".to_string(), 95.0);
    let dp = BiometricDataPoint::new("p1", MeasurementType::BloodPressure, reading);

    let alerts = processor.ingest(dp).await;
    assert!(alerts.is_empty());
    assert_eq!(processor.stats().non_numeric_values, 1);

    // The context still recorded the composite reading
    let ctx = processor.context("p1").await.unwrap();
    let ctx = ctx.lock().await;
    assert_eq!(ctx.trend(&MeasurementType::BloodPressure).len(), 1);
}

#[tokio::test]
async fn processor_evicts_least_recently_used_context() {
    vitalmon_common::id::init(1, 1);
    let config = ProcessorConfig {
        max_subjects: 2,
        ..ProcessorConfig::default()
    };
    let processor = BiometricEventProcessor::new(config);

    processor.ingest(hr_point("p1", 70.0)).await;
    processor.ingest(hr_point("p2", 70.0)).await;
    // Touch p1 so p2 becomes the eviction candidate
    processor.ingest(hr_point("p1", 71.0)).await;
    processor.ingest(hr_point("p3", 70.0)).await;

    assert_eq!(processor.subject_count().await, 2);
    assert!(processor.context("p1").await.is_some());
    assert!(processor.context("p2").await.is_none());
    assert!(processor.context("p3").await.is_some());
    assert_eq!(processor.stats().contexts_evicted, 1);
}

#[tokio::test]
async fn processor_context_or_create_shares_the_ingest_slot() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());

    assert!(processor.context("p1").await.is_none());
    let created = processor.context_or_create("p1").await;
    assert_eq!(processor.subject_count().await, 1);

    // Ingest reuses the pre-created slot rather than replacing it
    processor.ingest(hr_point("p1", 70.0)).await;
    let looked_up = processor.context("p1").await.unwrap();
    assert!(Arc::ptr_eq(&created, &looked_up));
    let guard = created.lock().await;
    assert_eq!(guard.trend(&MeasurementType::HeartRate).len(), 1);
}

/// Observer whose delivery always fails.
struct FailingObserver;

#[async_trait]
impl AlertObserver for FailingObserver {
    fn id(&self) -> &str {
        "failing"
    }

    fn channel(&self) -> &str {
        "test"
    }

    async fn notify(&self, _alert: &BiometricAlert) -> NotifyResult<Option<NotificationResult>> {
        Err(NotifyError::Delivery {
            channel: "test".to_string(),
            reason: "simulated outage".to_string(),
        })
    }
}

#[tokio::test]
async fn processor_delivers_to_healthy_observer_when_another_fails() {
    vitalmon_common::id::init(1, 1);
    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(hr_rule("hr-high", 100.0)).await;

    let email = Arc::new(EmailObserver::new(
        "mail-oncall",
        vec!["oncall@example.com".to_string()],
    ));
    processor.register_observer(Arc::new(FailingObserver));
    processor.register_observer(Arc::clone(&email) as Arc<dyn AlertObserver>);

    let alerts = processor.ingest(hr_point("p1", 120.0)).await;
    assert_eq!(alerts.len(), 1);
    processor.shutdown().await;

    let sent = email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].alert_id, alerts[0].id);

    let reports = processor.observer_stats();
    let failing = reports.iter().find(|r| r.id == "failing").unwrap();
    assert_eq!(failing.stats.failed, 1);
    let mail = reports.iter().find(|r| r.id == "mail-oncall").unwrap();
    assert_eq!(mail.stats.delivered, 1);
}

// ── Template engine tests ──

#[test]
fn default_templates_cover_the_clinical_set() {
    let engine = ClinicalRuleEngine::with_default_templates();
    let mut ids = engine.template_ids();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "bradycardia",
            "fever",
            "hyperglycemia",
            "hypoglycemia",
            "hypothermia",
            "low_spo2",
            "tachycardia",
            "tachypnea",
        ]
    );

    let tachycardia = engine.template("tachycardia").unwrap();
    assert_eq!(tachycardia.measurement, MeasurementType::HeartRate);
    assert_eq!(tachycardia.operator, ComparisonOp::GreaterThan);
    assert_eq!(tachycardia.default_threshold, 100.0);
    assert_eq!(tachycardia.default_severity, Severity::High);
}

#[test]
fn template_instantiation_applies_overrides() {
    vitalmon_common::id::init(1, 1);
    let engine = ClinicalRuleEngine::with_default_templates();

    let params = json!({
        "name": "Exercise tachycardia",
        "threshold": 150.0,
        "severity": "critical",
        "cooldown_minutes": 30,
    });
    let rule = engine
        .create_rule_from_template("tachycardia", params.as_object().unwrap(), Some("p1"))
        .unwrap();

    assert_eq!(rule.name, "Exercise tachycardia");
    assert_eq!(rule.condition.threshold(), Some(150.0));
    assert_eq!(rule.severity, Severity::Critical);
    assert_eq!(rule.cooldown_minutes, 30);
    assert_eq!(rule.subject_id.as_deref(), Some("p1"));
    assert!(rule.active());
    // Description falls back to the template default
    assert_eq!(rule.description, "Resting heart rate above upper bound");
}

#[test]
fn template_defaults_apply_without_overrides() {
    vitalmon_common::id::init(1, 1);
    let engine = ClinicalRuleEngine::with_default_templates();
    let rule = engine
        .create_rule_from_template("fever", &Map::new(), None)
        .unwrap();

    assert_eq!(rule.name, "Fever");
    assert_eq!(rule.measurement, MeasurementType::Temperature);
    assert_eq!(rule.condition.threshold(), Some(38.0));
    assert_eq!(rule.severity, Severity::Medium);
    assert_eq!(rule.cooldown_minutes, 15);
    assert_eq!(rule.subject_id, None);
}

#[test]
fn template_unknown_id_errors() {
    let engine = ClinicalRuleEngine::with_default_templates();
    let err = engine
        .create_rule_from_template("levitation", &Map::new(), None)
        .err()
        .expect("unknown template should fail");
    assert!(matches!(err, EngineError::TemplateNotFound(_)));
    assert!(err.to_string().contains("levitation"));
}

#[test]
fn template_missing_required_parameter_errors() {
    vitalmon_common::id::init(1, 1);
    let mut engine = ClinicalRuleEngine::new();
    engine.register_template(RuleTemplate {
        id: "custom_threshold".to_string(),
        name: "Custom heart rate bound".to_string(),
        measurement: MeasurementType::HeartRate,
        operator: ComparisonOp::GreaterThan,
        default_threshold: 0.0,
        default_severity: Severity::Medium,
        default_description: None,
        default_cooldown_minutes: 0,
        required_params: vec!["threshold".to_string()],
    });

    let err = engine
        .create_rule_from_template("custom_threshold", &Map::new(), None)
        .err()
        .expect("missing required parameter should fail");
    assert!(matches!(
        err,
        EngineError::MissingParameter { ref name, .. } if name == "threshold"
    ));

    let params = json!({ "threshold": 90.0 });
    let rule = engine
        .create_rule_from_template("custom_threshold", params.as_object().unwrap(), None)
        .unwrap();
    assert_eq!(rule.condition.threshold(), Some(90.0));
    assert_eq!(rule.description, "heart_rate above 90");
}

#[test]
fn template_rejects_ill_typed_overrides() {
    let engine = ClinicalRuleEngine::with_default_templates();

    let params = json!({ "severity": "apocalyptic" });
    let err = engine
        .create_rule_from_template("tachycardia", params.as_object().unwrap(), None)
        .err()
        .expect("unknown severity should fail");
    assert!(matches!(err, EngineError::InvalidParameter { .. }));

    let params = json!({ "threshold": "high" });
    assert!(engine
        .create_rule_from_template("tachycardia", params.as_object().unwrap(), None)
        .is_err());

    let params = json!({ "cooldown_minutes": -5 });
    assert!(engine
        .create_rule_from_template("tachycardia", params.as_object().unwrap(), None)
        .is_err());
}

#[test]
fn template_active_override_builds_paused_rule() {
    vitalmon_common::id::init(1, 1);
    let engine = ClinicalRuleEngine::with_default_templates();
    let params = json!({ "active": false });
    let rule = engine
        .create_rule_from_template("tachycardia", params.as_object().unwrap(), None)
        .unwrap();
    assert!(!rule.active());
}

#[tokio::test]
async fn custom_rule_fires_through_the_processor() {
    vitalmon_common::id::init(1, 1);
    let mut engine = ClinicalRuleEngine::new();
    engine.register_condition("sensor_fault", |dp: &BiometricDataPoint| {
        dp.metadata.get("sensor_status").is_some_and(|s| s == "fault")
    });
    assert!(engine.has_condition("sensor_fault"));

    let rule = engine
        .create_custom_rule(
            "sensor_fault",
            "Sensor fault",
            MeasurementType::HeartRate,
            Severity::Low,
            None,
        )
        .unwrap();

    let processor = BiometricEventProcessor::new(ProcessorConfig::default());
    processor.add_rule(rule).await;

    let flagged = hr_point("p1", 70.0).with_metadata("sensor_status", "fault");
    assert_eq!(processor.ingest(flagged).await.len(), 1);
    assert_eq!(processor.ingest(hr_point("p1", 70.0)).await.len(), 0);
}

#[test]
fn custom_rule_unknown_condition_errors() {
    let engine = ClinicalRuleEngine::new();
    let err = engine
        .create_custom_rule(
            "sensor_fault",
            "Sensor fault",
            MeasurementType::HeartRate,
            Severity::Low,
            None,
        )
        .err()
        .expect("unknown condition should fail");
    assert!(matches!(err, EngineError::UnknownCondition(_)));
}
