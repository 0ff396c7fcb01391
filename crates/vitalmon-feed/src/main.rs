//! Demo feed binary: builds a processor from a TOML config, then drives it
//! with deterministic synthetic vitals so alerts fire without live devices.

mod config;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;
use vitalmon_alert::processor::BiometricEventProcessor;
use vitalmon_alert::rule::AlertRule;
use vitalmon_alert::templates::ClinicalRuleEngine;
use vitalmon_common::types::{BiometricDataPoint, MeasurementType, Severity};
use vitalmon_notify::plugin::ObserverRegistry;

use crate::config::{FeedConfig, FeedOptions, RuleSeed};

enum CliAction {
    Run { config_path: String },
    Help,
}

fn parse_cli() -> Result<CliAction> {
    let mut config_path = "config/feed.toml".to_string();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::Help),
            flag if flag.starts_with('-') => bail!("unknown argument: {flag}"),
            path => config_path = path.to_string(),
        }
    }
    Ok(CliAction::Run { config_path })
}

fn usage() {
    println!("vitalmon-feed: synthetic biometric telemetry feeder");
    println!();
    println!("Usage: vitalmon-feed [CONFIG_PATH]");
    println!();
    println!("  CONFIG_PATH   TOML config file (default: config/feed.toml)");
    println!();
    println!("Options:");
    println!("  -h, --help    Show this help");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = match parse_cli()? {
        CliAction::Run { config_path } => config_path,
        CliAction::Help => {
            usage();
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vitalmon=info".parse()?))
        .init();

    let config = FeedConfig::load(&config_path)?;

    tracing::info!(
        config = %config_path,
        subjects = config.feed.subjects,
        interval_ms = config.feed.interval_ms,
        "vitalmon-feed starting"
    );

    vitalmon_common::id::init(1, 1);

    let processor = Arc::new(BiometricEventProcessor::new(config.processor.clone()));

    let registry = ObserverRegistry::default();
    for seed in &config.observers {
        let observer = registry.create_observer(&seed.kind, &seed.id, &seed.config_json()?)?;
        processor.register_observer(observer);
        tracing::info!(id = %seed.id, kind = %seed.kind, "Registered observer");
    }

    let mut engine = ClinicalRuleEngine::with_default_templates();
    engine.register_condition("sensor_fault", |point: &BiometricDataPoint| {
        point
            .metadata
            .get("sensor_status")
            .is_some_and(|status| status == "fault")
    });

    for seed in &config.rules {
        let rule = build_rule(&engine, seed)?;
        tracing::info!(rule_id = %rule.id, name = %rule.name, "Registered rule");
        processor.add_rule(rule).await;
    }

    let mut tick = interval(Duration::from_millis(config.feed.interval_ms.max(1)));
    let mut iteration: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                iteration += 1;
                for point in generate_points(&config.feed, iteration) {
                    let alerts = processor.ingest(point).await;
                    for alert in &alerts {
                        tracing::warn!(
                            rule = %alert.rule_name,
                            subject = %alert.subject_id,
                            severity = %alert.severity,
                            "{}",
                            alert.message
                        );
                    }
                }
                if config.feed.iterations > 0 && iteration >= config.feed.iterations {
                    tracing::info!(iterations = iteration, "Feed complete");
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    processor.shutdown().await;

    let stats = processor.stats();
    tracing::info!(
        points = stats.points_ingested,
        alerts = stats.alerts_fired,
        suppressed = stats.suppressed_cooldown,
        non_numeric = stats.non_numeric_values,
        "Ingest summary"
    );
    for report in processor.observer_stats() {
        tracing::info!(
            observer = %report.id,
            channel = %report.channel,
            delivered = report.stats.delivered,
            filtered = report.stats.filtered,
            failed = report.stats.failed,
            dropped = report.stats.dropped,
            "Observer summary"
        );
    }

    Ok(())
}

fn build_rule(engine: &ClinicalRuleEngine, seed: &RuleSeed) -> Result<AlertRule> {
    match (&seed.template, &seed.condition) {
        (Some(template), None) => {
            let params = seed.params_json()?;
            Ok(engine.create_rule_from_template(template, &params, seed.subject.as_deref())?)
        }
        (None, Some(condition)) => {
            let name = seed.name.clone().unwrap_or_else(|| condition.clone());
            let measurement =
                MeasurementType::from(seed.measurement.as_deref().unwrap_or("custom"));
            let severity = match seed.severity.as_deref() {
                Some(text) => text.parse::<Severity>().map_err(|e| anyhow!(e))?,
                None => Severity::Medium,
            };
            Ok(engine.create_custom_rule(
                condition,
                name,
                measurement,
                severity,
                seed.subject.as_deref(),
            )?)
        }
        (Some(_), Some(_)) => bail!("rule cannot name both a template and a condition"),
        (None, None) => bail!("rule needs either a template or a condition"),
    }
}

/// One tick of synthetic vitals for every subject. Values are derived from
/// the tick and subject index, so runs with the same config reproduce the
/// same alert sequence.
fn generate_points(feed: &FeedOptions, tick: u64) -> Vec<BiometricDataPoint> {
    let mut points = Vec::new();

    for index in 1..=feed.subjects {
        let subject = format!("subject-{index:02}");
        let device = format!("wearable-{index:02}");
        let seed = index as f64;
        let wobble = (tick as f64 * 7.3 + seed * 13.1) % 9.0;

        let mut heart_rate = 62.0 + seed * 2.0 + wobble;
        let mut spo2 = 98.0 - wobble * 0.3;
        let mut temperature = 36.3 + wobble * 0.06;

        // Every 15th tick one subject runs an episode that trips the
        // cardiac, oxygen and temperature templates at once.
        let spiker = (tick / 15) as usize % feed.subjects + 1;
        if tick % 15 == 0 && index == spiker {
            heart_rate = 118.0 + wobble;
            spo2 = 90.5 - wobble * 0.2;
            temperature = 38.3;
        }

        points.push(
            BiometricDataPoint::new(&subject, MeasurementType::HeartRate, heart_rate)
                .with_device(&device),
        );
        points.push(
            BiometricDataPoint::new(&subject, MeasurementType::OxygenSaturation, spo2)
                .with_device(&device),
        );
        points.push(
            BiometricDataPoint::new(&subject, MeasurementType::Temperature, temperature)
                .with_device(&device),
        );

        let mut pressure = HashMap::new();
        pressure.insert("systolic".to_string(), 112.0 + seed * 3.0 + wobble);
        pressure.insert("diastolic".to_string(), 72.0 + seed * 2.0 + wobble * 0.5);
        points.push(BiometricDataPoint::new(
            &subject,
            MeasurementType::BloodPressure,
            pressure,
        ));

        // A flaky sensor now and then exercises custom-condition rules.
        if tick % 40 == 0 && index == 1 {
            points.push(
                BiometricDataPoint::new(&subject, MeasurementType::HeartRate, 0.0)
                    .with_device(&device)
                    .with_metadata("sensor_status", "fault"),
            );
        }
    }

    points
}
