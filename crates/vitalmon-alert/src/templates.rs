use crate::error::{EngineError, Result};
use crate::rule::{AlertRule, ComparisonOp, CustomCondition, RuleCondition};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use vitalmon_common::types::{BiometricDataPoint, MeasurementType, Severity};

/// Reusable rule blueprint: defaults plus a declared required-parameter
/// contract. Instantiated through
/// [`ClinicalRuleEngine::create_rule_from_template`].
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    pub id: String,
    pub name: String,
    pub measurement: MeasurementType,
    pub operator: ComparisonOp,
    pub default_threshold: f64,
    pub default_severity: Severity,
    pub default_description: Option<String>,
    pub default_cooldown_minutes: u64,
    /// Parameter names the caller must supply when instantiating.
    pub required_params: Vec<String>,
}

/// Entry in the built-in template table.
struct TemplateDef {
    id: &'static str,
    name: &'static str,
    measurement: MeasurementType,
    operator: ComparisonOp,
    threshold: f64,
    severity: Severity,
    description: &'static str,
    cooldown_minutes: u64,
}

/// Default clinical rule templates for first-time setup.
const DEFAULT_TEMPLATES: &[TemplateDef] = &[
    // ---- Cardiac ----
    TemplateDef {
        id: "tachycardia",
        name: "Tachycardia",
        measurement: MeasurementType::HeartRate,
        operator: ComparisonOp::GreaterThan,
        threshold: 100.0,
        severity: Severity::High,
        description: "Resting heart rate above upper bound",
        cooldown_minutes: 5,
    },
    TemplateDef {
        id: "bradycardia",
        name: "Bradycardia",
        measurement: MeasurementType::HeartRate,
        operator: ComparisonOp::LessThan,
        threshold: 50.0,
        severity: Severity::High,
        description: "Resting heart rate below lower bound",
        cooldown_minutes: 5,
    },
    // ---- Temperature ----
    TemplateDef {
        id: "fever",
        name: "Fever",
        measurement: MeasurementType::Temperature,
        operator: ComparisonOp::GreaterThan,
        threshold: 38.0,
        severity: Severity::Medium,
        description: "Body temperature above fever threshold",
        cooldown_minutes: 15,
    },
    TemplateDef {
        id: "hypothermia",
        name: "Hypothermia",
        measurement: MeasurementType::Temperature,
        operator: ComparisonOp::LessThan,
        threshold: 35.0,
        severity: Severity::Critical,
        description: "Body temperature below safe bound",
        cooldown_minutes: 15,
    },
    // ---- Glucose ----
    TemplateDef {
        id: "hypoglycemia",
        name: "Hypoglycemia",
        measurement: MeasurementType::Glucose,
        operator: ComparisonOp::LessThan,
        threshold: 3.9,
        severity: Severity::Critical,
        description: "Blood glucose below safe bound (mmol/L)",
        cooldown_minutes: 10,
    },
    TemplateDef {
        id: "hyperglycemia",
        name: "Hyperglycemia",
        measurement: MeasurementType::Glucose,
        operator: ComparisonOp::GreaterThan,
        threshold: 13.9,
        severity: Severity::High,
        description: "Blood glucose above safe bound (mmol/L)",
        cooldown_minutes: 10,
    },
    // ---- Respiratory ----
    TemplateDef {
        id: "low_spo2",
        name: "Low blood oxygen",
        measurement: MeasurementType::OxygenSaturation,
        operator: ComparisonOp::LessThan,
        threshold: 92.0,
        severity: Severity::Critical,
        description: "Oxygen saturation below safe bound",
        cooldown_minutes: 5,
    },
    TemplateDef {
        id: "tachypnea",
        name: "Tachypnea",
        measurement: MeasurementType::RespiratoryRate,
        operator: ComparisonOp::GreaterThan,
        threshold: 20.0,
        severity: Severity::Medium,
        description: "Respiratory rate above resting upper bound",
        cooldown_minutes: 10,
    },
];

/// Registry decoupling rule authoring from rule evaluation: named
/// templates with validated parameters on one side, named custom
/// predicates on the other.
#[derive(Default)]
pub struct ClinicalRuleEngine {
    templates: HashMap<String, RuleTemplate>,
    conditions: HashMap<String, CustomCondition>,
}

impl ClinicalRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine pre-loaded with the default clinical template set.
    pub fn with_default_templates() -> Self {
        let mut engine = Self::new();
        for def in DEFAULT_TEMPLATES {
            engine.register_template(RuleTemplate {
                id: def.id.to_string(),
                name: def.name.to_string(),
                measurement: def.measurement,
                operator: def.operator,
                default_threshold: def.threshold,
                default_severity: def.severity,
                default_description: Some(def.description.to_string()),
                default_cooldown_minutes: def.cooldown_minutes,
                required_params: Vec::new(),
            });
        }
        engine
    }

    /// Register or replace a template under its id.
    pub fn register_template(&mut self, template: RuleTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn template(&self, id: &str) -> Option<&RuleTemplate> {
        self.templates.get(id)
    }

    pub fn template_ids(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    /// Register or replace a custom condition predicate under `id`.
    pub fn register_condition<F>(&mut self, id: impl Into<String>, predicate: F)
    where
        F: Fn(&BiometricDataPoint) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(id.into(), Arc::new(predicate));
    }

    pub fn has_condition(&self, id: &str) -> bool {
        self.conditions.contains_key(id)
    }

    pub fn condition_ids(&self) -> Vec<&str> {
        self.conditions.keys().map(|s| s.as_str()).collect()
    }

    /// Build a rule from a template, merging defaults with the supplied
    /// overrides (`name`, `threshold`, `severity`, `description`, `active`,
    /// `cooldown_minutes`) and scoping it to `subject_id` when given.
    ///
    /// # Errors
    ///
    /// [`EngineError::TemplateNotFound`] for an unregistered template id,
    /// [`EngineError::MissingParameter`] when a declared required parameter
    /// is absent, [`EngineError::InvalidParameter`] for an ill-typed or
    /// non-finite override.
    pub fn create_rule_from_template(
        &self,
        template_id: &str,
        params: &Map<String, Value>,
        subject_id: Option<&str>,
    ) -> Result<AlertRule> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.to_string()))?;

        for required in &template.required_params {
            if !params.contains_key(required) {
                return Err(EngineError::MissingParameter {
                    template: template_id.to_string(),
                    name: required.clone(),
                });
            }
        }

        let name = param_str(params, "name")?.unwrap_or_else(|| template.name.clone());
        let threshold = param_f64(params, "threshold")?.unwrap_or(template.default_threshold);
        let severity = match param_str(params, "severity")? {
            Some(s) => s
                .parse::<Severity>()
                .map_err(|reason| EngineError::InvalidParameter {
                    name: "severity".to_string(),
                    reason,
                })?,
            None => template.default_severity,
        };
        let description = param_str(params, "description")?
            .or_else(|| template.default_description.clone());
        let active = param_bool(params, "active")?.unwrap_or(true);
        let cooldown_minutes =
            param_u64(params, "cooldown_minutes")?.unwrap_or(template.default_cooldown_minutes);

        let mut rule = AlertRule::new(
            vitalmon_common::id::next_id(),
            name,
            template.measurement,
            RuleCondition::Threshold {
                operator: template.operator,
                threshold,
            },
            severity,
        )
        .with_cooldown(cooldown_minutes);
        if let Some(description) = description {
            rule = rule.with_description(description);
        }
        if let Some(subject) = subject_id {
            rule = rule.with_subject(subject);
        }
        rule.set_active(active);
        Ok(rule)
    }

    /// Build a rule around a registered custom predicate.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownCondition`] when no predicate is registered
    /// under `condition_id`.
    pub fn create_custom_rule(
        &self,
        condition_id: &str,
        name: impl Into<String>,
        measurement: MeasurementType,
        severity: Severity,
        subject_id: Option<&str>,
    ) -> Result<AlertRule> {
        let predicate = self
            .conditions
            .get(condition_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCondition(condition_id.to_string()))?;

        let mut rule = AlertRule::new(
            vitalmon_common::id::next_id(),
            name,
            measurement,
            RuleCondition::Custom {
                condition_id: condition_id.to_string(),
                predicate,
            },
            severity,
        );
        if let Some(subject) = subject_id {
            rule = rule.with_subject(subject);
        }
        Ok(rule)
    }
}

// ---- Override parameter extraction ----

fn param_str(params: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(EngineError::InvalidParameter {
            name: key.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

fn param_f64(params: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => match value.as_f64() {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(EngineError::InvalidParameter {
                name: key.to_string(),
                reason: "expected a finite number".to_string(),
            }),
        },
    }
}

fn param_bool(params: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(EngineError::InvalidParameter {
            name: key.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn param_u64(params: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(v) => Ok(Some(v)),
            None => Err(EngineError::InvalidParameter {
                name: key.to_string(),
                reason: "expected a non-negative integer".to_string(),
            }),
        },
    }
}
