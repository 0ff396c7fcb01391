use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vitalmon_common::types::{BiometricDataPoint, MeasurementType, Severity};

/// Comparison applied by threshold conditions.
///
/// `Equal` and `NotEqual` use exact floating-point comparison; they are
/// meant for enumerated readings (e.g. a sleep stage code), not for
/// continuous measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Equal,
    NotEqual,
}

impl FromStr for ComparisonOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::GreaterThan),
            "greater_equal" | "gte" => Ok(Self::GreaterEqual),
            "less_than" | "lt" => Ok(Self::LessThan),
            "less_equal" | "lte" => Ok(Self::LessEqual),
            "equal" | "eq" => Ok(Self::Equal),
            "not_equal" | "ne" => Ok(Self::NotEqual),
            _ => Err(format!("unknown comparison operator: {s}")),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "greater_than"),
            Self::GreaterEqual => write!(f, "greater_equal"),
            Self::LessThan => write!(f, "less_than"),
            Self::LessEqual => write!(f, "less_equal"),
            Self::Equal => write!(f, "equal"),
            Self::NotEqual => write!(f, "not_equal"),
        }
    }
}

impl ComparisonOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }

    /// Prose form used in generated rule descriptions.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::GreaterEqual => "at or above",
            Self::LessThan => "below",
            Self::LessEqual => "at or below",
            Self::Equal => "equal to",
            Self::NotEqual => "not equal to",
        }
    }
}

/// Predicate backing a custom rule condition. Receives the full data point
/// so it can inspect metadata and composite values, not just the numeric
/// reading.
pub type CustomCondition = Arc<dyn Fn(&BiometricDataPoint) -> bool + Send + Sync>;

/// What a rule checks against each matching data point.
#[derive(Clone)]
pub enum RuleCondition {
    /// Compare the numeric reading against a fixed threshold. Data points
    /// without a numeric interpretation never match.
    Threshold { operator: ComparisonOp, threshold: f64 },
    /// Delegate to a predicate registered in the rule engine under
    /// `condition_id`.
    Custom {
        condition_id: String,
        predicate: CustomCondition,
    },
}

impl RuleCondition {
    /// True when evaluation needs a numeric reading from the data point.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Self::Threshold { .. })
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::Threshold { threshold, .. } => Some(*threshold),
            Self::Custom { .. } => None,
        }
    }
}

impl fmt::Debug for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threshold {
                operator,
                threshold,
            } => f
                .debug_struct("Threshold")
                .field("operator", operator)
                .field("threshold", threshold)
                .finish(),
            Self::Custom { condition_id, .. } => f
                .debug_struct("Custom")
                .field("condition_id", condition_id)
                .finish_non_exhaustive(),
        }
    }
}

/// A clinical alert rule bound to one measurement type.
///
/// Rules are shared between the processor and callers as `Arc<AlertRule>`;
/// the `active` flag is atomic so a rule can be paused and resumed at
/// runtime without replacing it.
#[derive(Debug)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub measurement: MeasurementType,
    pub condition: RuleCondition,
    /// Restricts the rule to a single subject when set.
    pub subject_id: Option<String>,
    pub severity: Severity,
    pub description: String,
    pub cooldown_minutes: u64,
    active: AtomicBool,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        measurement: MeasurementType,
        condition: RuleCondition,
        severity: Severity,
    ) -> Self {
        let description = default_description(&measurement, &condition);
        Self {
            id: id.into(),
            name: name.into(),
            measurement,
            condition,
            subject_id: None,
            severity,
            description,
            cooldown_minutes: 0,
            active: AtomicBool::new(true),
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_cooldown(mut self, minutes: u64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// True when the rule is active, the data point's measurement type
    /// matches, and the rule's subject scope (if any) matches the point's
    /// subject.
    pub fn applies_to(&self, point: &BiometricDataPoint) -> bool {
        if !self.active() || self.measurement != point.measurement {
            return false;
        }
        match &self.subject_id {
            Some(subject) => subject == &point.subject_id,
            None => true,
        }
    }

    /// Evaluates the condition against one data point. Returns false when
    /// [`applies_to`] is false, when a threshold condition meets a value
    /// with no numeric reading, or when the condition simply does not hold.
    ///
    /// [`applies_to`]: AlertRule::applies_to
    pub fn evaluate(&self, point: &BiometricDataPoint) -> bool {
        if !self.applies_to(point) {
            return false;
        }
        match &self.condition {
            RuleCondition::Threshold {
                operator,
                threshold,
            } => match point.value.as_f64() {
                Some(value) => operator.check(value, *threshold),
                None => false,
            },
            RuleCondition::Custom { predicate, .. } => predicate(point),
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes as i64)
    }
}

fn default_description(measurement: &MeasurementType, condition: &RuleCondition) -> String {
    match condition {
        RuleCondition::Threshold {
            operator,
            threshold,
        } => format!("{} {} {}", measurement, operator.describe(), threshold),
        RuleCondition::Custom { condition_id, .. } => {
            format!("{} matches condition '{}'", measurement, condition_id)
        }
    }
}
