use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use vitalmon_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Biometric signal category a data point and a rule are keyed on.
///
/// String conversion is total: unrecognized names map to [`Custom`] instead
/// of failing, so readings from newer device firmware still route through
/// the pipeline.
///
/// # Examples
///
/// ```
/// use vitalmon_common::types::MeasurementType;
///
/// let mt: MeasurementType = "heart_rate".parse().unwrap();
/// assert_eq!(mt, MeasurementType::HeartRate);
///
/// let unknown: MeasurementType = "brainwave".parse().unwrap();
/// assert_eq!(unknown, MeasurementType::Custom);
/// ```
///
/// [`Custom`]: MeasurementType::Custom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MeasurementType {
    HeartRate,
    BloodPressure,
    Temperature,
    Sleep,
    Activity,
    Glucose,
    OxygenSaturation,
    RespiratoryRate,
    Weight,
    Mood,
    Stress,
    Custom,
}

impl MeasurementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::HeartRate => "heart_rate",
            MeasurementType::BloodPressure => "blood_pressure",
            MeasurementType::Temperature => "temperature",
            MeasurementType::Sleep => "sleep",
            MeasurementType::Activity => "activity",
            MeasurementType::Glucose => "glucose",
            MeasurementType::OxygenSaturation => "oxygen_saturation",
            MeasurementType::RespiratoryRate => "respiratory_rate",
            MeasurementType::Weight => "weight",
            MeasurementType::Mood => "mood",
            MeasurementType::Stress => "stress",
            MeasurementType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for MeasurementType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "heart_rate" => MeasurementType::HeartRate,
            "blood_pressure" => MeasurementType::BloodPressure,
            "temperature" => MeasurementType::Temperature,
            "sleep" => MeasurementType::Sleep,
            "activity" => MeasurementType::Activity,
            "glucose" => MeasurementType::Glucose,
            "oxygen_saturation" => MeasurementType::OxygenSaturation,
            "respiratory_rate" => MeasurementType::RespiratoryRate,
            "weight" => MeasurementType::Weight,
            "mood" => MeasurementType::Mood,
            "stress" => MeasurementType::Stress,
            _ => MeasurementType::Custom,
        }
    }
}

impl From<String> for MeasurementType {
    fn from(s: String) -> Self {
        MeasurementType::from(s.as_str())
    }
}

impl From<MeasurementType> for String {
    fn from(m: MeasurementType) -> Self {
        m.as_str().to_string()
    }
}

impl std::str::FromStr for MeasurementType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MeasurementType::from(s))
    }
}

/// Observed value of a data point. Numeric for most vitals, composite for
/// multi-part readings (e.g. blood pressure systolic/diastolic), text for
/// self-reported entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BiometricValue {
    Numeric(f64),
    Composite(HashMap<String, f64>),
    Text(String),
}

impl BiometricValue {
    /// Numeric view used by threshold comparisons. Text that parses as a
    /// number coerces; composite values do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BiometricValue::Numeric(v) => Some(*v),
            BiometricValue::Text(s) => s.trim().parse().ok(),
            BiometricValue::Composite(_) => None,
        }
    }

    /// Total conversion from arbitrary JSON. Shapes with no sensible
    /// biometric reading degrade to `Text`, never to an error.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) => BiometricValue::Numeric(v),
                None => BiometricValue::Text(n.to_string()),
            },
            serde_json::Value::String(s) => BiometricValue::Text(s.clone()),
            serde_json::Value::Object(map) => {
                let parts: HashMap<String, f64> = map
                    .iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                    .collect();
                if parts.is_empty() && !map.is_empty() {
                    BiometricValue::Text(value.to_string())
                } else {
                    BiometricValue::Composite(parts)
                }
            }
            serde_json::Value::Bool(b) => BiometricValue::Numeric(if *b { 1.0 } else { 0.0 }),
            other => BiometricValue::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for BiometricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BiometricValue::Numeric(v) => write!(f, "{v}"),
            BiometricValue::Composite(parts) => {
                let mut pairs: Vec<String> =
                    parts.iter().map(|(k, v)| format!("{k}={v}")).collect();
                pairs.sort();
                write!(f, "{}", pairs.join(", "))
            }
            BiometricValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for BiometricValue {
    fn from(v: f64) -> Self {
        BiometricValue::Numeric(v)
    }
}

impl From<&str> for BiometricValue {
    fn from(s: &str) -> Self {
        BiometricValue::Text(s.to_string())
    }
}

impl From<String> for BiometricValue {
    fn from(s: String) -> Self {
        BiometricValue::Text(s)
    }
}

impl From<HashMap<String, f64>> for BiometricValue {
    fn from(parts: HashMap<String, f64>) -> Self {
        BiometricValue::Composite(parts)
    }
}

/// One biometric observation. Immutable once constructed; consumed exactly
/// once by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricDataPoint {
    pub id: String,
    pub subject_id: String,
    pub measurement: MeasurementType,
    pub value: BiometricValue,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BiometricDataPoint {
    pub fn new(
        subject_id: impl Into<String>,
        measurement: MeasurementType,
        value: impl Into<BiometricValue>,
    ) -> Self {
        Self {
            id: id::next_id(),
            subject_id: subject_id.into(),
            measurement,
            value: value.into(),
            timestamp: Utc::now(),
            device_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a data point from the transport representation accepted at the
    /// ingestion boundary. Unknown measurement names map to `custom` and a
    /// missing timestamp defaults to the ingestion time.
    pub fn from_record(record: DataPointRecord) -> Self {
        Self {
            id: id::next_id(),
            subject_id: record.subject_id,
            measurement: record.measurement.into(),
            value: BiometricValue::from_json(&record.value),
            timestamp: record.timestamp.unwrap_or_else(Utc::now),
            device_id: record.device_id,
            metadata: record.metadata,
        }
    }
}

/// Wire-level reading as deserialized at the ingestion boundary, before any
/// coercion has happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPointRecord {
    pub subject_id: String,
    #[serde(rename = "type")]
    pub measurement: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Alert produced when a rule matches a data point. Embeds the triggering
/// observation so downstream channels need no further lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiometricAlert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub subject_id: String,
    pub severity: Severity,
    pub message: String,
    pub data_point: BiometricDataPoint,
    pub fired_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl BiometricAlert {
    pub fn new(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        data_point: BiometricDataPoint,
    ) -> Self {
        Self {
            id: id::next_id(),
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            subject_id: data_point.subject_id.clone(),
            severity,
            message: message.into(),
            data_point,
            fired_at: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// One-way transition. Returns false and changes nothing when the alert
    /// was already acknowledged.
    pub fn acknowledge(&mut self, actor: &str) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(actor.to_string());
        self.acknowledged_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_numeric_coercion() {
        assert_eq!(BiometricValue::Numeric(98.6).as_f64(), Some(98.6));
        assert_eq!(BiometricValue::Text("120".into()).as_f64(), Some(120.0));
        assert_eq!(BiometricValue::Text(" 72.5 ".into()).as_f64(), Some(72.5));
        assert_eq!(BiometricValue::Text("irregular".into()).as_f64(), None);

        let mut parts = HashMap::new();
        parts.insert("systolic".to_string(), 120.0);
        assert_eq!(BiometricValue::Composite(parts).as_f64(), None);
    }

    #[test]
    fn test_value_from_json_is_total() {
        assert_eq!(
            BiometricValue::from_json(&json!(88)),
            BiometricValue::Numeric(88.0)
        );
        assert_eq!(
            BiometricValue::from_json(&json!("tired")),
            BiometricValue::Text("tired".to_string())
        );
        let composite = BiometricValue::from_json(&json!({"systolic": 120, "diastolic": 80}));
        match composite {
            BiometricValue::Composite(parts) => {
                assert_eq!(parts.get("systolic"), Some(&120.0));
                assert_eq!(parts.get("diastolic"), Some(&80.0));
            }
            other => panic!("expected composite, got {other:?}"),
        }
        // Arrays have no biometric reading; they degrade to text.
        assert!(matches!(
            BiometricValue::from_json(&json!([1, 2, 3])),
            BiometricValue::Text(_)
        ));
    }

    #[test]
    fn test_composite_display_is_sorted() {
        let mut parts = HashMap::new();
        parts.insert("systolic".to_string(), 120.0);
        parts.insert("diastolic".to_string(), 80.0);
        let value = BiometricValue::Composite(parts);
        assert_eq!(value.to_string(), "diastolic=80, systolic=120");
    }

    #[test]
    fn test_from_record_coerces_unknown_type() {
        let record = DataPointRecord {
            subject_id: "p1".to_string(),
            measurement: "galvanic_skin_response".to_string(),
            value: json!(0.42),
            timestamp: None,
            device_id: Some("wearable-7".to_string()),
            metadata: HashMap::new(),
        };
        let dp = BiometricDataPoint::from_record(record);
        assert_eq!(dp.measurement, MeasurementType::Custom);
        assert_eq!(dp.value, BiometricValue::Numeric(0.42));
        assert_eq!(dp.device_id.as_deref(), Some("wearable-7"));
        assert!(!dp.id.is_empty());
    }

    #[test]
    fn test_record_json_round_trip() {
        let raw = r#"{"subject_id":"p9","type":"heart_rate","value":101,"metadata":{"ward":"icu"}}"#;
        let record: DataPointRecord = serde_json::from_str(raw).unwrap();
        let dp = BiometricDataPoint::from_record(record);
        assert_eq!(dp.measurement, MeasurementType::HeartRate);
        assert_eq!(dp.metadata.get("ward").map(String::as_str), Some("icu"));
    }

    #[test]
    fn test_acknowledge_is_one_way() {
        let dp = BiometricDataPoint::new("p1", MeasurementType::HeartRate, 130.0);
        let mut alert =
            BiometricAlert::new("r1", "Tachycardia watch", Severity::High, "too fast", dp);
        assert!(!alert.acknowledged);
        assert!(alert.acknowledge("nurse-4"));
        assert!(alert.acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("nurse-4"));
        let first_ack = alert.acknowledged_at;
        assert!(!alert.acknowledge("nurse-5"));
        assert_eq!(alert.acknowledged_by.as_deref(), Some("nurse-4"));
        assert_eq!(alert.acknowledged_at, first_ack);
    }
}
