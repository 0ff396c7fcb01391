use serde::Deserialize;
use serde_json::{Map, Value};
use vitalmon_alert::processor::ProcessorConfig;

#[derive(Debug, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub observers: Vec<ObserverSeed>,
    #[serde(default)]
    pub rules: Vec<RuleSeed>,
    #[serde(default)]
    pub feed: FeedOptions,
}

impl FeedConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

/// One notification channel to build through the observer registry.
#[derive(Debug, Deserialize)]
pub struct ObserverSeed {
    pub id: String,
    /// Plugin kind, e.g. "email", "sms" or "in_app".
    pub kind: String,
    pub config: Option<toml::Value>,
}

impl ObserverSeed {
    pub fn config_json(&self) -> anyhow::Result<Value> {
        match &self.config {
            Some(value) => Ok(serde_json::to_value(value)?),
            None => Ok(Value::Object(Map::new())),
        }
    }
}

/// One alert rule, instantiated either from a clinical template or from a
/// registered custom condition.
#[derive(Debug, Deserialize)]
pub struct RuleSeed {
    pub template: Option<String>,
    pub condition: Option<String>,
    /// Display name; custom-condition rules only (templates carry their own).
    pub name: Option<String>,
    /// Measurement for custom-condition rules.
    pub measurement: Option<String>,
    pub severity: Option<String>,
    /// Restrict the rule to one subject; unset applies it to everyone.
    pub subject: Option<String>,
    pub params: Option<toml::Value>,
}

impl RuleSeed {
    pub fn params_json(&self) -> anyhow::Result<Map<String, Value>> {
        match &self.params {
            Some(value) => match serde_json::to_value(value)? {
                Value::Object(map) => Ok(map),
                _ => anyhow::bail!("rule params must be a table"),
            },
            None => Ok(Map::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedOptions {
    #[serde(default = "default_subjects")]
    pub subjects: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Number of ticks to run; 0 runs until interrupted.
    #[serde(default)]
    pub iterations: u64,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            subjects: default_subjects(),
            interval_ms: default_interval_ms(),
            iterations: 0,
        }
    }
}

fn default_subjects() -> usize {
    4
}

fn default_interval_ms() -> u64 {
    1000
}
