use crate::error::{NotifyError, Result};
use crate::AlertObserver;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for creating [`AlertObserver`] instances from JSON configuration.
///
/// Each plugin is registered in the [`ObserverRegistry`] by its `kind()`.
/// Operator configuration (e.g. the feed's `[[observers]]` tables) is
/// validated and instantiated through the matching plugin.
pub trait ObserverPlugin: Send + Sync {
    /// Returns the observer kind (e.g., `"email"`, `"sms"`, `"in_app"`).
    fn kind(&self) -> &str;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a configured observer from a validated JSON config.
    /// `instance_id` uniquely identifies the instance among registered
    /// observers.
    fn create(&self, instance_id: &str, config: &Value) -> Result<Arc<dyn AlertObserver>>;
}

/// Registry of available [`ObserverPlugin`]s, used to instantiate observers
/// from configuration.
///
/// # Examples
///
/// ```
/// use vitalmon_notify::plugin::ObserverRegistry;
///
/// let registry = ObserverRegistry::default();
/// assert!(registry.has_kind("email"));
/// assert!(registry.has_kind("sms"));
/// assert!(registry.has_kind("in_app"));
/// assert!(!registry.has_kind("pager"));
/// ```
pub struct ObserverRegistry {
    plugins: HashMap<String, Box<dyn ObserverPlugin>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ObserverPlugin>) {
        let kind = plugin.kind().to_string();
        self.plugins.insert(kind, plugin);
    }

    /// Validate `config` and build an observer of the given kind.
    pub fn create_observer(
        &self,
        kind: &str,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn AlertObserver>> {
        let plugin = self
            .plugins
            .get(kind)
            .ok_or_else(|| NotifyError::UnknownObserverKind(kind.to_string()))?;
        plugin.validate_config(config)?;
        plugin.create(instance_id, config)
    }

    pub fn get_plugin(&self, kind: &str) -> Option<&dyn ObserverPlugin> {
        self.plugins.get(kind).map(|p| p.as_ref())
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.plugins.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::observers::email::EmailPlugin));
        registry.register(Box::new(crate::observers::sms::SmsPlugin));
        registry.register(Box::new(crate::observers::inapp::InAppPlugin));
        registry
    }
}
