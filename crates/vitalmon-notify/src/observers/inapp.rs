use crate::error::{NotifyError, Result};
use crate::plugin::ObserverPlugin;
use crate::{AlertObserver, NotificationResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing;
use vitalmon_common::types::BiometricAlert;

/// In-app sink. Derives the recipient set from the alert's subject via
/// care-team assignments and appends the alert to each recipient's inbox.
///
/// Subjects without an assignment fall back to a synthetic
/// `care-team:<subject>` inbox so no alert is ever unroutable.
pub struct InAppObserver {
    id: String,
    care_teams: RwLock<HashMap<String, Vec<String>>>,
    inboxes: Mutex<HashMap<String, Vec<BiometricAlert>>>,
}

impl InAppObserver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            care_teams: RwLock::new(HashMap::new()),
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Route a subject's alerts to specific care-team member ids.
    pub fn assign_care_team(&self, subject_id: impl Into<String>, members: Vec<String>) {
        self.care_teams
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subject_id.into(), members);
    }

    fn recipients_for(&self, subject_id: &str) -> Vec<String> {
        let teams = self
            .care_teams
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match teams.get(subject_id) {
            Some(members) if !members.is_empty() => members.clone(),
            _ => vec![format!("care-team:{subject_id}")],
        }
    }

    /// Ordered inbox for one recipient, oldest first.
    pub fn inbox(&self, recipient: &str) -> Vec<BiometricAlert> {
        self.inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlertObserver for InAppObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        "in_app"
    }

    async fn notify(&self, alert: &BiometricAlert) -> Result<Option<NotificationResult>> {
        let recipients = self.recipients_for(&alert.subject_id);

        {
            let mut inboxes = self
                .inboxes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for recipient in &recipients {
                inboxes
                    .entry(recipient.clone())
                    .or_default()
                    .push(alert.clone());
            }
        }

        tracing::debug!(
            observer = %self.id,
            alert_id = %alert.id,
            subject = %alert.subject_id,
            recipients = recipients.len(),
            "In-app notification delivered"
        );

        Ok(Some(NotificationResult {
            channel: "in_app".to_string(),
            alert_id: alert.id.clone(),
            recipients,
            summary: alert.message.clone(),
            delivered_at: Utc::now(),
        }))
    }
}

// Plugin

#[derive(Deserialize)]
struct InAppConfig {
    #[serde(default)]
    care_teams: HashMap<String, Vec<String>>,
}

pub struct InAppPlugin;

impl ObserverPlugin for InAppPlugin {
    fn kind(&self) -> &str {
        "in_app"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<InAppConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("in_app: {e}")))?;
        Ok(())
    }

    fn create(&self, instance_id: &str, config: &Value) -> Result<Arc<dyn AlertObserver>> {
        let cfg: InAppConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("in_app: {e}")))?;
        let observer = InAppObserver::new(instance_id);
        for (subject_id, members) in cfg.care_teams {
            observer.assign_care_team(subject_id, members);
        }
        Ok(Arc::new(observer))
    }
}
