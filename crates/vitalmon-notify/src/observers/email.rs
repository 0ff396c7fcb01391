use crate::error::{NotifyError, Result};
use crate::plugin::ObserverPlugin;
use crate::{AlertObserver, NotificationResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing;
use vitalmon_common::types::BiometricAlert;

/// One formatted email as handed to the (external) mail gateway.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub alert_id: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Email sink. Formats a subject line and body for every alert and keeps an
/// audit log of everything handed off for delivery.
pub struct EmailObserver {
    id: String,
    recipients: Vec<String>,
    sent: Mutex<Vec<SentEmail>>,
}

impl EmailObserver {
    pub fn new(id: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            id: id.into(),
            recipients,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn subject_line(alert: &BiometricAlert) -> String {
        format!(
            "[{}] Biometric Alert: {}",
            alert.severity.to_string().to_uppercase(),
            alert.rule_name
        )
    }

    fn format_body(alert: &BiometricAlert) -> String {
        format!(
            "Alert: {severity}\nSubject: {subject}\nRule: {rule}\nValue: {value}\nTime: {time}\nMessage: {message}",
            severity = alert.severity,
            subject = alert.subject_id,
            rule = alert.rule_name,
            value = alert.data_point.value,
            time = alert.fired_at,
            message = alert.message,
        )
    }

    /// Audit log of delivered notifications, oldest first.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AlertObserver for EmailObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        "email"
    }

    async fn notify(&self, alert: &BiometricAlert) -> Result<Option<NotificationResult>> {
        let subject = Self::subject_line(alert);
        let body = Self::format_body(alert);

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentEmail {
                alert_id: alert.id.clone(),
                recipients: self.recipients.clone(),
                subject: subject.clone(),
                body,
            });

        tracing::debug!(
            observer = %self.id,
            alert_id = %alert.id,
            recipients = self.recipients.len(),
            subject = %subject,
            "Email notification recorded"
        );

        Ok(Some(NotificationResult {
            channel: "email".to_string(),
            alert_id: alert.id.clone(),
            recipients: self.recipients.clone(),
            summary: subject,
            delivered_at: Utc::now(),
        }))
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    recipients: Vec<String>,
}

pub struct EmailPlugin;

impl ObserverPlugin for EmailPlugin {
    fn kind(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        if cfg.recipients.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "email: recipients must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn create(&self, instance_id: &str, config: &Value) -> Result<Arc<dyn AlertObserver>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(Arc::new(EmailObserver::new(instance_id, cfg.recipients)))
    }
}
