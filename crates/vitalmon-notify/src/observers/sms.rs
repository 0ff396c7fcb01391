use crate::error::{NotifyError, Result};
use crate::plugin::ObserverPlugin;
use crate::{AlertObserver, NotificationResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing;
use vitalmon_common::types::{BiometricAlert, Severity};

/// SMS sink. Formats a single-line message per alert; when `urgent_only` is
/// set, alerts below [`Severity::High`] are dropped without a record.
pub struct SmsObserver {
    id: String,
    phone_numbers: Vec<String>,
    urgent_only: bool,
    sent: Mutex<Vec<NotificationResult>>,
}

impl SmsObserver {
    pub fn new(id: impl Into<String>, phone_numbers: Vec<String>, urgent_only: bool) -> Self {
        Self {
            id: id.into(),
            phone_numbers,
            urgent_only,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn format_message(alert: &BiometricAlert) -> String {
        format!(
            "[vitalmon][{severity}] {subject}: {message}",
            severity = alert.severity,
            subject = alert.subject_id,
            message = alert.message,
        )
    }

    /// Audit log of delivered notifications, oldest first.
    pub fn sent(&self) -> Vec<NotificationResult> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AlertObserver for SmsObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> &str {
        "sms"
    }

    async fn notify(&self, alert: &BiometricAlert) -> Result<Option<NotificationResult>> {
        if self.urgent_only && alert.severity < Severity::High {
            tracing::debug!(
                observer = %self.id,
                alert_id = %alert.id,
                severity = %alert.severity,
                "SMS skipped (urgent-only observer)"
            );
            return Ok(None);
        }

        let message = Self::format_message(alert);
        let result = NotificationResult {
            channel: "sms".to_string(),
            alert_id: alert.id.clone(),
            recipients: self.phone_numbers.clone(),
            summary: message,
            delivered_at: Utc::now(),
        };

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(result.clone());

        tracing::debug!(
            observer = %self.id,
            alert_id = %alert.id,
            recipients = self.phone_numbers.len(),
            "SMS notification recorded"
        );

        Ok(Some(result))
    }
}

// Plugin

#[derive(Deserialize)]
struct SmsConfig {
    phone_numbers: Vec<String>,
    #[serde(default)]
    urgent_only: bool,
}

pub struct SmsPlugin;

impl ObserverPlugin for SmsPlugin {
    fn kind(&self) -> &str {
        "sms"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: SmsConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("sms: {e}")))?;
        if cfg.phone_numbers.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "sms: phone_numbers must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn create(&self, instance_id: &str, config: &Value) -> Result<Arc<dyn AlertObserver>> {
        let cfg: SmsConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("sms: {e}")))?;
        Ok(Arc::new(SmsObserver::new(
            instance_id,
            cfg.phone_numbers,
            cfg.urgent_only,
        )))
    }
}
