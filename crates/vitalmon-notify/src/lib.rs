//! Notification fan-out for biometric alerts with pluggable observer
//! support.
//!
//! Generated alerts are delivered to one or more [`AlertObserver`]
//! implementations. Built-in observers cover email, SMS, and in-app
//! inboxes; the [`dispatch::AlertDispatcher`] runs each observer behind its
//! own bounded queue and worker task so a slow or failing channel cannot
//! stall the others.

pub mod dispatch;
pub mod error;
pub mod observers;
pub mod plugin;

mod queue;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vitalmon_common::types::BiometricAlert;

use crate::error::Result;

/// Outcome reported by an observer that accepted an alert.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResult {
    pub channel: String,
    pub alert_id: String,
    pub recipients: Vec<String>,
    pub summary: String,
    pub delivered_at: DateTime<Utc>,
}

/// A notification sink consuming generated alerts (email, SMS, in-app inbox).
///
/// Implementations are created by the corresponding [`plugin::ObserverPlugin`]
/// and registered with the processor, which runs each observer behind its own
/// dispatch queue.
#[async_trait]
pub trait AlertObserver: Send + Sync {
    /// Unique instance identifier, distinct from the channel kind.
    fn id(&self) -> &str;

    /// Returns the channel kind (e.g., `"email"`, `"sms"`, `"in_app"`).
    fn channel(&self) -> &str;

    /// Handles one alert. `Ok(None)` means the observer's own policy
    /// filtered the alert and nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error when the alert should have been delivered but the
    /// attempt failed.
    async fn notify(&self, alert: &BiometricAlert) -> Result<Option<NotificationResult>>;
}
