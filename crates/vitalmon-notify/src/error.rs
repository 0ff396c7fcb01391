/// Errors that can occur within the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use vitalmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing recipients".to_string());
/// assert!(err.to_string().contains("recipients"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Observer configuration is missing a required field or contains an
    /// invalid value.
    #[error("Notify: invalid observer configuration: {0}")]
    InvalidConfig(String),

    /// The observer kind is not registered in the plugin registry.
    #[error("Notify: unknown observer kind '{0}'")]
    UnknownObserverKind(String),

    /// An accepted alert could not be handed to the channel.
    #[error("Notify: delivery through {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },

    /// JSON serialization or deserialization failed (e.g. observer config
    /// parsing).
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
