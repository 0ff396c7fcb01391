/// Errors produced while building rules from templates or custom
/// conditions.
///
/// # Examples
///
/// ```rust
/// use vitalmon_alert::error::EngineError;
///
/// let err = EngineError::TemplateNotFound("tachycardia".to_string());
/// assert!(err.to_string().contains("tachycardia"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No template is registered under the requested id.
    #[error("Engine: unknown rule template '{0}'")]
    TemplateNotFound(String),

    /// A template parameter the caller must supply was absent.
    #[error("Engine: template '{template}' requires parameter '{name}'")]
    MissingParameter { template: String, name: String },

    /// A supplied parameter had the wrong type or an out-of-range value.
    #[error("Engine: invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// No custom condition predicate is registered under the requested id.
    #[error("Engine: unknown custom condition '{0}'")]
    UnknownCondition(String),
}

/// Convenience `Result` alias for rule engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
