//! Monitoring error types
//!
//! One error enum for the whole engine. Only lifecycle and validation errors ever
//! reach a `monitor_transaction` caller; persistence trouble degrades to warnings.

use thiserror::Error;

use crate::monitoring::types::AlertStatus;

/// Errors raised by the monitoring engine
#[derive(Debug, Error)]
pub enum MonitoringError {
    /// `start_monitoring` called while the background loops are running
    #[error("Monitoring engine is already running")]
    AlreadyRunning,

    /// `stop_monitoring` called while nothing is running
    #[error("Monitoring engine is not running")]
    NotRunning,

    /// Background loops need an ambient tokio runtime
    #[error("No tokio runtime available to spawn background loops")]
    NoRuntime,

    /// Structurally invalid transaction, rejected before evaluation
    #[error("Invalid transaction: {field} {reason}")]
    Validation { field: String, reason: String },

    /// Persistence gateway failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Record (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Compliance rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Alert lifecycle transition not allowed by the state machine
    #[error("Alert {alert_id} cannot move from {from} to {to}")]
    InvalidTransition {
        alert_id: String,
        from: AlertStatus,
        to: AlertStatus,
    },

    /// Prometheus registry failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Monitoring result type
pub type Result<T> = std::result::Result<T, MonitoringError>;

impl MonitoringError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Start/stop misuse
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning | Self::NoRuntime)
    }

    /// Whether the caller can retry or carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning
                | Self::NotRunning
                | Self::Persistence(_)
                | Self::PatternNotFound(_)
                | Self::RuleNotFound(_)
                | Self::AlertNotFound(_)
                | Self::InvalidTransition { .. }
        )
    }
}

impl From<serde_json::Error> for MonitoringError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for MonitoringError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitoringError::validation("customer_id", "must not be empty");
        assert_eq!(err.to_string(), "Invalid transaction: customer_id must not be empty");
    }

    #[test]
    fn test_lifecycle_errors() {
        assert!(MonitoringError::AlreadyRunning.is_lifecycle());
        assert!(MonitoringError::NotRunning.is_lifecycle());
        assert!(!MonitoringError::Persistence("disk full".into()).is_lifecycle());
    }

    #[test]
    fn test_transition_error_mentions_states() {
        let err = MonitoringError::InvalidTransition {
            alert_id: "A1".to_string(),
            from: AlertStatus::Resolved,
            to: AlertStatus::Active,
        };
        let text = err.to_string();
        assert!(text.contains("RESOLVED"));
        assert!(text.contains("ACTIVE"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: MonitoringError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, MonitoringError::Serialization(_)));
    }
}
