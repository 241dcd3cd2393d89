//! Error types for the vigil-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alerting engine.
///
/// Only validation, lookup and store failures surface to callers. Evaluation,
/// provider and channel failures are absorbed by the engine and dispatcher and
/// show up in logs and delivery maps instead.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert rule configuration.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// A condition failed construction-time validation.
    #[error("invalid condition on field '{field}': {reason}")]
    InvalidCondition {
        /// The context field the condition targets.
        field: String,
        /// The reason the condition is invalid.
        reason: String,
    },

    /// Alert rule with the given ID was not found for the tenant.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule ID that was not found.
        id: String,
    },

    /// Alert with the given ID was not found for the tenant.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: String,
    },

    /// No notification channel is registered under the given ID.
    #[error("channel not registered: {channel}")]
    ChannelNotRegistered {
        /// The unknown channel ID.
        channel: String,
    },

    /// No data context provider is registered for the alert type.
    #[error("no context provider registered for alert type '{alert_type}'")]
    ProviderNotRegistered {
        /// The alert type without a provider.
        alert_type: String,
    },

    /// A data context provider failed to produce a context.
    #[error("context provider for '{alert_type}' failed: {reason}")]
    ProviderFailed {
        /// The alert type whose provider failed.
        alert_type: String,
        /// The reason the fetch failed.
        reason: String,
    },

    /// An I/O bound call exceeded its deadline.
    #[error("{operation} timed out after {millis}ms")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The deadline that elapsed.
        millis: u128,
    },

    /// Notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// A scan for this tenant is already running.
    #[error("scan already in progress for tenant {tenant}")]
    ScanInProgress {
        /// The tenant whose scan is in flight.
        tenant: String,
    },

    /// The rule or alert store rejected an operation.
    #[error("store error: {reason}")]
    Store {
        /// The reason the store operation failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl AlertError {
    /// Shorthand for an [`AlertError::InvalidRule`].
    pub(crate) fn invalid_rule(reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`AlertError::InvalidCondition`].
    pub(crate) fn invalid_condition(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCondition {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised by construction-time validation.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRule { .. }
                | Self::InvalidCondition { .. }
                | Self::ChannelNotRegistered { .. }
        )
    }

    /// Returns true if a scan was refused because one is already running.
    #[must_use]
    pub const fn is_scan_in_progress(&self) -> bool {
        matches!(self, Self::ScanInProgress { .. })
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_rule() {
        let err = AlertError::invalid_rule("empty name");
        assert_eq!(err.to_string(), "invalid alert rule: empty name");
    }

    #[test]
    fn error_display_invalid_condition() {
        let err = AlertError::invalid_condition("temperature", "operator 'between' requires value2");
        assert_eq!(
            err.to_string(),
            "invalid condition on field 'temperature': operator 'between' requires value2"
        );
    }

    #[test]
    fn error_display_rule_not_found() {
        let err = AlertError::RuleNotFound {
            id: "rule-1".to_string(),
        };
        assert_eq!(err.to_string(), "rule not found: rule-1");
    }

    #[test]
    fn error_display_alert_not_found() {
        let err = AlertError::AlertNotFound {
            id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "alert not found: abc-123");
    }

    #[test]
    fn error_display_provider_failed() {
        let err = AlertError::ProviderFailed {
            alert_type: "weather".to_string(),
            reason: "upstream unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "context provider for 'weather' failed: upstream unavailable"
        );
    }

    #[test]
    fn error_display_timeout() {
        let err = AlertError::Timeout {
            operation: "channel email".to_string(),
            millis: 250,
        };
        assert_eq!(err.to_string(), "channel email timed out after 250ms");
    }

    #[test]
    fn error_display_scan_in_progress() {
        let err = AlertError::ScanInProgress {
            tenant: "t-1".to_string(),
        };
        assert_eq!(err.to_string(), "scan already in progress for tenant t-1");
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(AlertError::invalid_rule("x").is_validation());
        assert!(AlertError::invalid_condition("f", "x").is_validation());
        assert!(
            AlertError::ChannelNotRegistered {
                channel: "pager".to_string()
            }
            .is_validation()
        );
        assert!(
            !AlertError::Store {
                reason: "down".to_string()
            }
            .is_validation()
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}
