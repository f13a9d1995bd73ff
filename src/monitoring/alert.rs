//! Alert record and lifecycle state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::monitoring::errors::{MonitoringError, Result};
use crate::monitoring::types::{AlertStatus, AlertType, EntityType, Severity};

/// An alert produced by one evaluation pass
///
/// Severity is fixed at creation; only `status` changes afterwards, and only
/// through the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    /// Structured payload (transaction id, amount, triggering values)
    pub data: BTreeMap<String, serde_json::Value>,
    pub status: AlertStatus,
    pub actions: Vec<String>,
    /// Originating pattern or rule id, empty for built-in checks
    pub rule_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        id: impl Into<String>,
        alert_type: AlertType,
        severity: Severity,
        timestamp: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            alert_type,
            severity,
            title: String::new(),
            description: String::new(),
            entity_type: EntityType::Transaction,
            entity_id: String::new(),
            timestamp,
            data: BTreeMap::new(),
            status: AlertStatus::Active,
            actions: Vec::new(),
            rule_id: String::new(),
            metadata: BTreeMap::new(),
            expires_at: timestamp
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_entity(mut self, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        self.entity_type = entity_type;
        self.entity_id = entity_id.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = rule_id.into();
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// ACTIVE and not yet past its expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == AlertStatus::Active && !self.is_expired(now)
    }

    /// Move the alert to `next`, rejecting anything the state machine forbids
    pub fn transition(&mut self, next: AlertStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MonitoringError::InvalidTransition {
                alert_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert::new(
            "PATTERN_P1_tx-1",
            AlertType::PatternMatch,
            Severity::High,
            Utc::now(),
            Duration::hours(24),
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let mut a = alert();
        a.transition(AlertStatus::Acknowledged).unwrap();
        a.transition(AlertStatus::Investigating).unwrap();
        a.transition(AlertStatus::Resolved).unwrap();
        assert_eq!(a.status, AlertStatus::Resolved);
    }

    #[test]
    fn test_terminal_alert_is_frozen() {
        let mut a = alert();
        a.transition(AlertStatus::Acknowledged).unwrap();
        a.transition(AlertStatus::Investigating).unwrap();
        a.transition(AlertStatus::FalsePositive).unwrap();

        let err = a.transition(AlertStatus::Resolved).unwrap_err();
        assert!(matches!(err, MonitoringError::InvalidTransition { .. }));
        assert_eq!(a.status, AlertStatus::FalsePositive);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut a = alert();
        assert!(a.transition(AlertStatus::Investigating).is_err());
        assert_eq!(a.status, AlertStatus::Active);
    }

    #[test]
    fn test_expiry_saturates_at_the_end_of_time() {
        let a = Alert::new(
            "late",
            AlertType::PatternMatch,
            Severity::High,
            DateTime::<Utc>::MAX_UTC - Duration::hours(1),
            Duration::hours(24),
        );
        assert_eq!(a.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_expiry() {
        let a = alert();
        assert!(a.is_live(a.timestamp));
        assert!(a.is_expired(a.timestamp + Duration::hours(24)));
        assert!(!a.is_live(a.timestamp + Duration::hours(25)));
    }
}
