//! Core data model: transaction events and the enums shared by every component

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::monitoring::errors::{MonitoringError, Result};

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl Severity {
    /// Largest weight any single alert can contribute
    pub const MAX_WEIGHT: f64 = 25.0;

    /// Contribution of one alert of this severity to the raw risk score
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 3.0,
            Self::High => 7.0,
            Self::Critical => 15.0,
            Self::Emergency => 25.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    PatternMatch,
    ThresholdBreach,
    ComplianceViolation,
    FraudDetection,
    SystemAnomaly,
    SanctionsHit,
    VelocityCheck,
    GeographicRisk,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PatternMatch => "PATTERN_MATCH",
            Self::ThresholdBreach => "THRESHOLD_BREACH",
            Self::ComplianceViolation => "COMPLIANCE_VIOLATION",
            Self::FraudDetection => "FRAUD_DETECTION",
            Self::SystemAnomaly => "SYSTEM_ANOMALY",
            Self::SanctionsHit => "SANCTIONS_HIT",
            Self::VelocityCheck => "VELOCITY_CHECK",
            Self::GeographicRisk => "GEOGRAPHIC_RISK",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Investigating,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Investigating => "INVESTIGATING",
            Self::Resolved => "RESOLVED",
            Self::FalsePositive => "FALSE_POSITIVE",
        }
    }

    /// RESOLVED and FALSE_POSITIVE alerts are frozen
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }

    /// Transition table of the alert state machine
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Acknowledged)
                | (Self::Acknowledged, Self::Investigating)
                | (Self::Investigating, Self::Resolved)
                | (Self::Investigating, Self::FalsePositive)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Transaction,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternCategory {
    Velocity,
    Amount,
    Frequency,
    Geographic,
    Behavioral,
    Network,
}

impl PatternCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Velocity => "VELOCITY",
            Self::Amount => "AMOUNT",
            Self::Frequency => "FREQUENCY",
            Self::Geographic => "GEOGRAPHIC",
            Self::Behavioral => "BEHAVIORAL",
            Self::Network => "NETWORK",
        }
    }
}

/// Regulatory category of a compliance rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceType {
    Aml,
    Kyc,
    Sanctions,
    Pep,
    LargeTransaction,
    Structuring,
    CountryRisk,
}

impl ComplianceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aml => "AML",
            Self::Kyc => "KYC",
            Self::Sanctions => "SANCTIONS",
            Self::Pep => "PEP",
            Self::LargeTransaction => "LARGE_TRANSACTION",
            Self::Structuring => "STRUCTURING",
            Self::CountryRisk => "COUNTRY_RISK",
        }
    }
}

/// Follow-up mandated by a compliance rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Alert,
    BlockTransaction,
    FreezeAccount,
    Escalate,
    ReportSar,
    RequireAdditionalKyc,
    ManualReview,
}

impl ActionType {
    /// Tag used in alert and result action lists
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "ALERT",
            Self::BlockTransaction => "BLOCK_TRANSACTION",
            Self::FreezeAccount => "FREEZE_ACCOUNT",
            Self::Escalate => "ESCALATE",
            Self::ReportSar => "REPORT_SAR",
            Self::RequireAdditionalKyc => "REQUIRE_ADDITIONAL_KYC",
            Self::ManualReview => "MANUAL_REVIEW",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final categorical outcome for a transaction, ordered by strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Approved,
    Monitored,
    Flagged,
    ManualReviewRequired,
    Blocked,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Monitored => "MONITORED",
            Self::Flagged => "FLAGGED",
            Self::ManualReviewRequired => "MANUAL_REVIEW_REQUIRED",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount with its currency code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Inbound transaction event. Created by the caller, read-only to the engine.
///
/// Optional descriptive fields default to empty; an empty field is treated as
/// missing by the condition interpreter and never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: String,
    pub amount: Money,
    #[serde(default)]
    pub from_account: String,
    #[serde(default)]
    pub to_account: String,
    #[serde(default)]
    pub from_country: String,
    #[serde(default)]
    pub to_country: String,
    #[serde(default)]
    pub transaction_type: String,
    pub timestamp: DateTime<Utc>,
    /// Originating institution
    #[serde(default)]
    pub institution_id: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub purpose: String,
    pub customer_id: String,
    /// Customer account age in days
    #[serde(default)]
    pub account_age_days: Option<u64>,
    #[serde(default)]
    pub customer_tier: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TransactionEvent {
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: Money,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            from_account: String::new(),
            to_account: String::new(),
            from_country: String::new(),
            to_country: String::new(),
            transaction_type: String::new(),
            timestamp,
            institution_id: String::new(),
            channel: String::new(),
            purpose: String::new(),
            customer_id: customer_id.into(),
            account_age_days: None,
            customer_tier: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_countries(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_country = from.into();
        self.to_country = to.into();
        self
    }

    pub fn with_accounts(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_account = from.into();
        self.to_account = to.into();
        self
    }

    pub fn with_transaction_type(mut self, transaction_type: impl Into<String>) -> Self {
        self.transaction_type = transaction_type.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_customer_tier(mut self, tier: impl Into<String>) -> Self {
        self.customer_tier = tier.into();
        self
    }

    pub fn with_account_age_days(mut self, days: u64) -> Self {
        self.account_age_days = Some(days);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Reject structurally invalid events before any evaluation happens
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MonitoringError::validation("id", "must not be empty"));
        }
        if self.customer_id.trim().is_empty() {
            return Err(MonitoringError::validation("customer_id", "must not be empty"));
        }
        if self.amount.currency.trim().is_empty() {
            return Err(MonitoringError::validation("amount.currency", "must not be empty"));
        }
        if self.amount.amount.is_sign_negative() && !self.amount.amount.is_zero() {
            return Err(MonitoringError::validation("amount", "must not be negative"));
        }
        // RFC 3339 years; window and expiry arithmetic stays in range
        if !(1..=9999).contains(&self.timestamp.year()) {
            return Err(MonitoringError::validation(
                "timestamp",
                "must fall between years 0001 and 9999",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransactionEvent {
        TransactionEvent::new("tx-1", "cust-1", Money::new(Decimal::from(100), "USD"), Utc::now())
    }

    #[test]
    fn test_severity_ordering_and_weights() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Critical < Severity::Emergency);
        assert_eq!(Severity::High.weight(), 7.0);
        assert_eq!(Severity::Emergency.weight(), Severity::MAX_WEIGHT);
    }

    #[test]
    fn test_alert_status_transitions() {
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Acknowledged));
        assert!(AlertStatus::Investigating.can_transition_to(AlertStatus::FalsePositive));
        assert!(!AlertStatus::Active.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Active));
        assert!(AlertStatus::FalsePositive.is_terminal());
    }

    #[test]
    fn test_validate_rejects_structural_errors() {
        assert!(sample().validate().is_ok());

        let mut tx = sample();
        tx.id = "  ".to_string();
        assert!(matches!(tx.validate(), Err(MonitoringError::Validation { .. })));

        let mut tx = sample();
        tx.amount.amount = Decimal::from(-5);
        assert!(tx.validate().is_err());

        let mut tx = sample();
        tx.amount.currency.clear();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_timestamps() {
        let json = r#"{
            "id": "tx-far",
            "amount": {"amount": "60000", "currency": "USD"},
            "timestamp": "+262142-12-31T00:00:00Z",
            "customer_id": "c-far"
        }"#;
        let tx: TransactionEvent = serde_json::from_str(json).unwrap();
        let err = tx.validate().unwrap_err();
        assert!(matches!(err, MonitoringError::Validation { ref field, .. } if field == "timestamp"));

        let mut tx = sample();
        tx.timestamp = DateTime::<Utc>::MIN_UTC;
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_transaction_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "id": "tx-9",
            "amount": {"amount": "250.00", "currency": "EUR"},
            "timestamp": "2026-03-01T10:00:00Z",
            "customer_id": "c-9"
        }"#;
        let tx: TransactionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(tx.amount.amount, Decimal::new(25000, 2));
        assert!(tx.to_country.is_empty());
        assert!(tx.account_age_days.is_none());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&Disposition::ManualReviewRequired).unwrap(),
            "\"MANUAL_REVIEW_REQUIRED\""
        );
        assert_eq!(ActionType::ReportSar.as_str(), "REPORT_SAR");
    }
}
