//! Built-in pattern and rule set loaded when the configuration names none

use serde_json::json;
use std::collections::BTreeMap;

use crate::monitoring::conditions::{Operator, PatternCondition, RuleCondition, ValueType};
use crate::monitoring::registry::{
    ComplianceAction, ComplianceRule, MonitoringPattern, PatternThreshold,
};
use crate::monitoring::types::{ActionType, ComplianceType, PatternCategory, Severity};

pub fn default_patterns() -> Vec<MonitoringPattern> {
    vec![
        MonitoringPattern {
            id: "HIGH_AMOUNT_PATTERN".to_string(),
            name: "High Amount Transaction".to_string(),
            description: "Single transaction above the high-amount threshold".to_string(),
            category: PatternCategory::Amount,
            time_window_secs: 0,
            severity: Severity::High,
            actions: vec!["MANUAL_REVIEW".to_string(), "ENHANCED_DUE_DILIGENCE".to_string()],
            is_active: true,
            last_triggered: None,
            threshold: PatternThreshold::default(),
            conditions: vec![PatternCondition::new(
                "amount",
                Operator::Gt,
                json!(50_000),
                ValueType::Number,
            )],
        },
        MonitoringPattern {
            id: "RAPID_SUCCESSION_PATTERN".to_string(),
            name: "Rapid Succession Transactions".to_string(),
            description: "Many transactions from one customer within an hour".to_string(),
            category: PatternCategory::Frequency,
            time_window_secs: 3_600,
            severity: Severity::Medium,
            actions: vec!["VELOCITY_CHECK".to_string()],
            is_active: true,
            last_triggered: None,
            threshold: PatternThreshold {
                count: 10,
                time_span_secs: 3_600,
                ..PatternThreshold::default()
            },
            conditions: vec![PatternCondition::new(
                "customer_id",
                Operator::Neq,
                json!(""),
                ValueType::String,
            )],
        },
    ]
}

pub fn default_rules() -> Vec<ComplianceRule> {
    vec![
        ComplianceRule {
            id: "LARGE_TRANSACTION_REPORTING".to_string(),
            name: "Large Transaction Reporting".to_string(),
            description: "Transactions above the reporting threshold must be reported".to_string(),
            rule_type: ComplianceType::LargeTransaction,
            severity: Severity::Medium,
            is_active: true,
            metadata: BTreeMap::new(),
            conditions: vec![RuleCondition::new(
                "amount",
                Operator::Gt,
                json!(10_000),
                ValueType::Number,
            )],
            actions: vec![ComplianceAction::new(ActionType::ReportSar, true)],
        },
        ComplianceRule {
            id: "HIGH_RISK_COUNTRY_CHECK".to_string(),
            name: "High Risk Country Check".to_string(),
            description: "Transaction touches a high-risk jurisdiction".to_string(),
            rule_type: ComplianceType::CountryRisk,
            severity: Severity::High,
            is_active: true,
            metadata: BTreeMap::new(),
            conditions: vec![RuleCondition::new(
                "any_country",
                Operator::In,
                json!(["AF", "KP", "IR", "SY"]),
                ValueType::StringList,
            )],
            actions: vec![
                ComplianceAction::new(ActionType::ManualReview, true),
                ComplianceAction::new(ActionType::RequireAdditionalKyc, false),
            ],
        },
    ]
}
