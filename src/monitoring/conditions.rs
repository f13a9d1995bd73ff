//! Condition interpreter
//!
//! Evaluates declarative conditions against named transaction fields. A missing
//! optional field never matches. An unknown field or a comparison between
//! incompatible types also never matches and is reported as a configuration
//! warning instead of an engine error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use tracing::warn;

use crate::monitoring::types::TransactionEvent;

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Contains,
    In,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Contains => "contains",
            Self::In => "in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a condition's comparison value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Number,
    String,
    StringList,
}

/// One clause of a monitoring pattern; all clauses of a pattern must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    pub value_type: ValueType,
}

impl PatternCondition {
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: Value,
        value_type: ValueType,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            value_type,
        }
    }

    /// Pattern conditions compare strings case-sensitively
    pub fn matches(&self, tx: &TransactionEvent, owner: &str) -> bool {
        evaluate(tx, &self.field, self.operator, &self.value, self.value_type, true, owner)
    }
}

/// One clause of a compliance rule; any violated clause violates the rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    pub value_type: ValueType,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl RuleCondition {
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: Value,
        value_type: ValueType,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            value_type,
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Returns the diagnostic message when the condition holds, `None` otherwise
    pub fn violation(&self, tx: &TransactionEvent, owner: &str) -> Option<String> {
        if !evaluate(
            tx,
            &self.field,
            self.operator,
            &self.value,
            self.value_type,
            self.case_sensitive,
            owner,
        ) {
            return None;
        }
        let actual = match resolve(tx, &self.field) {
            Resolved::Present(value) => value.to_string(),
            _ => String::from("-"),
        };
        Some(format!(
            "{} {} {} (actual: {})",
            self.field,
            self.operator,
            render(&self.value),
            actual
        ))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Field value read out of a transaction
#[derive(Debug)]
enum FieldValue<'a> {
    Number(Decimal),
    Text(Cow<'a, str>),
    List(Vec<&'a str>),
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

enum Resolved<'a> {
    Present(FieldValue<'a>),
    Missing,
    Unknown,
}

fn text(value: &str) -> Resolved<'_> {
    if value.is_empty() {
        Resolved::Missing
    } else {
        Resolved::Present(FieldValue::Text(Cow::Borrowed(value)))
    }
}

fn resolve<'a>(tx: &'a TransactionEvent, field: &str) -> Resolved<'a> {
    match field {
        "amount" => Resolved::Present(FieldValue::Number(tx.amount.amount)),
        "currency" => text(&tx.amount.currency),
        "from_account" => text(&tx.from_account),
        "to_account" => text(&tx.to_account),
        "from_country" => text(&tx.from_country),
        "to_country" => text(&tx.to_country),
        "any_country" => {
            let legs: Vec<&str> = [tx.from_country.as_str(), tx.to_country.as_str()]
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect();
            if legs.is_empty() {
                Resolved::Missing
            } else {
                Resolved::Present(FieldValue::List(legs))
            }
        }
        "transaction_type" => text(&tx.transaction_type),
        "channel" => text(&tx.channel),
        "purpose" => text(&tx.purpose),
        "customer_id" => text(&tx.customer_id),
        "customer_tier" => text(&tx.customer_tier),
        "institution_id" => text(&tx.institution_id),
        "account_age_days" => match tx.account_age_days {
            Some(days) => Resolved::Present(FieldValue::Number(Decimal::from(days))),
            None => Resolved::Missing,
        },
        other => match other.strip_prefix("metadata.") {
            Some(key) => match tx.metadata.get(key) {
                Some(value) => metadata_value(value),
                None => Resolved::Missing,
            },
            None => Resolved::Unknown,
        },
    }
}

fn metadata_value(value: &Value) -> Resolved<'_> {
    match value {
        Value::String(s) => text(s),
        Value::Number(n) => match n.to_string().parse::<Decimal>() {
            Ok(d) => Resolved::Present(FieldValue::Number(d)),
            Err(_) => Resolved::Missing,
        },
        Value::Bool(b) => Resolved::Present(FieldValue::Text(Cow::Owned(b.to_string()))),
        Value::Array(items) => {
            Resolved::Present(FieldValue::List(items.iter().filter_map(Value::as_str).collect()))
        }
        Value::Null | Value::Object(_) => Resolved::Missing,
    }
}

/// Comparison value decoded according to its declared type
enum Expected {
    Number(Decimal),
    Text(String),
    List(Vec<String>),
}

fn decode_expected(value: &Value, value_type: ValueType) -> Option<Expected> {
    match value_type {
        ValueType::Number => match value {
            Value::Number(n) => n.to_string().parse().ok().map(Expected::Number),
            Value::String(s) => s.trim().parse().ok().map(Expected::Number),
            _ => None,
        },
        ValueType::String => match value {
            Value::String(s) => Some(Expected::Text(s.clone())),
            Value::Number(n) => Some(Expected::Text(n.to_string())),
            _ => None,
        },
        ValueType::StringList => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Expected::List),
            _ => None,
        },
    }
}

fn text_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn text_contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// `None` when the operator cannot compare these types
fn compare(
    actual: &FieldValue<'_>,
    operator: Operator,
    expected: &Expected,
    cs: bool,
) -> Option<bool> {
    use FieldValue as F;
    let outcome = match (actual, operator, expected) {
        (F::Number(a), Operator::Eq, Expected::Number(b)) => a == b,
        (F::Number(a), Operator::Neq, Expected::Number(b)) => a != b,
        (F::Number(a), Operator::Gt, Expected::Number(b)) => a > b,
        (F::Number(a), Operator::Lt, Expected::Number(b)) => a < b,
        (F::Text(a), Operator::Eq, Expected::Text(b)) => text_eq(a, b, cs),
        (F::Text(a), Operator::Neq, Expected::Text(b)) => !text_eq(a, b, cs),
        (F::Text(a), Operator::Contains, Expected::Text(b)) => text_contains(a, b, cs),
        (F::Text(a), Operator::In, Expected::List(items)) => {
            items.iter().any(|item| text_eq(a, item, cs))
        }
        (F::List(xs), Operator::Eq | Operator::Contains, Expected::Text(b)) => {
            xs.iter().any(|x| text_eq(x, b, cs))
        }
        (F::List(xs), Operator::Neq, Expected::Text(b)) => !xs.iter().any(|x| text_eq(x, b, cs)),
        (F::List(xs), Operator::In, Expected::List(items)) => xs
            .iter()
            .any(|x| items.iter().any(|item| text_eq(x, item, cs))),
        _ => return None,
    };
    Some(outcome)
}

fn evaluate(
    tx: &TransactionEvent,
    field: &str,
    operator: Operator,
    value: &Value,
    value_type: ValueType,
    case_sensitive: bool,
    owner: &str,
) -> bool {
    let actual = match resolve(tx, field) {
        Resolved::Present(actual) => actual,
        Resolved::Missing => return false,
        Resolved::Unknown => {
            warn!(owner = %owner, field = %field, "Condition references unknown field");
            return false;
        }
    };
    let Some(expected) = decode_expected(value, value_type) else {
        warn!(
            owner = %owner,
            field = %field,
            value = %value,
            "Condition value does not match its declared type"
        );
        return false;
    };
    match compare(&actual, operator, &expected, case_sensitive) {
        Some(outcome) => outcome,
        None => {
            warn!(
                owner = %owner,
                field = %field,
                operator = %operator,
                "Condition operator cannot compare these types"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Money;
    use chrono::Utc;
    use serde_json::json;
    use test_case::test_case;

    fn tx() -> TransactionEvent {
        TransactionEvent::new("tx-1", "cust-1", Money::new(Decimal::from(15_000), "USD"), Utc::now())
            .with_countries("US", "KP")
            .with_channel("MOBILE")
            .with_metadata("device_score", json!(0.82))
            .with_metadata("tags", json!(["vip", "new"]))
    }

    #[test_case("amount", Operator::Gt, json!(10000), ValueType::Number => true ; "amount above")]
    #[test_case("amount", Operator::Lt, json!("10000"), ValueType::Number => false ; "numeric string value")]
    #[test_case("amount", Operator::Eq, json!(15000), ValueType::Number => true ; "amount equal")]
    #[test_case("to_country", Operator::In, json!(["KP", "IR"]), ValueType::StringList => true ; "country in list")]
    #[test_case("any_country", Operator::In, json!(["IR"]), ValueType::StringList => false ; "no leg listed")]
    #[test_case("any_country", Operator::Eq, json!("US"), ValueType::String => true ; "origin leg")]
    #[test_case("channel", Operator::Contains, json!("OBI"), ValueType::String => true ; "substring")]
    #[test_case("customer_id", Operator::Neq, json!(""), ValueType::String => true ; "non empty customer")]
    #[test_case("metadata.device_score", Operator::Gt, json!(0.5), ValueType::Number => true ; "numeric metadata")]
    #[test_case("metadata.tags", Operator::Contains, json!("vip"), ValueType::String => true ; "list metadata")]
    fn test_pattern_condition(field: &str, op: Operator, value: Value, vt: ValueType) -> bool {
        PatternCondition::new(field, op, value, vt).matches(&tx(), "TEST")
    }

    #[test]
    fn test_missing_optional_field_never_matches() {
        let cond = PatternCondition::new("purpose", Operator::Neq, json!("salary"), ValueType::String);
        assert!(!cond.matches(&tx(), "TEST"));

        let cond = PatternCondition::new("account_age_days", Operator::Lt, json!(30), ValueType::Number);
        assert!(!cond.matches(&tx(), "TEST"));
    }

    #[test]
    fn test_unknown_field_and_type_mismatch_fail_closed() {
        let unknown = PatternCondition::new("gas_price", Operator::Gt, json!(1), ValueType::Number);
        assert!(!unknown.matches(&tx(), "TEST"));

        let mismatch = PatternCondition::new("amount", Operator::Contains, json!("15"), ValueType::String);
        assert!(!mismatch.matches(&tx(), "TEST"));

        let bad_value = PatternCondition::new("amount", Operator::Gt, json!("lots"), ValueType::Number);
        assert!(!bad_value.matches(&tx(), "TEST"));
    }

    #[test]
    fn test_rule_condition_case_sensitivity() {
        let relaxed = RuleCondition::new("to_country", Operator::Eq, json!("kp"), ValueType::String);
        assert!(relaxed.violation(&tx(), "RULE").is_some());

        let strict = relaxed.clone().case_sensitive(true);
        assert!(strict.violation(&tx(), "RULE").is_none());
    }

    #[test]
    fn test_rule_violation_message() {
        let cond = RuleCondition::new("amount", Operator::Gt, json!(10000), ValueType::Number);
        let message = cond.violation(&tx(), "RULE").unwrap();
        assert_eq!(message, "amount gt 10000 (actual: 15000)");
    }
}
