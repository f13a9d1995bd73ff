//! Pattern & rule registry
//!
//! Holds the active monitoring patterns and compliance rules. Evaluations take
//! an `Arc` snapshot under a short read lock and release it immediately; admin
//! mutations copy-on-write the list under the write lock.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::monitoring::activity::ActivityTracker;
use crate::monitoring::alert::Alert;
use crate::monitoring::conditions::{PatternCondition, RuleCondition};
use crate::monitoring::config::AlertTtlConfig;
use crate::monitoring::errors::{MonitoringError, Result};
use crate::monitoring::types::{
    ActionType, AlertType, ComplianceType, EntityType, PatternCategory, Severity, TransactionEvent,
};

fn default_true() -> bool {
    true
}

/// Firing threshold of a windowed pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThreshold {
    /// In-window hit count that fires the pattern
    pub count: u64,
    /// In-window matched amount that fires the pattern
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// Window override used when the pattern declares no time window
    pub time_span_secs: u64,
    /// Hits per hour that fire the pattern
    pub frequency: f64,
}

/// Declarative detector for a recurring transactional shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPattern {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: PatternCategory,
    /// Zero for stateless patterns
    #[serde(default)]
    pub time_window_secs: u64,
    pub severity: Severity,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub threshold: PatternThreshold,
    pub conditions: Vec<PatternCondition>,
}

impl MonitoringPattern {
    /// Effective counting window, `None` for stateless patterns
    pub fn window(&self) -> Option<Duration> {
        let secs = if self.time_window_secs > 0 {
            self.time_window_secs
        } else {
            self.threshold.time_span_secs
        };
        (secs > 0).then(|| Duration::seconds(secs.min(i64::MAX as u64 / 1_000) as i64))
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MonitoringError::Configuration("pattern id must not be empty".into()));
        }
        if self.conditions.is_empty() {
            return Err(MonitoringError::Configuration(format!(
                "pattern {} has no conditions",
                self.id
            )));
        }
        if self.window().is_some() {
            let t = &self.threshold;
            let has_amount = t.amount.is_some_and(|a| a > Decimal::ZERO);
            if t.count == 0 && !has_amount && t.frequency <= 0.0 {
                return Err(MonitoringError::Configuration(format!(
                    "windowed pattern {} needs a count, amount or frequency threshold",
                    self.id
                )));
            }
        }
        Ok(())
    }

    fn threshold_reached(&self, count: u64, amount: Decimal, window: Duration) -> bool {
        let t = &self.threshold;
        if t.count > 0 && count >= t.count {
            return true;
        }
        if let Some(limit) = t.amount.filter(|a| *a > Decimal::ZERO) {
            if amount >= limit {
                return true;
            }
        }
        if t.frequency > 0.0 {
            let hours = window.num_seconds() as f64 / 3_600.0;
            if hours > 0.0 && count as f64 / hours >= t.frequency {
                return true;
            }
        }
        false
    }
}

/// Follow-up mandated by a violated compliance rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAction {
    pub action_type: ActionType,
    /// Seconds to wait before executing
    #[serde(default)]
    pub delay_secs: u64,
    /// Manual actions become approval escalations instead of executing
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ComplianceAction {
    pub fn new(action_type: ActionType, auto_execute: bool) -> Self {
        Self {
            action_type,
            delay_secs: 0,
            auto_execute,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_delay_secs(mut self, delay_secs: u64) -> Self {
        self.delay_secs = delay_secs;
        self
    }
}

/// Declarative detector tied to a regulatory category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule_type: ComplianceType,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<ComplianceAction>,
}

impl ComplianceRule {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MonitoringError::Configuration("rule id must not be empty".into()));
        }
        if self.conditions.is_empty() {
            return Err(MonitoringError::Configuration(format!(
                "rule {} has no conditions",
                self.id
            )));
        }
        Ok(())
    }

    pub fn action_tags(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|a| a.action_type.as_str().to_string())
            .collect()
    }
}

/// A rule violation: the alert to raise and the actions the rule mandates
#[derive(Debug, Clone)]
pub struct RuleViolation {
    pub alert: Alert,
    pub actions: Vec<ComplianceAction>,
}

/// Reader-writer guarded pattern and rule sets
pub struct Registry {
    patterns: RwLock<Arc<Vec<MonitoringPattern>>>,
    rules: RwLock<Arc<Vec<ComplianceRule>>>,
    last_triggered: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Registry {
    pub fn new(patterns: Vec<MonitoringPattern>, rules: Vec<ComplianceRule>) -> Self {
        Self {
            patterns: RwLock::new(Arc::new(patterns)),
            rules: RwLock::new(Arc::new(rules)),
            last_triggered: Mutex::new(HashMap::new()),
        }
    }

    /// Current pattern set
    pub fn patterns(&self) -> Arc<Vec<MonitoringPattern>> {
        self.patterns.read().clone()
    }

    /// Current rule set
    pub fn rules(&self) -> Arc<Vec<ComplianceRule>> {
        self.rules.read().clone()
    }

    /// Pattern by id, with its last trigger time filled in
    pub fn pattern(&self, id: &str) -> Option<MonitoringPattern> {
        let mut pattern = self.patterns().iter().find(|p| p.id == id).cloned()?;
        if let Some(at) = self.last_triggered.lock().get(id) {
            pattern.last_triggered = Some(*at);
        }
        Some(pattern)
    }

    pub fn rule(&self, id: &str) -> Option<ComplianceRule> {
        self.rules().iter().find(|r| r.id == id).cloned()
    }

    /// Add or replace a pattern; returns true when an existing one was replaced
    pub fn upsert_pattern(&self, pattern: MonitoringPattern) -> Result<bool> {
        pattern.validate()?;
        let mut guard = self.patterns.write();
        let patterns = Arc::make_mut(&mut guard);
        let replaced = match patterns.iter_mut().find(|p| p.id == pattern.id) {
            Some(existing) => {
                *existing = pattern;
                true
            }
            None => {
                patterns.push(pattern);
                false
            }
        };
        Ok(replaced)
    }

    pub fn deactivate_pattern(&self, id: &str) -> Result<()> {
        let mut guard = self.patterns.write();
        let patterns = Arc::make_mut(&mut guard);
        let pattern = patterns
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| MonitoringError::PatternNotFound(id.to_string()))?;
        pattern.is_active = false;
        info!(pattern_id = %id, "Pattern deactivated");
        Ok(())
    }

    pub fn remove_pattern(&self, id: &str) -> Result<MonitoringPattern> {
        let mut guard = self.patterns.write();
        let patterns = Arc::make_mut(&mut guard);
        let index = patterns
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| MonitoringError::PatternNotFound(id.to_string()))?;
        self.last_triggered.lock().remove(id);
        Ok(patterns.remove(index))
    }

    pub fn upsert_rule(&self, rule: ComplianceRule) -> Result<bool> {
        rule.validate()?;
        let mut guard = self.rules.write();
        let rules = Arc::make_mut(&mut guard);
        let replaced = match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                *existing = rule;
                true
            }
            None => {
                rules.push(rule);
                false
            }
        };
        Ok(replaced)
    }

    pub fn deactivate_rule(&self, id: &str) -> Result<()> {
        let mut guard = self.rules.write();
        let rules = Arc::make_mut(&mut guard);
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MonitoringError::RuleNotFound(id.to_string()))?;
        rule.is_active = false;
        info!(rule_id = %id, "Compliance rule deactivated");
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> Result<ComplianceRule> {
        let mut guard = self.rules.write();
        let rules = Arc::make_mut(&mut guard);
        let index = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| MonitoringError::RuleNotFound(id.to_string()))?;
        Ok(rules.remove(index))
    }

    /// Alerts for every active pattern whose conditions all hold
    ///
    /// Windowed patterns record the hit in the tracker and only fire once the
    /// in-window totals reach the pattern threshold.
    pub fn match_patterns(
        &self,
        tx: &TransactionEvent,
        tracker: &ActivityTracker,
        ttl: &AlertTtlConfig,
    ) -> Vec<Alert> {
        let patterns = self.patterns();
        let mut alerts = Vec::new();

        for pattern in patterns.iter().filter(|p| p.is_active) {
            if !pattern.conditions.iter().all(|c| c.matches(tx, &pattern.id)) {
                continue;
            }

            let mut window_count = None;
            if let Some(window) = pattern.window() {
                let hits = tracker.record_pattern_hit(
                    &tx.customer_id,
                    &pattern.id,
                    tx.timestamp,
                    tx.amount.amount,
                    window,
                );
                if !pattern.threshold_reached(hits.count, hits.amount, window) {
                    continue;
                }
                window_count = Some(hits.count);
            }

            debug!(pattern_id = %pattern.id, transaction_id = %tx.id, "Pattern matched");
            self.last_triggered
                .lock()
                .insert(pattern.id.clone(), tx.timestamp);
            alerts.push(pattern_alert(pattern, tx, ttl, window_count));
        }
        alerts
    }

    /// One violation per active rule with at least one holding condition
    pub fn violations(&self, tx: &TransactionEvent, ttl: &AlertTtlConfig) -> Vec<RuleViolation> {
        let rules = self.rules();
        rules
            .iter()
            .filter(|r| r.is_active)
            .filter_map(|rule| {
                let messages: Vec<String> = rule
                    .conditions
                    .iter()
                    .filter_map(|c| c.violation(tx, &rule.id))
                    .collect();
                if messages.is_empty() {
                    return None;
                }
                debug!(rule_id = %rule.id, transaction_id = %tx.id, "Compliance rule violated");
                Some(RuleViolation {
                    alert: compliance_alert(rule, tx, ttl, &messages),
                    actions: rule.actions.clone(),
                })
            })
            .collect()
    }
}

fn pattern_alert(
    pattern: &MonitoringPattern,
    tx: &TransactionEvent,
    ttl: &AlertTtlConfig,
    window_count: Option<u64>,
) -> Alert {
    let expiry = if pattern.category == PatternCategory::Geographic {
        ttl.geographic_pattern()
    } else {
        ttl.pattern()
    };
    let mut alert = Alert::new(
        format!("PATTERN_{}_{}", pattern.id, tx.id),
        AlertType::PatternMatch,
        pattern.severity,
        tx.timestamp,
        expiry,
    )
    .with_title(format!("Pattern Match: {}", pattern.name))
    .with_description(format!(
        "Transaction matches monitoring pattern: {}",
        pattern.description
    ))
    .with_entity(EntityType::Transaction, tx.id.clone())
    .with_data("pattern_id", json!(pattern.id))
    .with_data("category", json!(pattern.category.as_str()))
    .with_data("transaction_id", json!(tx.id))
    .with_data("amount", json!(tx.amount.amount.to_string()))
    .with_data("currency", json!(tx.amount.currency))
    .with_data("customer_id", json!(tx.customer_id))
    .with_actions(pattern.actions.iter().cloned())
    .with_rule_id(pattern.id.clone())
    .with_metadata("category", pattern.category.as_str());
    if let Some(count) = window_count {
        alert = alert.with_data("window_count", json!(count));
    }
    alert
}

fn compliance_alert(
    rule: &ComplianceRule,
    tx: &TransactionEvent,
    ttl: &AlertTtlConfig,
    messages: &[String],
) -> Alert {
    Alert::new(
        format!("COMPLIANCE_{}_{}", rule.id, tx.id),
        AlertType::ComplianceViolation,
        rule.severity,
        tx.timestamp,
        ttl.compliance(),
    )
    .with_title(format!("Compliance Violation: {}", rule.name))
    .with_description(format!(
        "Transaction violates compliance rule: {}. Details: {}",
        rule.description,
        messages.join("; ")
    ))
    .with_entity(EntityType::Transaction, tx.id.clone())
    .with_data("rule_id", json!(rule.id))
    .with_data("rule_type", json!(rule.rule_type.as_str()))
    .with_data("transaction_id", json!(tx.id))
    .with_data("amount", json!(tx.amount.amount.to_string()))
    .with_data("customer_id", json!(tx.customer_id))
    .with_data("violations", json!(messages))
    .with_actions(rule.action_tags())
    .with_rule_id(rule.id.clone())
    .with_metadata("rule_type", rule.rule_type.as_str())
}
