//! Evaluation pipeline
//!
//! Runs pattern matching, compliance rules, velocity and geographic checks for
//! one transaction. Every check runs; their alerts are concatenated in that
//! order.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use crate::monitoring::activity::{ActivityTracker, VelocitySnapshot};
use crate::monitoring::alert::Alert;
use crate::monitoring::config::{AlertTtlConfig, GeographicConfig, MonitoringConfig, VelocityConfig};
use crate::monitoring::registry::{ComplianceAction, Registry};
use crate::monitoring::types::{AlertType, EntityType, Severity, TransactionEvent};

pub const DAILY_AMOUNT_LIMIT: &str = "DAILY_AMOUNT_LIMIT";
pub const DAILY_COUNT_LIMIT: &str = "DAILY_COUNT_LIMIT";
pub const HOURLY_VELOCITY: &str = "HOURLY_VELOCITY";
pub const HIGH_RISK_COUNTRY: &str = "HIGH_RISK_COUNTRY";
pub const UNUSUAL_GEOGRAPHIC_DIVERSITY: &str = "UNUSUAL_GEOGRAPHIC_DIVERSITY";

/// Actions mandated by one violated rule, bound to its alert
#[derive(Debug, Clone)]
pub struct MandatedActions {
    pub rule_id: String,
    pub alert_id: String,
    pub actions: Vec<ComplianceAction>,
}

/// Output of one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub alerts: Vec<Alert>,
    pub mandated: Vec<MandatedActions>,
}

pub struct EvaluationPipeline {
    registry: Arc<Registry>,
    tracker: Arc<ActivityTracker>,
    velocity: VelocityConfig,
    geographic: GeographicConfig,
    high_risk: HashSet<String>,
    ttl: AlertTtlConfig,
}

impl EvaluationPipeline {
    pub fn new(
        config: &MonitoringConfig,
        registry: Arc<Registry>,
        tracker: Arc<ActivityTracker>,
    ) -> Self {
        let high_risk = config
            .geographic
            .high_risk_countries
            .iter()
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self {
            registry,
            tracker,
            velocity: config.velocity.clone(),
            geographic: config.geographic.clone(),
            high_risk,
            ttl: config.alert_ttl.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    /// Evaluate one transaction, recording it in the activity tracker
    pub fn evaluate(&self, tx: &TransactionEvent) -> Evaluation {
        let mut evaluation = Evaluation {
            alerts: self.registry.match_patterns(tx, &self.tracker, &self.ttl),
            mandated: Vec::new(),
        };

        for violation in self.registry.violations(tx, &self.ttl) {
            if !violation.actions.is_empty() {
                evaluation.mandated.push(MandatedActions {
                    rule_id: violation.alert.rule_id.clone(),
                    alert_id: violation.alert.id.clone(),
                    actions: violation.actions,
                });
            }
            evaluation.alerts.push(violation.alert);
        }

        let country = if tx.to_country.is_empty() {
            tx.from_country.as_str()
        } else {
            tx.to_country.as_str()
        };
        let snapshot = self.tracker.record_and_query(
            &tx.customer_id,
            tx.amount.amount,
            tx.timestamp,
            Some(country),
        );
        evaluation.alerts.extend(self.velocity_alerts(tx, &snapshot));
        evaluation.alerts.extend(self.geographic_alerts(tx, &snapshot));
        evaluation
    }

    fn velocity_alert(&self, tx: &TransactionEvent, kind: &str, title: &str, description: String) -> Alert {
        Alert::new(
            format!("VELOCITY_{}_{}", kind, tx.id),
            AlertType::VelocityCheck,
            self.velocity.severity,
            tx.timestamp,
            self.ttl.velocity(),
        )
        .with_title(title)
        .with_description(description)
        .with_entity(EntityType::Customer, tx.customer_id.clone())
        .with_data("transaction_id", json!(tx.id))
        .with_data("customer_id", json!(tx.customer_id))
        .with_actions(["REVIEW_VELOCITY_PATTERN"])
        .with_rule_id(kind)
    }

    fn velocity_alerts(&self, tx: &TransactionEvent, snapshot: &VelocitySnapshot) -> Vec<Alert> {
        let v = &self.velocity;
        let mut alerts = Vec::new();

        if snapshot.daily_sum >= v.daily_amount_limit {
            alerts.push(
                self.velocity_alert(
                    tx,
                    DAILY_AMOUNT_LIMIT,
                    "Daily Amount Limit Exceeded",
                    format!(
                        "Customer daily volume {} reached the limit of {}",
                        snapshot.daily_sum, v.daily_amount_limit
                    ),
                )
                .with_data("daily_sum", json!(snapshot.daily_sum.to_string()))
                .with_data("limit", json!(v.daily_amount_limit.to_string())),
            );
        }
        if snapshot.daily_count > v.daily_count_limit {
            alerts.push(
                self.velocity_alert(
                    tx,
                    DAILY_COUNT_LIMIT,
                    "Daily Transaction Count Exceeded",
                    format!(
                        "Customer made {} transactions today, above the limit of {}",
                        snapshot.daily_count, v.daily_count_limit
                    ),
                )
                .with_data("daily_count", json!(snapshot.daily_count))
                .with_data("limit", json!(v.daily_count_limit)),
            );
        }
        if snapshot.hourly_count > v.hourly_count_limit {
            alerts.push(
                self.velocity_alert(
                    tx,
                    HOURLY_VELOCITY,
                    "High Transaction Velocity",
                    format!(
                        "Customer made {} transactions this hour, above the limit of {}",
                        snapshot.hourly_count, v.hourly_count_limit
                    ),
                )
                .with_data("hourly_count", json!(snapshot.hourly_count))
                .with_data("hourly_sum", json!(snapshot.hourly_sum.to_string()))
                .with_data("limit", json!(v.hourly_count_limit)),
            );
        }
        alerts
    }

    fn geographic_alerts(&self, tx: &TransactionEvent, snapshot: &VelocitySnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let flagged: Vec<String> = [&tx.from_country, &tx.to_country]
            .into_iter()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| self.high_risk.contains(c))
            .collect();
        if !flagged.is_empty() {
            alerts.push(
                Alert::new(
                    format!("GEO_{}_{}", HIGH_RISK_COUNTRY, tx.id),
                    AlertType::GeographicRisk,
                    Severity::High,
                    tx.timestamp,
                    self.ttl.geographic_risk(),
                )
                .with_title("High-Risk Country Transaction")
                .with_description(format!(
                    "Transaction involves high-risk country: {}",
                    flagged.join(", ")
                ))
                .with_entity(EntityType::Transaction, tx.id.clone())
                .with_data("transaction_id", json!(tx.id))
                .with_data("customer_id", json!(tx.customer_id))
                .with_data("from_country", json!(tx.from_country))
                .with_data("to_country", json!(tx.to_country))
                .with_data("amount", json!(tx.amount.amount.to_string()))
                .with_actions(["ENHANCED_DUE_DILIGENCE", "MANUAL_REVIEW"])
                .with_rule_id(HIGH_RISK_COUNTRY),
            );
        }

        let distinct = snapshot.recent_countries.len();
        if distinct > self.geographic.max_recent_countries {
            alerts.push(
                Alert::new(
                    format!("GEO_{}_{}", UNUSUAL_GEOGRAPHIC_DIVERSITY, tx.id),
                    AlertType::GeographicRisk,
                    Severity::Medium,
                    tx.timestamp,
                    self.ttl.geographic_pattern(),
                )
                .with_title("Unusual Geographic Diversity")
                .with_description(format!(
                    "Customer transacted with {} countries recently",
                    distinct
                ))
                .with_entity(EntityType::Customer, tx.customer_id.clone())
                .with_data("transaction_id", json!(tx.id))
                .with_data("customer_id", json!(tx.customer_id))
                .with_data("recent_countries", json!(snapshot.recent_countries))
                .with_actions(["REVIEW_CUSTOMER_PROFILE"])
                .with_rule_id(UNUSUAL_GEOGRAPHIC_DIVERSITY),
            );
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Money;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn pipeline(config: &MonitoringConfig) -> EvaluationPipeline {
        EvaluationPipeline::new(
            config,
            Arc::new(Registry::new(config.patterns.clone(), config.rules.clone())),
            Arc::new(ActivityTracker::new(config.activity.clone())),
        )
    }

    fn tx(id: &str, amount: i64, at: DateTime<Utc>) -> TransactionEvent {
        TransactionEvent::new(id, "cust-1", Money::new(Decimal::from(amount), "USD"), at)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_independent_sources_accumulate() {
        let p = pipeline(&MonitoringConfig::default());
        let t = tx("t1", 120_000, noon()).with_countries("US", "KP");
        let eval = p.evaluate(&t);

        let sources: Vec<&str> = eval.alerts.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                "HIGH_AMOUNT_PATTERN",
                "LARGE_TRANSACTION_REPORTING",
                "HIGH_RISK_COUNTRY_CHECK",
                DAILY_AMOUNT_LIMIT,
                HIGH_RISK_COUNTRY,
            ]
        );
        assert_eq!(eval.mandated.len(), 2);
    }

    #[test]
    fn test_daily_amount_limit_counts_current_transaction() {
        let config = MonitoringConfig {
            patterns: vec![],
            rules: vec![],
            ..MonitoringConfig::default()
        };
        let p = pipeline(&config);
        assert!(p.evaluate(&tx("t1", 60_000, noon())).alerts.is_empty());
        let eval = p.evaluate(&tx("t2", 40_000, noon() + Duration::minutes(5)));
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].rule_id, DAILY_AMOUNT_LIMIT);
        assert_eq!(eval.alerts[0].entity_type, EntityType::Customer);
    }

    #[test]
    fn test_hourly_velocity_fires_above_limit() {
        let config = MonitoringConfig {
            patterns: vec![],
            rules: vec![],
            ..MonitoringConfig::default()
        };
        let p = pipeline(&config);
        let mut last = Evaluation::default();
        for i in 0..11 {
            let eval = p.evaluate(&tx(&format!("t{}", i), 10, noon() + Duration::minutes(i)));
            if i < 10 {
                assert!(eval.alerts.is_empty(), "unexpected alert on tx {}", i);
            }
            last = eval;
        }
        assert_eq!(last.alerts.len(), 1);
        assert_eq!(last.alerts[0].rule_id, HOURLY_VELOCITY);
    }

    #[test]
    fn test_unusual_geographic_diversity() {
        let config = MonitoringConfig {
            patterns: vec![],
            rules: vec![],
            ..MonitoringConfig::default()
        };
        let p = pipeline(&config);
        let countries = ["US", "GB", "FR", "DE", "ES", "IT"];
        let mut diversity = 0;
        for (i, country) in countries.iter().enumerate() {
            let t = tx(&format!("t{}", i), 10, noon() + Duration::hours(i as i64))
                .with_countries("US", *country);
            diversity += p
                .evaluate(&t)
                .alerts
                .iter()
                .filter(|a| a.rule_id == UNUSUAL_GEOGRAPHIC_DIVERSITY)
                .count();
        }
        assert_eq!(diversity, 1);
    }

    #[test]
    fn test_missing_countries_do_not_raise_geo_alerts() {
        let config = MonitoringConfig {
            patterns: vec![],
            rules: vec![],
            ..MonitoringConfig::default()
        };
        let p = pipeline(&config);
        assert!(p.evaluate(&tx("t1", 10, noon())).alerts.is_empty());
    }
}
