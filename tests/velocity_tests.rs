//! Velocity windowing across calendar-day and hour boundaries

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use test_case::test_case;
use txn_risk_monitor::monitoring::activity::ActivityTracker;
use txn_risk_monitor::monitoring::pipeline::{
    EvaluationPipeline, DAILY_COUNT_LIMIT, HOURLY_VELOCITY,
};
use txn_risk_monitor::monitoring::registry::Registry;
use txn_risk_monitor::monitoring::{Money, MonitoringConfig, TransactionEvent};

fn pipeline(config: &MonitoringConfig) -> (EvaluationPipeline, Arc<ActivityTracker>) {
    let registry = Arc::new(Registry::new(config.patterns.clone(), config.rules.clone()));
    let tracker = Arc::new(ActivityTracker::new(config.activity.clone()));
    (
        EvaluationPipeline::new(config, registry, Arc::clone(&tracker)),
        tracker,
    )
}

fn tx(i: usize, when: DateTime<Utc>) -> TransactionEvent {
    TransactionEvent::new(
        format!("T-{}", i),
        "CUST-V",
        Money::new(Decimal::from(100), "USD"),
        when,
    )
    .with_countries("US", "GB")
}

fn count_kind(alerts: &[txn_risk_monitor::Alert], kind: &str) -> usize {
    alerts.iter().filter(|a| a.rule_id == kind).count()
}

#[test]
fn daily_count_limit_fires_once_on_fifty_first_and_resets_next_day() {
    let config = MonitoringConfig::default();
    let (pipeline, tracker) = pipeline(&config);
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 5, 0).unwrap();

    let mut fired_at = Vec::new();
    for i in 0..51 {
        // 20 minutes apart keeps the hourly and rapid-succession checks quiet
        let evaluation = pipeline.evaluate(&tx(i, start + Duration::minutes(20 * i as i64)));
        assert_eq!(count_kind(&evaluation.alerts, HOURLY_VELOCITY), 0);
        if count_kind(&evaluation.alerts, DAILY_COUNT_LIMIT) > 0 {
            fired_at.push(i + 1);
        }
    }
    assert_eq!(fired_at, vec![51]);

    let next_day = Utc.with_ymd_and_hms(2026, 3, 3, 0, 1, 0).unwrap();
    let evaluation = pipeline.evaluate(&tx(100, next_day));
    assert_eq!(count_kind(&evaluation.alerts, DAILY_COUNT_LIMIT), 0);
    let snapshot = tracker.query("CUST-V", next_day).unwrap();
    assert_eq!(snapshot.daily_count, 1);
    assert_eq!(snapshot.daily_sum, Decimal::from(100));
}

#[test_case(10, 0 ; "at the limit")]
#[test_case(11, 1 ; "one above the limit")]
#[test_case(13, 3 ; "every transaction above the limit")]
fn hourly_velocity_counts_current_transaction(transactions: usize, expected_alerts: usize) {
    let config = MonitoringConfig {
        patterns: vec![],
        ..MonitoringConfig::default()
    };
    let (pipeline, _) = pipeline(&config);
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();

    let fired: usize = (0..transactions)
        .map(|i| pipeline.evaluate(&tx(i, start + Duration::minutes(i as i64 * 4))))
        .map(|e| count_kind(&e.alerts, HOURLY_VELOCITY))
        .sum();
    assert_eq!(fired, expected_alerts);
}

#[test]
fn late_event_counts_toward_current_day() {
    let config = MonitoringConfig::default();
    let (pipeline, tracker) = pipeline(&config);
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();

    pipeline.evaluate(&tx(1, now));
    pipeline.evaluate(&tx(2, now - Duration::days(1)));

    assert_eq!(tracker.query("CUST-V", now).unwrap().daily_count, 2);
}
