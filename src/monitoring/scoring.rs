//! Risk scorer & disposition engine
//!
//! The score measures how severe a set of alerts is relative to the worst case
//! for that many alerts, so a lone HIGH alert scores 28, not 7.

use std::collections::BTreeSet;

use crate::monitoring::alert::Alert;
use crate::monitoring::types::{ActionType, Disposition, Severity};

pub const BLOCK_THRESHOLD: f64 = 80.0;
pub const MANUAL_REVIEW_THRESHOLD: f64 = 60.0;
pub const FLAG_THRESHOLD: f64 = 30.0;

/// Score, disposition and deduplicated actions for one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub score: f64,
    pub disposition: Disposition,
    pub actions: Vec<String>,
}

/// Normalized 0-100 score over a set of severities
pub fn score_severities<I>(severities: I) -> f64
where
    I: IntoIterator<Item = Severity>,
{
    let (raw, count) = severities
        .into_iter()
        .fold((0.0, 0usize), |(raw, count), s| (raw + s.weight(), count + 1));
    if count == 0 {
        return 0.0;
    }
    let max_possible = count as f64 * Severity::MAX_WEIGHT;
    (raw * 100.0 / max_possible).min(100.0)
}

pub fn risk_score(alerts: &[Alert]) -> f64 {
    score_severities(alerts.iter().map(|a| a.severity))
}

/// Highest matching band wins
pub fn disposition(score: f64, has_alerts: bool) -> Disposition {
    if score >= BLOCK_THRESHOLD {
        Disposition::Blocked
    } else if score >= MANUAL_REVIEW_THRESHOLD {
        Disposition::ManualReviewRequired
    } else if score >= FLAG_THRESHOLD {
        Disposition::Flagged
    } else if has_alerts {
        Disposition::Monitored
    } else {
        Disposition::Approved
    }
}

/// Sorted union of every alert's action tags, plus BLOCK_TRANSACTION at block level
pub fn recommended_actions(alerts: &[Alert], score: f64) -> Vec<String> {
    let mut actions: BTreeSet<String> = alerts
        .iter()
        .flat_map(|a| a.actions.iter().cloned())
        .collect();
    if score >= BLOCK_THRESHOLD {
        actions.insert(ActionType::BlockTransaction.as_str().to_string());
    }
    actions.into_iter().collect()
}

pub fn assess(alerts: &[Alert]) -> RiskAssessment {
    let score = risk_score(alerts);
    RiskAssessment {
        score,
        disposition: disposition(score, !alerts.is_empty()),
        actions: recommended_actions(alerts, score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::AlertType;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use test_case::test_case;

    fn alert(severity: Severity, actions: &[&str]) -> Alert {
        Alert::new("A", AlertType::PatternMatch, severity, Utc::now(), Duration::hours(1))
            .with_actions(actions.iter().copied())
    }

    #[test]
    fn test_single_high_alert_scores_28() {
        assert_eq!(score_severities([Severity::High]), 28.0);
        assert_eq!(score_severities([]), 0.0);
        assert_eq!(score_severities([Severity::Emergency, Severity::Emergency]), 100.0);
    }

    #[test_case(80.0 => Disposition::Blocked ; "block edge")]
    #[test_case(79.9 => Disposition::ManualReviewRequired ; "below block")]
    #[test_case(60.0 => Disposition::ManualReviewRequired ; "review edge")]
    #[test_case(59.9 => Disposition::Flagged ; "below review")]
    #[test_case(30.0 => Disposition::Flagged ; "flag edge")]
    #[test_case(29.9 => Disposition::Monitored ; "below flag")]
    fn test_disposition_bands(score: f64) -> Disposition {
        disposition(score, true)
    }

    #[test]
    fn test_no_alerts_is_approved() {
        assert_eq!(disposition(0.0, false), Disposition::Approved);
        assert_eq!(assess(&[]).disposition, Disposition::Approved);
    }

    #[test]
    fn test_lone_high_alert_is_monitored() {
        let result = assess(&[alert(Severity::High, &["MANUAL_REVIEW"])]);
        assert_eq!(result.score, 28.0);
        assert_eq!(result.disposition, Disposition::Monitored);
    }

    #[test]
    fn test_actions_are_deduplicated_sorted_and_blocked() {
        let alerts = vec![
            alert(Severity::Emergency, &["REPORT_SAR", "MANUAL_REVIEW"]),
            alert(Severity::Critical, &["MANUAL_REVIEW"]),
        ];
        let result = assess(&alerts);
        assert_eq!(result.score, 80.0);
        assert_eq!(result.disposition, Disposition::Blocked);
        assert_eq!(
            result.actions,
            vec!["BLOCK_TRANSACTION", "MANUAL_REVIEW", "REPORT_SAR"]
        );
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
            Just(Severity::Emergency),
        ]
    }

    proptest! {
        #[test]
        fn prop_score_is_bounded(severities in prop::collection::vec(severity(), 0..40)) {
            let score = score_severities(severities);
            prop_assert!((0.0..=100.0).contains(&score));
        }

        #[test]
        fn prop_adding_strongest_severity_never_lowers_score(
            severities in prop::collection::vec(severity(), 1..40),
        ) {
            let strongest = *severities.iter().max().unwrap();
            let before = score_severities(severities.clone());
            let mut extended = severities;
            extended.push(strongest);
            prop_assert!(score_severities(extended) + 1e-9 >= before);
        }
    }
}
