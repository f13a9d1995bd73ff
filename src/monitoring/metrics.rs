//! Engine metrics
//!
//! `MonitorMetrics` holds the Prometheus counters exported in text format;
//! `TransactionMetricsCollector` keeps the rolling hourly breakdown served by
//! `get_metrics`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::monitoring::errors::{MonitoringError, Result};

const SECONDS_PER_HOUR: i64 = 3_600;
const BREAKDOWN_HOURS: i64 = 24;

/// Prometheus instruments for the engine
pub struct MonitorMetrics {
    registry: Registry,

    pub transactions: IntCounter,
    pub transactions_blocked: IntCounter,
    pub evaluation_seconds: Histogram,

    pub alerts: IntCounterVec,
    pub alerts_dispatched: IntCounter,
    pub alerts_dropped: IntCounter,
    pub active_alerts: IntGauge,
    pub escalations: IntCounter,

    pub compliance_actions: IntCounter,
    pub persistence_failures: IntCounter,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transactions = IntCounter::new(
            "risk_transactions_total",
            "Total number of transactions evaluated",
        )?;
        let transactions_blocked = IntCounter::new(
            "risk_transactions_blocked_total",
            "Total number of transactions with a BLOCKED disposition",
        )?;
        let evaluation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "risk_evaluation_seconds",
                "Time spent evaluating one transaction",
            )
            .buckets(vec![0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.05]),
        )?;

        let alerts = IntCounterVec::new(
            Opts::new("risk_alerts_total", "Total number of alerts raised"),
            &["alert_type"],
        )?;
        let alerts_dispatched = IntCounter::new(
            "risk_alerts_dispatched_total",
            "Alert deliveries to subscriber channels",
        )?;
        let alerts_dropped = IntCounter::new(
            "risk_alerts_dropped_total",
            "Alert deliveries dropped because a subscriber channel was full",
        )?;
        let active_alerts = IntGauge::new("risk_active_alerts", "Tracked alerts in ACTIVE status")?;
        let escalations =
            IntCounter::new("risk_escalations_total", "Total number of escalations processed")?;

        let compliance_actions = IntCounter::new(
            "risk_compliance_actions_total",
            "Compliance actions executed",
        )?;
        let persistence_failures = IntCounter::new(
            "risk_persistence_failures_total",
            "Records that could not be queued or written",
        )?;

        registry.register(Box::new(transactions.clone()))?;
        registry.register(Box::new(transactions_blocked.clone()))?;
        registry.register(Box::new(evaluation_seconds.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(alerts_dispatched.clone()))?;
        registry.register(Box::new(alerts_dropped.clone()))?;
        registry.register(Box::new(active_alerts.clone()))?;
        registry.register(Box::new(escalations.clone()))?;
        registry.register(Box::new(compliance_actions.clone()))?;
        registry.register(Box::new(persistence_failures.clone()))?;

        Ok(Self {
            registry,
            transactions,
            transactions_blocked,
            evaluation_seconds,
            alerts,
            alerts_dispatched,
            alerts_dropped,
            active_alerts,
            escalations,
            compliance_actions,
            persistence_failures,
        })
    }

    /// Prometheus text exposition of every instrument
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MonitoringError::Metrics(e.to_string()))
    }

    pub fn record_alert(&self, alert_type: &str) {
        self.alerts.with_label_values(&[alert_type]).inc();
    }
}

/// One hour of traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyMetric {
    pub hour: DateTime<Utc>,
    pub transaction_count: u64,
    pub volume: Decimal,
    pub suspicious_count: u64,
    pub average_amount: Decimal,
}

/// Rolling transaction statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetrics {
    pub total_transactions: u64,
    pub total_volume: Decimal,
    pub average_amount: Decimal,
    pub peak_hour_volume: Decimal,
    pub suspicious_count: u64,
    pub blocked_count: u64,
    pub last_updated: DateTime<Utc>,
    pub hourly_breakdown: Vec<HourlyMetric>,
}

#[derive(Debug, Default, Clone)]
struct HourBucket {
    count: u64,
    volume: Decimal,
    suspicious: u64,
}

#[derive(Debug)]
struct Totals {
    transactions: u64,
    volume: Decimal,
    suspicious: u64,
    blocked: u64,
    hourly: BTreeMap<i64, HourBucket>,
    last_updated: DateTime<Utc>,
}

fn average(volume: Decimal, count: u64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    volume
        .checked_div(Decimal::from(count))
        .unwrap_or(Decimal::ZERO)
}

/// Lifetime totals plus a trailing per-hour breakdown
pub struct TransactionMetricsCollector {
    inner: Mutex<Totals>,
}

impl TransactionMetricsCollector {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Totals {
                transactions: 0,
                volume: Decimal::ZERO,
                suspicious: 0,
                blocked: 0,
                hourly: BTreeMap::new(),
                last_updated: now,
            }),
        }
    }

    pub fn record(&self, at: DateTime<Utc>, amount: Decimal, suspicious: bool, blocked: bool) {
        let mut totals = self.inner.lock();
        totals.transactions += 1;
        totals.volume += amount;
        if suspicious {
            totals.suspicious += 1;
        }
        if blocked {
            totals.blocked += 1;
        }
        let bucket = totals
            .hourly
            .entry(at.timestamp().div_euclid(SECONDS_PER_HOUR))
            .or_default();
        bucket.count += 1;
        bucket.volume += amount;
        if suspicious {
            bucket.suspicious += 1;
        }
        if at > totals.last_updated {
            totals.last_updated = at;
        }
    }

    pub fn snapshot(&self) -> TransactionMetrics {
        let totals = self.inner.lock();
        let hourly_breakdown: Vec<HourlyMetric> = totals
            .hourly
            .iter()
            .filter_map(|(index, bucket)| {
                let hour = Utc.timestamp_opt(index * SECONDS_PER_HOUR, 0).single()?;
                Some(HourlyMetric {
                    hour,
                    transaction_count: bucket.count,
                    volume: bucket.volume,
                    suspicious_count: bucket.suspicious,
                    average_amount: average(bucket.volume, bucket.count),
                })
            })
            .collect();
        let peak_hour_volume = hourly_breakdown
            .iter()
            .map(|h| h.volume)
            .max()
            .unwrap_or(Decimal::ZERO);

        TransactionMetrics {
            total_transactions: totals.transactions,
            total_volume: totals.volume,
            average_amount: average(totals.volume, totals.transactions),
            peak_hour_volume,
            suspicious_count: totals.suspicious,
            blocked_count: totals.blocked,
            last_updated: totals.last_updated,
            hourly_breakdown,
        }
    }

    /// Drop hourly buckets older than the trailing day and return a fresh snapshot
    pub fn aggregate(&self, now: DateTime<Utc>) -> TransactionMetrics {
        {
            let mut totals = self.inner.lock();
            let oldest = (now - Duration::hours(BREAKDOWN_HOURS))
                .timestamp()
                .div_euclid(SECONDS_PER_HOUR);
            let before = totals.hourly.len();
            totals.hourly = totals.hourly.split_off(&oldest);
            debug!(pruned = before - totals.hourly.len(), "Aggregated hourly metrics");
            if now > totals.last_updated {
                totals.last_updated = now;
            }
        }
        self.snapshot()
    }
}
