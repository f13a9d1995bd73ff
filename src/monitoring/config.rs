//! Monitoring configuration
//!
//! Operational thresholds, tracker sizing, dispatch policy, loop intervals and
//! the initial pattern/rule set. Loaded from TOML or JSON, then optionally
//! overridden from `RISK_MONITOR_*` environment variables.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::monitoring::defaults;
use crate::monitoring::errors::{MonitoringError, Result};
use crate::monitoring::registry::{ComplianceRule, MonitoringPattern};
use crate::monitoring::types::Severity;

/// Upper bound for any alert TTL (ten years)
const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub velocity: VelocityConfig,
    pub geographic: GeographicConfig,
    pub activity: ActivityConfig,
    pub dispatch: DispatchConfig,
    pub alert_ttl: AlertTtlConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    /// Initial monitoring patterns
    pub patterns: Vec<MonitoringPattern>,
    /// Initial compliance rules
    pub rules: Vec<ComplianceRule>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            velocity: VelocityConfig::default(),
            geographic: GeographicConfig::default(),
            activity: ActivityConfig::default(),
            dispatch: DispatchConfig::default(),
            alert_ttl: AlertTtlConfig::default(),
            scheduler: SchedulerConfig::default(),
            persistence: PersistenceConfig::default(),
            patterns: defaults::default_patterns(),
            rules: defaults::default_rules(),
        }
    }
}

/// Velocity check thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Daily amount that raises DAILY_AMOUNT_LIMIT once reached
    pub daily_amount_limit: Decimal,
    /// DAILY_COUNT_LIMIT fires once the day's count exceeds this
    pub daily_count_limit: u64,
    /// HOURLY_VELOCITY fires once the hour's count exceeds this
    pub hourly_count_limit: u64,
    pub severity: Severity,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            daily_amount_limit: Decimal::from(100_000),
            daily_count_limit: 50,
            hourly_count_limit: 10,
            severity: Severity::Medium,
        }
    }
}

/// Geographic risk check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeographicConfig {
    pub high_risk_countries: Vec<String>,
    /// Unusual diversity once the recent-country set grows past this
    pub max_recent_countries: usize,
}

impl Default for GeographicConfig {
    fn default() -> Self {
        Self {
            high_risk_countries: ["AF", "KP", "IR", "SY", "MM", "CU", "VE"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_recent_countries: 5,
        }
    }
}

/// Activity tracker sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Concurrent map shards, rounded up to a power of two
    pub shard_count: usize,
    pub country_cap: usize,
    pub country_window_days: u32,
    pub idle_eviction_days: u32,
    /// Per (customer, pattern) hit history cap
    pub max_pattern_hits: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            shard_count: 64,
            country_cap: 20,
            country_window_days: 30,
            idle_eviction_days: 30,
            max_pattern_hits: 1024,
        }
    }
}

impl ActivityConfig {
    /// A windowed pattern must be able to reach its count with the capped hit history
    pub fn check_pattern(&self, pattern: &MonitoringPattern) -> Result<()> {
        let capped = u64::try_from(self.max_pattern_hits).unwrap_or(u64::MAX);
        if pattern.window().is_some() && pattern.threshold.count > capped {
            return Err(MonitoringError::Configuration(format!(
                "pattern {} threshold count {} exceeds activity.max_pattern_hits {}",
                pattern.id, pattern.threshold.count, self.max_pattern_hits
            )));
        }
        Ok(())
    }
}

/// Alert dispatch and escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Alerts below this severity are tracked but not fanned out
    pub severity_floor: Severity,
    pub channel_capacity: usize,
    pub max_tracked_alerts: usize,
    /// Minimum severity considered for stale-alert escalation
    pub escalation_severity: Severity,
    pub escalate_after_secs: u64,
    pub escalation_history: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            severity_floor: Severity::High,
            channel_capacity: 100,
            max_tracked_alerts: 10_000,
            escalation_severity: Severity::Critical,
            escalate_after_secs: 900,
            escalation_history: 500,
        }
    }
}

impl DispatchConfig {
    pub fn escalate_after(&self) -> Duration {
        Duration::seconds(self.escalate_after_secs.min(MAX_TTL_SECS) as i64)
    }
}

/// Alert expiry per source, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertTtlConfig {
    pub pattern_secs: u64,
    pub compliance_secs: u64,
    pub velocity_secs: u64,
    pub geographic_risk_secs: u64,
    pub geographic_pattern_secs: u64,
}

impl Default for AlertTtlConfig {
    fn default() -> Self {
        Self {
            pattern_secs: 24 * 3_600,
            compliance_secs: 7 * 24 * 3_600,
            velocity_secs: 24 * 3_600,
            geographic_risk_secs: 48 * 3_600,
            geographic_pattern_secs: 24 * 3_600,
        }
    }
}

fn ttl(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

impl AlertTtlConfig {
    pub fn pattern(&self) -> Duration {
        ttl(self.pattern_secs)
    }

    pub fn compliance(&self) -> Duration {
        ttl(self.compliance_secs)
    }

    pub fn velocity(&self) -> Duration {
        ttl(self.velocity_secs)
    }

    pub fn geographic_risk(&self) -> Duration {
        ttl(self.geographic_risk_secs)
    }

    pub fn geographic_pattern(&self) -> Duration {
        ttl(self.geographic_pattern_secs)
    }

    fn all(&self) -> [(&'static str, u64); 5] {
        [
            ("alert_ttl.pattern_secs", self.pattern_secs),
            ("alert_ttl.compliance_secs", self.compliance_secs),
            ("alert_ttl.velocity_secs", self.velocity_secs),
            ("alert_ttl.geographic_risk_secs", self.geographic_risk_secs),
            ("alert_ttl.geographic_pattern_secs", self.geographic_pattern_secs),
        ]
    }
}

/// Background loop intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pattern_interval_ms: u64,
    pub compliance_interval_ms: u64,
    pub metrics_interval_ms: u64,
    /// Sleep between alert-processing passes
    pub alert_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pattern_interval_ms: 10_000,
            compliance_interval_ms: 30_000,
            metrics_interval_ms: 300_000,
            alert_poll_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    pub fn pattern_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pattern_interval_ms)
    }

    pub fn compliance_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.compliance_interval_ms)
    }

    pub fn metrics_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn alert_poll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.alert_poll_ms)
    }
}

/// Persistence writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 4_096,
        }
    }
}

impl MonitoringConfig {
    /// Load from a `.toml` file, or JSON for any other extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config: Self = if is_toml {
            toml::from_str(&content).map_err(|e| {
                MonitoringError::Configuration(format!("{}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                MonitoringError::Configuration(format!("{}: {}", path.display(), e))
            })?
        };
        Ok(config)
    }

    /// Save as TOML or JSON depending on the extension
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let content = if is_toml {
            self.to_toml_string()?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MonitoringError::Serialization(e.to_string()))
    }

    /// Apply `RISK_MONITOR_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup; unparseable values are
    /// ignored with a warning
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "RISK_MONITOR_DAILY_AMOUNT_LIMIT", &mut self.velocity.daily_amount_limit);
        override_with(&lookup, "RISK_MONITOR_DAILY_COUNT_LIMIT", &mut self.velocity.daily_count_limit);
        override_with(&lookup, "RISK_MONITOR_HOURLY_COUNT_LIMIT", &mut self.velocity.hourly_count_limit);
        override_with(
            &lookup,
            "RISK_MONITOR_MAX_RECENT_COUNTRIES",
            &mut self.geographic.max_recent_countries,
        );
        override_with(&lookup, "RISK_MONITOR_CHANNEL_CAPACITY", &mut self.dispatch.channel_capacity);
        override_with(
            &lookup,
            "RISK_MONITOR_ESCALATE_AFTER_SECS",
            &mut self.dispatch.escalate_after_secs,
        );
        override_with(&lookup, "RISK_MONITOR_PERSISTENCE_ENABLED", &mut self.persistence.enabled);

        if let Some(raw) = lookup("RISK_MONITOR_HIGH_RISK_COUNTRIES") {
            let countries: Vec<String> = raw
                .split(',')
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect();
            if !countries.is_empty() {
                self.geographic.high_risk_countries = countries;
            }
        }
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(MonitoringError::Configuration(msg.to_string()));

        if self.velocity.daily_amount_limit <= Decimal::ZERO {
            return invalid("velocity.daily_amount_limit must be greater than 0");
        }
        if self.velocity.daily_count_limit == 0 || self.velocity.hourly_count_limit == 0 {
            return invalid("velocity count limits must be greater than 0");
        }
        if self.geographic.max_recent_countries == 0 {
            return invalid("geographic.max_recent_countries must be greater than 0");
        }
        if self.activity.shard_count == 0 || self.activity.country_cap == 0 {
            return invalid("activity.shard_count and activity.country_cap must be greater than 0");
        }
        if self.activity.max_pattern_hits == 0 {
            return invalid("activity.max_pattern_hits must be greater than 0");
        }
        if self.dispatch.channel_capacity == 0 || self.dispatch.max_tracked_alerts == 0 {
            return invalid("dispatch capacities must be greater than 0");
        }
        for (name, secs) in self.alert_ttl.all() {
            if secs == 0 || secs > MAX_TTL_SECS {
                return Err(MonitoringError::Configuration(format!(
                    "{} must be between 1 and {}",
                    name, MAX_TTL_SECS
                )));
            }
        }
        let s = &self.scheduler;
        if [s.pattern_interval_ms, s.compliance_interval_ms, s.metrics_interval_ms, s.alert_poll_ms]
            .contains(&0)
        {
            return invalid("scheduler intervals must be greater than 0");
        }
        if self.persistence.queue_capacity == 0 {
            return invalid("persistence.queue_capacity must be greater than 0");
        }

        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            pattern.validate()?;
            self.activity.check_pattern(pattern)?;
            if !seen.insert(pattern.id.as_str()) {
                return Err(MonitoringError::Configuration(format!(
                    "duplicate pattern id {}",
                    pattern.id
                )));
            }
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(MonitoringError::Configuration(format!(
                    "duplicate rule id {}",
                    rule.id
                )));
            }
        }
        Ok(())
    }
}

fn override_with<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(variable = %name, value = %raw, "Ignoring unparseable configuration override"),
    }
}
