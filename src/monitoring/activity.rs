//! Per-customer activity tracker
//!
//! Daily and hourly counters are keyed by the UTC bucket index of the
//! transaction timestamp. A bucket from an elapsed window is reset lazily the
//! next time the customer is seen; only whole idle customers are swept, by the
//! background metrics loop.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use crate::monitoring::config::ActivityConfig;

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_HOUR: i64 = 3_600;

/// Velocity figures for one customer, including the transaction just recorded
#[derive(Debug, Clone, PartialEq)]
pub struct VelocitySnapshot {
    pub daily_sum: Decimal,
    pub daily_count: u64,
    pub hourly_sum: Decimal,
    pub hourly_count: u64,
    pub recent_countries: Vec<String>,
}

/// In-window hit figures for one (customer, pattern) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternWindow {
    pub count: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
struct Bucket {
    index: i64,
    sum: Decimal,
    count: u64,
}

impl Bucket {
    fn empty() -> Self {
        Self {
            index: i64::MIN,
            sum: Decimal::ZERO,
            count: 0,
        }
    }

    /// Events older than the current bucket are counted into it
    fn record(&mut self, index: i64, amount: Decimal) {
        if index > self.index {
            self.index = index;
            self.sum = Decimal::ZERO;
            self.count = 0;
        }
        self.sum += amount;
        self.count += 1;
    }

    fn read(&self, index: i64) -> (Decimal, u64) {
        if index > self.index {
            (Decimal::ZERO, 0)
        } else {
            (self.sum, self.count)
        }
    }
}

#[derive(Debug)]
struct PatternHits {
    window: Duration,
    hits: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl PatternHits {
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.hits.len();
        self.hits.retain(|(at, _)| *at > cutoff);
        before - self.hits.len()
    }
}

/// Rolling state for one customer
#[derive(Debug)]
struct ActivityWindow {
    daily: Bucket,
    hourly: Bucket,
    countries: VecDeque<(String, DateTime<Utc>)>,
    pattern_hits: HashMap<String, PatternHits>,
    last_activity: DateTime<Utc>,
}

impl ActivityWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily: Bucket::empty(),
            hourly: Bucket::empty(),
            countries: VecDeque::new(),
            pattern_hits: HashMap::new(),
            last_activity: now,
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    fn record_country(&mut self, country: &str, at: DateTime<Utc>, config: &ActivityConfig) {
        let cutoff = at
            .checked_sub_signed(Duration::days(i64::from(config.country_window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.countries.retain(|(_, seen)| *seen > cutoff);

        if let Some(entry) = self.countries.iter_mut().find(|(c, _)| c == country) {
            if at > entry.1 {
                entry.1 = at;
            }
            return;
        }
        self.countries.push_back((country.to_string(), at));
        while self.countries.len() > config.country_cap {
            self.countries.pop_front();
        }
    }

    fn snapshot(&self, at: DateTime<Utc>) -> VelocitySnapshot {
        let (daily_sum, daily_count) = self.daily.read(day_index(at));
        let (hourly_sum, hourly_count) = self.hourly.read(hour_index(at));
        VelocitySnapshot {
            daily_sum,
            daily_count,
            hourly_sum,
            hourly_count,
            recent_countries: self.countries.iter().map(|(c, _)| c.clone()).collect(),
        }
    }
}

fn day_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECONDS_PER_DAY)
}

fn hour_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECONDS_PER_HOUR)
}

/// Per-customer velocity and geography tracker
///
/// Backed by a sharded concurrent map: evaluations for different customers
/// rarely contend, while evaluations for the same customer serialize on that
/// customer's entry.
pub struct ActivityTracker {
    windows: DashMap<String, ActivityWindow>,
    config: ActivityConfig,
}

impl ActivityTracker {
    pub fn new(config: ActivityConfig) -> Self {
        // shard amount must be a power of two above one
        let shards = config.shard_count.max(2).next_power_of_two();
        Self {
            windows: DashMap::with_shard_amount(shards),
            config,
        }
    }

    /// Record a transaction and return the customer's velocity including it
    pub fn record_and_query(
        &self,
        customer_id: &str,
        amount: Decimal,
        at: DateTime<Utc>,
        country: Option<&str>,
    ) -> VelocitySnapshot {
        let mut window = self
            .windows
            .entry(customer_id.to_string())
            .or_insert_with(|| ActivityWindow::new(at));

        window.daily.record(day_index(at), amount);
        window.hourly.record(hour_index(at), amount);
        if let Some(country) = country.filter(|c| !c.is_empty()) {
            window.record_country(country, at, &self.config);
        }
        window.touch(at);
        window.snapshot(at)
    }

    /// Current figures for a customer without recording anything
    pub fn query(&self, customer_id: &str, at: DateTime<Utc>) -> Option<VelocitySnapshot> {
        self.windows
            .get(customer_id)
            .map(|window| window.snapshot(at))
    }

    /// Record one matched occurrence of a windowed pattern and return the
    /// in-window totals, the new hit included
    pub fn record_pattern_hit(
        &self,
        customer_id: &str,
        pattern_id: &str,
        at: DateTime<Utc>,
        amount: Decimal,
        window: Duration,
    ) -> PatternWindow {
        let mut activity = self
            .windows
            .entry(customer_id.to_string())
            .or_insert_with(|| ActivityWindow::new(at));
        activity.touch(at);

        let hits = activity
            .pattern_hits
            .entry(pattern_id.to_string())
            .or_insert_with(|| PatternHits {
                window,
                hits: VecDeque::new(),
            });
        hits.window = window;
        hits.hits.push_back((at, amount));
        hits.prune(at);
        while hits.hits.len() > self.config.max_pattern_hits.max(1) {
            hits.hits.pop_front();
        }

        PatternWindow {
            count: hits.hits.len() as u64,
            amount: hits.hits.iter().map(|(_, a)| *a).sum(),
        }
    }

    /// Drop pattern hits that fell out of their window; returns the number removed
    pub fn prune_pattern_hits(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, activity| {
            for hits in activity.pattern_hits.values_mut() {
                removed += hits.prune(now);
            }
            activity.pattern_hits.retain(|_, hits| !hits.hits.is_empty());
            true
        });
        removed
    }

    /// Forget customers idle for longer than the configured eviction age
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            .checked_sub_signed(Duration::days(i64::from(self.config.idle_eviction_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.windows.len();
        self.windows.retain(|_, activity| activity.last_activity >= cutoff);
        before.saturating_sub(self.windows.len())
    }

    pub fn customer_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn tracker() -> ActivityTracker {
        ActivityTracker::new(ActivityConfig::default())
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn test_current_transaction_counts_toward_its_own_totals() {
        let t = tracker();
        let snap = t.record_and_query("c1", Decimal::from(500), at(9, 0), Some("US"));
        assert_eq!(snap.daily_count, 1);
        assert_eq!(snap.daily_sum, Decimal::from(500));
        assert_eq!(snap.hourly_count, 1);
        assert_eq!(snap.recent_countries, vec!["US".to_string()]);
    }

    #[test]
    fn test_hour_and_day_rollover() {
        let t = tracker();
        t.record_and_query("c1", Decimal::from(10), at(9, 10), None);
        t.record_and_query("c1", Decimal::from(10), at(9, 50), None);
        let snap = t.record_and_query("c1", Decimal::from(10), at(10, 5), None);
        assert_eq!(snap.hourly_count, 1);
        assert_eq!(snap.daily_count, 3);

        let next_day = Utc.with_ymd_and_hms(2026, 3, 3, 0, 1, 0).unwrap();
        let snap = t.record_and_query("c1", Decimal::from(10), next_day, None);
        assert_eq!(snap.daily_count, 1);
        assert_eq!(snap.daily_sum, Decimal::from(10));
    }

    #[test]
    fn test_late_event_lands_in_current_bucket() {
        let t = tracker();
        t.record_and_query("c1", Decimal::from(10), at(11, 0), None);
        let snap = t.record_and_query("c1", Decimal::from(5), at(9, 0), None);
        assert_eq!(snap.daily_count, 2);
        assert_eq!(snap.daily_sum, Decimal::from(15));
    }

    #[test]
    fn test_country_set_is_bounded_with_oldest_insertion_eviction() {
        let config = ActivityConfig {
            country_cap: 3,
            ..ActivityConfig::default()
        };
        let t = ActivityTracker::new(config);
        for (i, country) in ["US", "GB", "FR", "US", "DE"].iter().enumerate() {
            t.record_and_query("c1", Decimal::ONE, at(9, i as u32), Some(country));
        }
        let snap = t.query("c1", at(9, 30)).unwrap();
        assert_eq!(snap.recent_countries, vec!["GB", "FR", "DE"]);
    }

    #[test]
    fn test_countries_expire_after_window() {
        let t = tracker();
        t.record_and_query("c1", Decimal::ONE, at(9, 0), Some("US"));
        let later = at(9, 0) + Duration::days(31);
        let snap = t.record_and_query("c1", Decimal::ONE, later, Some("GB"));
        assert_eq!(snap.recent_countries, vec!["GB".to_string()]);
    }

    #[test]
    fn test_pattern_hits_window() {
        let t = tracker();
        let window = Duration::hours(1);
        t.record_pattern_hit("c1", "P", at(9, 0), Decimal::from(5), window);
        let w = t.record_pattern_hit("c1", "P", at(9, 30), Decimal::from(7), window);
        assert_eq!(w.count, 2);
        assert_eq!(w.amount, Decimal::from(12));

        let w = t.record_pattern_hit("c1", "P", at(10, 15), Decimal::from(1), window);
        assert_eq!(w.count, 2);

        assert_eq!(t.prune_pattern_hits(at(12, 0)), 2);
    }

    #[test]
    fn test_evict_idle_customers() {
        let t = tracker();
        t.record_and_query("old", Decimal::ONE, at(9, 0), None);
        t.record_and_query("fresh", Decimal::ONE, at(9, 0) + Duration::days(40), None);
        assert_eq!(t.evict_idle(at(9, 0) + Duration::days(41)), 1);
        assert_eq!(t.customer_count(), 1);
        assert!(t.query("old", at(9, 0)).is_none());
    }
}
