//! Alert dispatcher & lifecycle
//!
//! Fans alerts out to registered subscriber channels with `try_send` only: a
//! full or closed channel misses the alert and the drop is counted. Also owns
//! the tracked alert store, lifecycle transitions, expiry sweeping and the
//! escalation queue drained by the alert-processing loop.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::monitoring::alert::Alert;
use crate::monitoring::config::DispatchConfig;
use crate::monitoring::errors::{MonitoringError, Result};
use crate::monitoring::metrics::MonitorMetrics;
use crate::monitoring::types::{ActionType, AlertStatus};

/// Why an alert was escalated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    /// Severe alert still ACTIVE after the escalation delay
    StaleCritical,
    /// Compliance action that needs an operator's approval
    ManualApproval { action: ActionType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub alert_id: String,
    pub reason: EscalationReason,
    pub queued_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Delivery outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct AlertStore {
    alerts: HashMap<String, Alert>,
    order: VecDeque<String>,
}

pub struct AlertDispatcher {
    config: DispatchConfig,
    metrics: Arc<MonitorMetrics>,
    channels: RwLock<HashMap<String, mpsc::Sender<Alert>>>,
    store: Mutex<AlertStore>,
    escalations: Mutex<VecDeque<Escalation>>,
    escalated: Mutex<HashSet<String>>,
    history: Mutex<VecDeque<Escalation>>,
}

impl AlertDispatcher {
    pub fn new(config: DispatchConfig, metrics: Arc<MonitorMetrics>) -> Self {
        Self {
            config,
            metrics,
            channels: RwLock::new(HashMap::new()),
            store: Mutex::new(AlertStore::default()),
            escalations: Mutex::new(VecDeque::new()),
            escalated: Mutex::new(HashSet::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a named subscriber; re-registering a name closes the previous channel
    pub fn register(&self, name: &str, capacity: usize) -> mpsc::Receiver<Alert> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        if self
            .channels
            .write()
            .insert(name.to_string(), sender)
            .is_some()
        {
            info!(channel = %name, "Alert channel replaced");
        } else {
            info!(channel = %name, capacity = capacity.max(1), "Alert channel registered");
        }
        receiver
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.channels.write().remove(name).is_some();
        if removed {
            info!(channel = %name, "Alert channel unregistered");
        }
        removed
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn send_all(&self, alert: &Alert) -> DispatchReport {
        let mut report = DispatchReport::default();
        let channels = self.channels.read();
        for (name, sender) in channels.iter() {
            match sender.try_send(alert.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(channel = %name, alert_id = %alert.id, "Channel full, alert dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(channel = %name, alert_id = %alert.id, "Channel closed, alert dropped");
                    report.dropped += 1;
                }
            }
        }
        self.metrics.alerts_dispatched.inc_by(report.delivered as u64);
        self.metrics.alerts_dropped.inc_by(report.dropped as u64);
        report
    }

    /// Non-blocking fan-out of an alert at or above the severity floor
    pub fn dispatch(&self, alert: &Alert) -> DispatchReport {
        if alert.severity < self.config.severity_floor {
            return DispatchReport::default();
        }
        self.send_all(alert)
    }

    /// Start tracking freshly produced alerts
    ///
    /// An id that is already tracked keeps its recorded lifecycle: the slot in
    /// `alerts` is replaced by the tracked copy. Returns the indices of the
    /// alerts tracked for the first time.
    pub fn track(&self, alerts: &mut [Alert]) -> Vec<usize> {
        let mut fresh = Vec::with_capacity(alerts.len());
        if alerts.is_empty() {
            return fresh;
        }
        let mut store = self.store.lock();
        for (index, alert) in alerts.iter_mut().enumerate() {
            if let Some(tracked) = store.alerts.get(&alert.id) {
                debug!(alert_id = %alert.id, status = %tracked.status, "Alert already tracked");
                *alert = tracked.clone();
                continue;
            }
            store.order.push_back(alert.id.clone());
            if alert.status == AlertStatus::Active {
                self.metrics.active_alerts.inc();
            }
            store.alerts.insert(alert.id.clone(), alert.clone());
            fresh.push(index);
        }
        while store.alerts.len() > self.config.max_tracked_alerts {
            let Some(oldest) = store.order.pop_front() else {
                break;
            };
            if let Some(evicted) = store.alerts.remove(&oldest) {
                if evicted.status == AlertStatus::Active {
                    self.metrics.active_alerts.dec();
                }
            }
        }
        fresh
    }

    pub fn get(&self, alert_id: &str) -> Option<Alert> {
        self.store.lock().alerts.get(alert_id).cloned()
    }

    /// Apply an operator lifecycle transition
    pub fn transition(&self, alert_id: &str, next: AlertStatus) -> Result<Alert> {
        let mut store = self.store.lock();
        let alert = store
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| MonitoringError::AlertNotFound(alert_id.to_string()))?;
        let from = alert.status;
        alert.transition(next)?;
        if from == AlertStatus::Active {
            self.metrics.active_alerts.dec();
        }
        info!(alert_id = %alert_id, from = %from, to = %next, "Alert status changed");
        Ok(alert.clone())
    }

    /// Tracked alerts in ACTIVE status, ordered by time then id
    ///
    /// Expired alerts stay visible until the next sweep removes them.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .store
            .lock()
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// Forget every alert past its expiry; returns the number removed
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut store = self.store.lock();
        let expired: Vec<String> = store
            .alerts
            .values()
            .filter(|a| a.is_expired(now))
            .map(|a| a.id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }
        for id in &expired {
            if let Some(alert) = store.alerts.remove(id) {
                if alert.status == AlertStatus::Active {
                    self.metrics.active_alerts.dec();
                }
            }
        }
        let AlertStore { alerts, order } = &mut *store;
        order.retain(|id| alerts.contains_key(id));
        drop(store);

        let mut escalated = self.escalated.lock();
        for id in &expired {
            escalated.remove(id);
        }
        debug!(count = expired.len(), "Swept expired alerts");
        expired.len()
    }

    /// Queue escalations for severe alerts left ACTIVE too long
    pub fn queue_stale_escalations(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.escalate_after();
        let stale: Vec<String> = self
            .store
            .lock()
            .alerts
            .values()
            .filter(|a| {
                a.is_live(now)
                    && a.severity >= self.config.escalation_severity
                    && a.timestamp <= cutoff
            })
            .map(|a| a.id.clone())
            .collect();

        let mut escalated = self.escalated.lock();
        let mut queue = self.escalations.lock();
        let mut queued = 0;
        for alert_id in stale {
            if escalated.insert(alert_id.clone()) {
                queue.push_back(Escalation {
                    alert_id,
                    reason: EscalationReason::StaleCritical,
                    queued_at: now,
                    processed_at: None,
                });
                queued += 1;
            }
        }
        queued
    }

    /// Queue a manual-approval escalation for a compliance action
    pub fn request_approval(&self, alert_id: &str, action: ActionType, now: DateTime<Utc>) {
        self.escalations.lock().push_back(Escalation {
            alert_id: alert_id.to_string(),
            reason: EscalationReason::ManualApproval { action },
            queued_at: now,
            processed_at: None,
        });
    }

    pub fn pending_escalations(&self) -> usize {
        self.escalations.lock().len()
    }

    /// Process every queued escalation; returns the number handled
    pub fn drain_escalations(&self, now: DateTime<Utc>) -> usize {
        let drained: Vec<Escalation> = self.escalations.lock().drain(..).collect();
        let count = drained.len();
        for mut escalation in drained {
            match &escalation.reason {
                EscalationReason::StaleCritical => {
                    warn!(alert_id = %escalation.alert_id, "Escalating unacknowledged alert");
                    if let Some(alert) = self.get(&escalation.alert_id) {
                        self.send_all(&alert);
                    }
                }
                EscalationReason::ManualApproval { action } => {
                    warn!(
                        alert_id = %escalation.alert_id,
                        action = %action,
                        "Compliance action awaiting manual approval"
                    );
                }
            }
            self.metrics.escalations.inc();
            escalation.processed_at = Some(now);

            let mut history = self.history.lock();
            history.push_back(escalation);
            while history.len() > self.config.escalation_history {
                history.pop_front();
            }
        }
        count
    }

    /// Most recent processed escalations, oldest first
    pub fn recent_escalations(&self, limit: usize) -> Vec<Escalation> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}
