//! Transaction monitoring engine
//!
//! Facade over the evaluation pipeline, scorer, dispatcher, compliance action
//! scheduler, metrics and persistence writer. `monitor_transaction` is fully
//! synchronous; background loops only start with `start_monitoring`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::monitoring::actions::{
    ActionScheduler, ComplianceActionHandler, LoggingActionHandler, ScheduleOutcome,
    ScheduledAction,
};
use crate::monitoring::activity::ActivityTracker;
use crate::monitoring::alert::Alert;
use crate::monitoring::config::MonitoringConfig;
use crate::monitoring::dispatcher::{AlertDispatcher, Escalation};
use crate::monitoring::errors::{MonitoringError, Result};
use crate::monitoring::metrics::{MonitorMetrics, TransactionMetrics, TransactionMetricsCollector};
use crate::monitoring::pipeline::{EvaluationPipeline, MandatedActions};
use crate::monitoring::registry::{ComplianceRule, MonitoringPattern, Registry};
use crate::monitoring::scheduler::{BackgroundScheduler, SweepTarget};
use crate::monitoring::scoring;
use crate::monitoring::storage::{
    alert_key, result_key, MemoryStore, PersistenceGateway, PersistenceWriter, ALERT_KEY_PREFIX,
    METRICS_KEY,
};
use crate::monitoring::types::{AlertStatus, Disposition, TransactionEvent};

/// Outcome of evaluating one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringResult {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<Alert>,
    pub recommended_actions: Vec<String>,
    /// 0..=100
    pub risk_score: f64,
    pub disposition: Disposition,
    pub review_required: bool,
    /// Evaluation and scoring time in microseconds
    pub processing_time_us: u64,
    /// Non-fatal problems, e.g. a record that could not be queued for persistence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MonitoringResult {
    pub fn is_clean(&self) -> bool {
        self.alerts.is_empty()
    }
}

struct EngineState {
    config: MonitoringConfig,
    pipeline: EvaluationPipeline,
    dispatcher: AlertDispatcher,
    actions: ActionScheduler,
    metrics: Arc<MonitorMetrics>,
    collector: TransactionMetricsCollector,
    gateway: Arc<dyn PersistenceGateway>,
    writer: Option<PersistenceWriter>,
}

impl EngineState {
    fn persist<T: Serialize>(&self, key: Vec<u8>, record: &T) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.submit_record(key, record),
            None => Ok(()),
        }
    }

    fn schedule_mandated(&self, tx: &TransactionEvent, mandated: Vec<MandatedActions>) {
        let now = Utc::now();
        for bundle in mandated {
            for action in bundle.actions {
                let action_type = action.action_type;
                let scheduled = ScheduledAction {
                    rule_id: bundle.rule_id.clone(),
                    alert_id: bundle.alert_id.clone(),
                    transaction_id: tx.id.clone(),
                    customer_id: tx.customer_id.clone(),
                    action,
                    due_at: now,
                };
                match self.actions.schedule(scheduled, now) {
                    ScheduleOutcome::NeedsApproval => {
                        self.dispatcher.request_approval(&bundle.alert_id, action_type, now)
                    }
                    ScheduleOutcome::Deferred => {
                        debug!(rule_id = %bundle.rule_id, action = %action_type, "Compliance action deferred")
                    }
                    ScheduleOutcome::Executed | ScheduleOutcome::Failed => {}
                }
            }
        }
    }
}

impl SweepTarget for EngineState {
    fn pattern_sweep(&self, now: DateTime<Utc>) {
        let pruned = self.pipeline.tracker().prune_pattern_hits(now);
        if pruned > 0 {
            debug!(pruned, "Pruned expired pattern hits");
        }
    }

    fn compliance_sweep(&self, now: DateTime<Utc>) {
        let executed = self.actions.process_due(now);
        if executed > 0 {
            info!(executed, pending = self.actions.pending_count(), "Deferred compliance actions executed");
        }
    }

    fn metrics_sweep(&self, now: DateTime<Utc>) {
        let snapshot = self.collector.aggregate(now);
        let evicted = self.pipeline.tracker().evict_idle(now);
        if let Err(e) = self.persist(METRICS_KEY.as_bytes().to_vec(), &snapshot) {
            warn!(error = %e, "Failed to queue metrics snapshot");
            self.metrics.persistence_failures.inc();
        }
        debug!(
            total_transactions = snapshot.total_transactions,
            suspicious = snapshot.suspicious_count,
            evicted_customers = evicted,
            "Metrics aggregated"
        );
    }

    fn alert_sweep(&self, now: DateTime<Utc>) {
        self.dispatcher.sweep_expired(now);
        self.dispatcher.queue_stale_escalations(now);
        self.dispatcher.drain_escalations(now);
    }
}

/// Real-time transaction risk monitor
pub struct TransactionMonitoringEngine {
    state: Arc<EngineState>,
    scheduler: BackgroundScheduler,
}

impl TransactionMonitoringEngine {
    /// Build an engine with the logging compliance action handler
    pub fn new(config: MonitoringConfig, gateway: Arc<dyn PersistenceGateway>) -> Result<Self> {
        Self::with_action_handler(config, gateway, Arc::new(LoggingActionHandler))
    }

    /// Default configuration over an in-memory store
    pub fn with_defaults() -> Result<Self> {
        Self::new(MonitoringConfig::default(), Arc::new(MemoryStore::new()))
    }

    pub fn with_action_handler(
        config: MonitoringConfig,
        gateway: Arc<dyn PersistenceGateway>,
        handler: Arc<dyn ComplianceActionHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(MonitorMetrics::new()?);
        let registry = Arc::new(Registry::new(config.patterns.clone(), config.rules.clone()));
        let tracker = Arc::new(ActivityTracker::new(config.activity.clone()));
        let pipeline = EvaluationPipeline::new(&config, registry, tracker);
        let dispatcher = AlertDispatcher::new(config.dispatch.clone(), Arc::clone(&metrics));
        let actions = ActionScheduler::new(handler, metrics.compliance_actions.clone());
        let writer = if config.persistence.enabled {
            Some(PersistenceWriter::spawn(
                Arc::clone(&gateway),
                config.persistence.queue_capacity,
                metrics.persistence_failures.clone(),
            )?)
        } else {
            None
        };
        let scheduler = BackgroundScheduler::new(config.scheduler.clone());

        info!(
            patterns = config.patterns.len(),
            rules = config.rules.len(),
            persistence = config.persistence.enabled,
            "Transaction monitoring engine created"
        );

        Ok(Self {
            state: Arc::new(EngineState {
                collector: TransactionMetricsCollector::new(Utc::now()),
                config,
                pipeline,
                dispatcher,
                actions,
                metrics,
                gateway,
                writer,
            }),
            scheduler,
        })
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.state.config
    }

    /// Start the background loops; needs an ambient tokio runtime
    pub fn start_monitoring(&self) -> Result<()> {
        let target: Arc<dyn SweepTarget> = self.state.clone();
        self.scheduler.start(target)?;
        info!("Transaction monitoring started");
        Ok(())
    }

    /// Signal the background loops and wait for all of them to exit
    pub async fn stop_monitoring(&self) -> Result<()> {
        self.scheduler.stop().await?;
        info!("Transaction monitoring stopped");
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Evaluate, score, persist and dispatch one transaction
    ///
    /// Only a structurally invalid transaction is an error. Persistence
    /// trouble is reported through `MonitoringResult::warnings`.
    pub fn monitor_transaction(&self, tx: &TransactionEvent) -> Result<MonitoringResult> {
        tx.validate()?;
        let state = &self.state;
        let started = Instant::now();

        let evaluation = state.pipeline.evaluate(tx);
        let assessment = scoring::assess(&evaluation.alerts);
        let elapsed = started.elapsed();

        state.metrics.transactions.inc();
        state.metrics.evaluation_seconds.observe(elapsed.as_secs_f64());
        for alert in &evaluation.alerts {
            state.metrics.record_alert(alert.alert_type.as_str());
        }
        let blocked = assessment.disposition == Disposition::Blocked;
        if blocked {
            state.metrics.transactions_blocked.inc();
        }
        state.collector.record(
            tx.timestamp,
            tx.amount.amount,
            assessment.disposition >= Disposition::Flagged,
            blocked,
        );

        let mut alerts = evaluation.alerts;
        let fresh = state.dispatcher.track(&mut alerts);

        let mut result = MonitoringResult {
            transaction_id: tx.id.clone(),
            timestamp: Utc::now(),
            alerts,
            recommended_actions: assessment.actions,
            risk_score: assessment.score,
            disposition: assessment.disposition,
            review_required: assessment.disposition >= Disposition::ManualReviewRequired,
            processing_time_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            warnings: Vec::new(),
        };

        let mut warnings = Vec::new();
        if let Err(e) = state.persist(result_key(&tx.id), &result) {
            warnings.push(format!("monitoring result not persisted: {}", e));
        }
        for alert in fresh.iter().map(|&i| &result.alerts[i]) {
            if let Err(e) = state.persist(alert_key(&alert.id), alert) {
                warnings.push(format!("alert {} not persisted: {}", alert.id, e));
            }
        }
        if !warnings.is_empty() {
            warn!(transaction_id = %tx.id, failures = warnings.len(), "Persistence degraded");
            state.metrics.persistence_failures.inc_by(warnings.len() as u64);
            result.warnings = warnings;
        }

        for alert in fresh.iter().map(|&i| &result.alerts[i]) {
            state.dispatcher.dispatch(alert);
        }
        let mandated = evaluation
            .mandated
            .into_iter()
            .filter(|bundle| fresh.iter().any(|&i| result.alerts[i].id == bundle.alert_id))
            .collect();
        state.schedule_mandated(tx, mandated);

        if result.review_required {
            info!(
                transaction_id = %tx.id,
                customer_id = %tx.customer_id,
                risk_score = result.risk_score,
                disposition = %result.disposition,
                alerts = result.alerts.len(),
                "Transaction requires review"
            );
        } else {
            debug!(
                transaction_id = %tx.id,
                risk_score = result.risk_score,
                disposition = %result.disposition,
                alerts = result.alerts.len(),
                "Transaction evaluated"
            );
        }
        Ok(result)
    }

    // Registry administration

    pub fn patterns(&self) -> Vec<MonitoringPattern> {
        self.state.pipeline.registry().patterns().to_vec()
    }

    pub fn pattern(&self, id: &str) -> Option<MonitoringPattern> {
        self.state.pipeline.registry().pattern(id)
    }

    /// Add or replace a pattern; returns true when it replaced an existing one
    pub fn upsert_pattern(&self, pattern: MonitoringPattern) -> Result<bool> {
        self.state.config.activity.check_pattern(&pattern)?;
        self.state.pipeline.registry().upsert_pattern(pattern)
    }

    pub fn deactivate_pattern(&self, id: &str) -> Result<()> {
        self.state.pipeline.registry().deactivate_pattern(id)
    }

    pub fn remove_pattern(&self, id: &str) -> Result<MonitoringPattern> {
        self.state.pipeline.registry().remove_pattern(id)
    }

    pub fn rules(&self) -> Vec<ComplianceRule> {
        self.state.pipeline.registry().rules().to_vec()
    }

    pub fn rule(&self, id: &str) -> Option<ComplianceRule> {
        self.state.pipeline.registry().rule(id)
    }

    pub fn upsert_rule(&self, rule: ComplianceRule) -> Result<bool> {
        self.state.pipeline.registry().upsert_rule(rule)
    }

    pub fn deactivate_rule(&self, id: &str) -> Result<()> {
        self.state.pipeline.registry().deactivate_rule(id)
    }

    pub fn remove_rule(&self, id: &str) -> Result<ComplianceRule> {
        self.state.pipeline.registry().remove_rule(id)
    }

    // Alert channels

    pub fn register_alert_channel(&self, name: &str) -> mpsc::Receiver<Alert> {
        self.register_alert_channel_with_capacity(name, self.state.config.dispatch.channel_capacity)
    }

    pub fn register_alert_channel_with_capacity(
        &self,
        name: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Alert> {
        self.state.dispatcher.register(name, capacity)
    }

    pub fn unregister_alert_channel(&self, name: &str) -> bool {
        self.state.dispatcher.unregister(name)
    }

    // Alert lifecycle

    fn transition_alert(&self, alert_id: &str, next: AlertStatus) -> Result<Alert> {
        let alert = self.state.dispatcher.transition(alert_id, next)?;
        if let Err(e) = self.state.persist(alert_key(&alert.id), &alert) {
            warn!(alert_id = %alert_id, error = %e, "Alert status change not persisted");
            self.state.metrics.persistence_failures.inc();
        }
        Ok(alert)
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<Alert> {
        self.transition_alert(alert_id, AlertStatus::Acknowledged)
    }

    pub fn investigate_alert(&self, alert_id: &str) -> Result<Alert> {
        self.transition_alert(alert_id, AlertStatus::Investigating)
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert> {
        self.transition_alert(alert_id, AlertStatus::Resolved)
    }

    pub fn mark_false_positive(&self, alert_id: &str) -> Result<Alert> {
        self.transition_alert(alert_id, AlertStatus::FalsePositive)
    }

    // Read side

    pub fn get_metrics(&self) -> TransactionMetrics {
        self.state.collector.snapshot()
    }

    /// Tracked alerts whose status is ACTIVE
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.state.dispatcher.active_alerts()
    }

    pub fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.state.dispatcher.get(alert_id)
    }

    pub fn recent_escalations(&self, limit: usize) -> Vec<Escalation> {
        self.state.dispatcher.recent_escalations(limit)
    }

    pub fn pending_compliance_actions(&self) -> usize {
        self.state.actions.pending_count()
    }

    /// Prometheus text exposition
    pub fn export_metrics(&self) -> Result<String> {
        self.state.metrics.export_metrics()
    }

    /// Wait for queued persistence writes to reach the gateway
    pub fn flush_persistence(&self) -> Result<()> {
        match &self.state.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn load_result(&self, transaction_id: &str) -> Result<Option<MonitoringResult>> {
        self.load(&result_key(transaction_id))
    }

    pub fn load_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        self.load(&alert_key(alert_id))
    }

    /// Every persisted alert, in key order
    pub fn stored_alerts(&self) -> Result<Vec<Alert>> {
        self.state
            .gateway
            .iterate(ALERT_KEY_PREFIX.as_bytes())?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(MonitoringError::from))
            .collect()
    }

    fn load<T: for<'de> Deserialize<'de>>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.state.gateway.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
