//! Compliance action execution
//!
//! Actions mandated by a violated rule either run inline (auto-execute, no
//! delay), wait in the deferred queue for the compliance sweep, or are handed
//! back to the caller as manual-approval escalations.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use prometheus::IntCounter;
use std::sync::Arc;
use tracing::{info, warn};

use crate::monitoring::errors::Result;
use crate::monitoring::registry::ComplianceAction;

/// An action bound to the transaction that triggered it
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction {
    pub rule_id: String,
    pub alert_id: String,
    pub transaction_id: String,
    pub customer_id: String,
    pub action: ComplianceAction,
    pub due_at: DateTime<Utc>,
}

/// What happened to an action handed to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Executed,
    Failed,
    Deferred,
    NeedsApproval,
}

/// Executes compliance actions against downstream systems
pub trait ComplianceActionHandler: Send + Sync {
    fn execute(&self, action: &ScheduledAction) -> Result<()>;
}

/// Default handler: one structured log line per action
#[derive(Debug, Default)]
pub struct LoggingActionHandler;

impl ComplianceActionHandler for LoggingActionHandler {
    fn execute(&self, action: &ScheduledAction) -> Result<()> {
        info!(
            action = %action.action.action_type,
            rule_id = %action.rule_id,
            alert_id = %action.alert_id,
            transaction_id = %action.transaction_id,
            customer_id = %action.customer_id,
            "Executing compliance action"
        );
        Ok(())
    }
}

/// Inline execution plus a queue of delayed actions
pub struct ActionScheduler {
    handler: Arc<dyn ComplianceActionHandler>,
    pending: Mutex<Vec<ScheduledAction>>,
    executed: IntCounter,
}

impl ActionScheduler {
    pub fn new(handler: Arc<dyn ComplianceActionHandler>, executed: IntCounter) -> Self {
        Self {
            handler,
            pending: Mutex::new(Vec::new()),
            executed,
        }
    }

    fn run(&self, action: &ScheduledAction) -> bool {
        match self.handler.execute(action) {
            Ok(()) => {
                self.executed.inc();
                true
            }
            Err(e) => {
                warn!(
                    action = %action.action.action_type,
                    rule_id = %action.rule_id,
                    error = %e,
                    "Compliance action failed"
                );
                false
            }
        }
    }

    /// Route one action according to its auto-execute flag and delay
    pub fn schedule(&self, mut action: ScheduledAction, now: DateTime<Utc>) -> ScheduleOutcome {
        if !action.action.auto_execute {
            return ScheduleOutcome::NeedsApproval;
        }
        if action.action.delay_secs == 0 {
            return if self.run(&action) {
                ScheduleOutcome::Executed
            } else {
                ScheduleOutcome::Failed
            };
        }
        let delay = action.action.delay_secs.min(i64::MAX as u64 / 1_000) as i64;
        action.due_at = now
            .checked_add_signed(Duration::seconds(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.pending.lock().push(action);
        ScheduleOutcome::Deferred
    }

    /// Execute every deferred action due at `now`; returns how many ran successfully
    pub fn process_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<ScheduledAction> = {
            let mut pending = self.pending.lock();
            let (due, waiting): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|a| a.due_at <= now);
            *pending = waiting;
            due
        };
        due.iter().filter(|action| self.run(action)).count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::errors::MonitoringError;
    use crate::monitoring::types::ActionType;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<ActionType>>,
    }

    impl ComplianceActionHandler for RecordingHandler {
        fn execute(&self, action: &ScheduledAction) -> Result<()> {
            if action.action.action_type == ActionType::FreezeAccount {
                return Err(MonitoringError::Configuration("freeze unavailable".into()));
            }
            self.seen.lock().push(action.action.action_type);
            Ok(())
        }
    }

    fn scheduled(action: ComplianceAction, now: DateTime<Utc>) -> ScheduledAction {
        ScheduledAction {
            rule_id: "R1".into(),
            alert_id: "COMPLIANCE_R1_T1".into(),
            transaction_id: "T1".into(),
            customer_id: "C1".into(),
            action,
            due_at: now,
        }
    }

    fn scheduler(handler: Arc<RecordingHandler>) -> ActionScheduler {
        ActionScheduler::new(handler, IntCounter::new("test_actions", "test").unwrap())
    }

    #[test]
    fn test_routing() {
        let handler = Arc::new(RecordingHandler::default());
        let s = scheduler(handler.clone());
        let now = Utc::now();

        let inline = ComplianceAction::new(ActionType::ReportSar, true);
        assert_eq!(s.schedule(scheduled(inline, now), now), ScheduleOutcome::Executed);

        let manual = ComplianceAction::new(ActionType::RequireAdditionalKyc, false);
        assert_eq!(s.schedule(scheduled(manual, now), now), ScheduleOutcome::NeedsApproval);

        let delayed = ComplianceAction::new(ActionType::Escalate, true).with_delay_secs(60);
        assert_eq!(s.schedule(scheduled(delayed, now), now), ScheduleOutcome::Deferred);

        assert_eq!(*handler.seen.lock(), vec![ActionType::ReportSar]);
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_process_due_runs_only_due_actions() {
        let handler = Arc::new(RecordingHandler::default());
        let s = scheduler(handler.clone());
        let now = Utc::now();
        for delay in [30, 120] {
            let action = ComplianceAction::new(ActionType::Escalate, true).with_delay_secs(delay);
            s.schedule(scheduled(action, now), now);
        }

        assert_eq!(s.process_due(now + Duration::seconds(60)), 1);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.process_due(now + Duration::seconds(120)), 1);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_failed_action_is_not_counted() {
        let s = scheduler(Arc::new(RecordingHandler::default()));
        let now = Utc::now();
        let freeze = ComplianceAction::new(ActionType::FreezeAccount, true);
        assert_eq!(s.schedule(scheduled(freeze, now), now), ScheduleOutcome::Failed);
        assert_eq!(s.executed.get(), 0);
    }
}
