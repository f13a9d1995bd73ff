//! Real-time transaction risk monitoring
//!
//! Every incoming transaction runs through pattern matching, compliance rules,
//! velocity and geographic checks. The resulting alerts are scored into a
//! disposition, fanned out to subscriber channels and persisted.
//!
//! ## Features
//! - Hot-swappable pattern and compliance rule registry
//! - Sharded per-customer activity windows (daily/hourly velocity, recent countries)
//! - Non-blocking alert fan-out with a lifecycle state machine
//! - Deferred compliance actions and escalation of stale severe alerts
//! - Prometheus metrics and a rolling hourly breakdown
//! - Background persistence that never fails the evaluation path

pub mod actions;
pub mod activity;
pub mod alert;
pub mod conditions;
pub mod config;
pub mod defaults;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod scoring;
pub mod storage;
pub mod types;

pub use actions::{ComplianceActionHandler, LoggingActionHandler, ScheduledAction};
pub use activity::{ActivityTracker, VelocitySnapshot};
pub use alert::Alert;
pub use conditions::{Operator, PatternCondition, RuleCondition, ValueType};
pub use config::MonitoringConfig;
pub use dispatcher::{DispatchReport, Escalation, EscalationReason};
pub use engine::{MonitoringResult, TransactionMonitoringEngine};
pub use errors::{MonitoringError, Result};
pub use metrics::{HourlyMetric, TransactionMetrics};
pub use registry::{ComplianceAction, ComplianceRule, MonitoringPattern, PatternThreshold};
pub use scoring::RiskAssessment;
pub use storage::{MemoryStore, PersistenceGateway};
pub use types::{
    ActionType, AlertStatus, AlertType, ComplianceType, Disposition, EntityType, Money,
    PatternCategory, Severity, TransactionEvent,
};
