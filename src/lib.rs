// src/lib.rs
//! Transaction risk monitoring engine
//! Pattern, velocity, geographic and compliance checks with alert dispatch.
pub mod monitoring;

pub use monitoring::{
    Alert, MonitoringConfig, MonitoringError, MonitoringResult, TransactionEvent,
    TransactionMonitoringEngine,
};
