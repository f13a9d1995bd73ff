//! Persistence degrades to warnings and counters, never to errors

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use txn_risk_monitor::monitoring::{
    MonitoringConfig, MonitoringError, Money, PersistenceGateway, Result, TransactionEvent,
    TransactionMonitoringEngine,
};

fn tx(id: &str, amount: i64) -> TransactionEvent {
    TransactionEvent::new(id, "CUST-P", Money::new(Decimal::from(amount), "USD"), Utc::now())
        .with_countries("US", "GB")
}

struct FailingStore;

impl PersistenceGateway for FailingStore {
    fn put(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(MonitoringError::Persistence("disk unavailable".to_string()))
    }

    fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Err(MonitoringError::Persistence("disk unavailable".to_string()))
    }

    fn iterate(&self, _prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(Vec::new())
    }
}

/// Blocks every write until the test opens the gate
struct GatedStore {
    gate: Mutex<()>,
}

impl PersistenceGateway for GatedStore {
    fn put(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        let _open = self.gate.lock().map_err(|e| MonitoringError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn iterate(&self, _prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(Vec::new())
    }
}

#[test]
fn failing_store_never_fails_evaluation() {
    let engine =
        TransactionMonitoringEngine::new(MonitoringConfig::default(), Arc::new(FailingStore))
            .unwrap();

    let result = engine.monitor_transaction(&tx("T-1", 60_000)).unwrap();
    assert_eq!(result.alerts.len(), 2);
    engine.flush_persistence().unwrap();

    // result + two alerts
    let text = engine.export_metrics().unwrap();
    assert!(text.contains("risk_persistence_failures_total 3\n"), "{}", text);
    assert!(engine.load_result("T-1").is_err());
}

#[test]
fn full_queue_is_reported_as_warnings() {
    let store = Arc::new(GatedStore {
        gate: Mutex::new(()),
    });
    let mut config = MonitoringConfig::default();
    config.persistence.queue_capacity = 1;
    let engine = TransactionMonitoringEngine::new(config, store.clone()).unwrap();

    let held = store.gate.lock().unwrap();
    let results: Vec<_> = (0..5)
        .map(|i| engine.monitor_transaction(&tx(&format!("T-{}", i), 60_000)).unwrap())
        .collect();
    drop(held);

    assert!(results.iter().any(|r| !r.warnings.is_empty()));
    let warning = results
        .iter()
        .flat_map(|r| r.warnings.iter())
        .next()
        .unwrap();
    assert!(warning.contains("persistence queue is full"), "{}", warning);
    engine.flush_persistence().unwrap();
}
