//! Persistence gateway boundary and the background writer that feeds it
//!
//! The evaluation path never touches the gateway directly: records are queued
//! onto a bounded channel drained by a dedicated writer thread, and a failed
//! write is logged and counted, never returned to the caller.

use parking_lot::{Mutex, RwLock};
use prometheus::IntCounter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::monitoring::errors::{MonitoringError, Result};

pub const RESULT_KEY_PREFIX: &str = "monitoring_result:";
pub const ALERT_KEY_PREFIX: &str = "alert:";
pub const METRICS_KEY: &str = "transaction_metrics:latest";

pub fn result_key(transaction_id: &str) -> Vec<u8> {
    format!("{}{}", RESULT_KEY_PREFIX, transaction_id).into_bytes()
}

pub fn alert_key(alert_id: &str) -> Vec<u8> {
    format!("{}{}", ALERT_KEY_PREFIX, alert_id).into_bytes()
}

/// Durable key-value store consumed by the engine
pub trait PersistenceGateway: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory gateway
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PersistenceGateway for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

enum Job {
    Put { key: Vec<u8>, value: Vec<u8> },
    Flush(mpsc::Sender<()>),
}

/// Fire-and-forget writer thread in front of a gateway
pub struct PersistenceWriter {
    sender: Mutex<Option<SyncSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceWriter {
    pub fn spawn(
        gateway: Arc<dyn PersistenceGateway>,
        queue_capacity: usize,
        failures: IntCounter,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("risk-persistence".to_string())
            .spawn(move || {
                for job in receiver {
                    match job {
                        Job::Put { key, value } => {
                            if let Err(e) = gateway.put(&key, &value) {
                                warn!(
                                    key = %String::from_utf8_lossy(&key),
                                    error = %e,
                                    "Persistence write failed"
                                );
                                failures.inc();
                            }
                        }
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                debug!("Persistence writer stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a raw write without waiting
    pub fn submit(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| MonitoringError::Persistence("writer is shut down".to_string()))?;
        match sender.try_send(Job::Put { key, value }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(MonitoringError::Persistence(
                "persistence queue is full".to_string(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(MonitoringError::Persistence(
                "persistence writer has stopped".to_string(),
            )),
        }
    }

    /// Serialize a record as JSON and queue it
    pub fn submit_record<T: Serialize>(&self, key: Vec<u8>, record: &T) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.submit(key, value)
    }

    /// Block until every write queued before this call has been attempted
    pub fn flush(&self) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| MonitoringError::Persistence("writer is shut down".to_string()))?;
        let (ack, done) = mpsc::channel();
        sender
            .send(Job::Flush(ack))
            .map_err(|_| MonitoringError::Persistence("persistence writer has stopped".to_string()))?;
        done.recv()
            .map_err(|_| MonitoringError::Persistence("persistence writer has stopped".to_string()))
    }

    /// Close the queue and wait for pending writes
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Persistence writer panicked");
            }
        }
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
