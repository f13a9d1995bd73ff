//! Background scheduler
//!
//! Four independent loops share one `watch` stop signal: pattern bookkeeping,
//! deferred compliance actions, metrics aggregation and alert processing. Each
//! loop checks the signal at every tick boundary.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::monitoring::config::SchedulerConfig;
use crate::monitoring::errors::{MonitoringError, Result};

/// Periodic work driven by the scheduler
pub trait SweepTarget: Send + Sync + 'static {
    /// Prune stateful pattern bookkeeping
    fn pattern_sweep(&self, now: DateTime<Utc>);

    /// Run deferred compliance actions that are due
    fn compliance_sweep(&self, now: DateTime<Utc>);

    /// Roll up metrics and evict idle tracker state
    fn metrics_sweep(&self, now: DateTime<Utc>);

    /// Expire alerts and drain escalations
    fn alert_sweep(&self, now: DateTime<Utc>);
}

struct Running {
    stop: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct BackgroundScheduler {
    config: SchedulerConfig,
    running: Mutex<Option<Running>>,
}

impl BackgroundScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the four loops on the ambient tokio runtime
    pub fn start(&self, target: Arc<dyn SweepTarget>) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(MonitoringError::AlreadyRunning);
        }
        let runtime = Handle::try_current().map_err(|_| MonitoringError::NoRuntime)?;
        let (stop, stop_rx) = watch::channel(false);

        let handles = vec![
            (
                "pattern",
                runtime.spawn(run_interval(
                    "pattern",
                    self.config.pattern_interval(),
                    stop_rx.clone(),
                    Arc::clone(&target),
                    |t, now| t.pattern_sweep(now),
                )),
            ),
            (
                "compliance",
                runtime.spawn(run_interval(
                    "compliance",
                    self.config.compliance_interval(),
                    stop_rx.clone(),
                    Arc::clone(&target),
                    |t, now| t.compliance_sweep(now),
                )),
            ),
            (
                "metrics",
                runtime.spawn(run_interval(
                    "metrics",
                    self.config.metrics_interval(),
                    stop_rx.clone(),
                    Arc::clone(&target),
                    |t, now| t.metrics_sweep(now),
                )),
            ),
            (
                "alert",
                runtime.spawn(run_polling(self.config.alert_poll(), stop_rx, target)),
            ),
        ];

        *running = Some(Running { stop, handles });
        info!(
            pattern_ms = self.config.pattern_interval_ms,
            compliance_ms = self.config.compliance_interval_ms,
            metrics_ms = self.config.metrics_interval_ms,
            alert_poll_ms = self.config.alert_poll_ms,
            "Background monitoring started"
        );
        Ok(())
    }

    /// Broadcast the stop signal and wait for every loop to exit
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .take()
            .ok_or(MonitoringError::NotRunning)?;
        let _ = running.stop.send(true);
        for (name, handle) in running.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background loop ended abnormally");
            }
        }
        info!("Background monitoring stopped");
        Ok(())
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.stop.send(true);
        }
    }
}

async fn run_interval<F>(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    target: Arc<dyn SweepTarget>,
    sweep: F,
) where
    F: Fn(&dyn SweepTarget, DateTime<Utc>) + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => sweep(target.as_ref(), Utc::now()),
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!(task = name, "Background loop stopped");
}

async fn run_polling(
    poll: Duration,
    mut stop: watch::Receiver<bool>,
    target: Arc<dyn SweepTarget>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll) => target.alert_sweep(Utc::now()),
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!(task = "alert", "Background loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        pattern: AtomicUsize,
        compliance: AtomicUsize,
        metrics: AtomicUsize,
        alert: AtomicUsize,
    }

    impl SweepTarget for CountingTarget {
        fn pattern_sweep(&self, _now: DateTime<Utc>) {
            self.pattern.fetch_add(1, Ordering::SeqCst);
        }

        fn compliance_sweep(&self, _now: DateTime<Utc>) {
            self.compliance.fetch_add(1, Ordering::SeqCst);
        }

        fn metrics_sweep(&self, _now: DateTime<Utc>) {
            self.metrics.fetch_add(1, Ordering::SeqCst);
        }

        fn alert_sweep(&self, _now: DateTime<Utc>) {
            self.alert.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> SchedulerConfig {
        SchedulerConfig {
            pattern_interval_ms: 5,
            compliance_interval_ms: 5,
            metrics_interval_ms: 5,
            alert_poll_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_loops_tick_until_stopped() {
        let scheduler = BackgroundScheduler::new(fast());
        let target = Arc::new(CountingTarget::default());
        scheduler.start(target.clone()).unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());

        assert!(target.pattern.load(Ordering::SeqCst) > 0);
        assert!(target.compliance.load(Ordering::SeqCst) > 0);
        assert!(target.metrics.load(Ordering::SeqCst) > 0);
        assert!(target.alert.load(Ordering::SeqCst) > 0);

        let settled = target.alert.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(target.alert.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_guarded() {
        let scheduler = BackgroundScheduler::new(fast());
        let target = Arc::new(CountingTarget::default());

        assert!(matches!(scheduler.stop().await, Err(MonitoringError::NotRunning)));
        scheduler.start(target.clone()).unwrap();
        assert!(matches!(
            scheduler.start(target.clone()),
            Err(MonitoringError::AlreadyRunning)
        ));
        scheduler.stop().await.unwrap();

        scheduler.start(target).unwrap();
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_long_intervals() {
        let scheduler = BackgroundScheduler::new(SchedulerConfig::default());
        scheduler.start(Arc::new(CountingTarget::default())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), scheduler.stop())
            .await
            .expect("stop should not wait for the next tick")
            .unwrap();
    }

    #[test]
    fn test_start_without_runtime() {
        let scheduler = BackgroundScheduler::new(fast());
        assert!(matches!(
            scheduler.start(Arc::new(CountingTarget::default())),
            Err(MonitoringError::NoRuntime)
        ));
        assert!(!scheduler.is_running());
    }
}
