//! Background workers: health polling, collection, scheduled aggregation and
//! retention.
//!
//! Every worker is its own task driven by a shared [`ShutdownSignal`]. A
//! fatal error in any of them (a poisoned lock) trips the signal for the
//! whole process instead of letting the other loops carry on over corrupt
//! state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::aggregation::ReportWindow;
use crate::app_state::AppState;
use crate::audit_adapters::PayloadDecoder;
use crate::collector::Collector;
use crate::config_loader::MAX_INTERVAL_SECS;
use crate::errors::AuditResult;
use crate::health_poller::HealthPoller;
use crate::retention::{RetentionManager, RetentionRules};

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    fatal: Arc<AtomicBool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            fatal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn trigger_fatal(&self, reason: &str) {
        tracing::error!(reason, "fatal error, shutting down");
        self.fatal.store(true, Ordering::SeqCst);
        self.trigger();
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Runs `task` every `period`, first one period after spawn. Missed ticks are
/// skipped so a slow pass never causes a burst of catch-up passes. The period
/// is clamped to between one millisecond and the longest configurable interval.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: ShutdownSignal,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = AuditResult<()>> + Send + 'static,
{
    let period = period.clamp(
        Duration::from_millis(1),
        Duration::from_secs(MAX_INTERVAL_SECS),
    );
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(worker = name, period_secs = period.as_secs_f64(), "background worker started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = task().await {
                if e.is_fatal() {
                    shutdown.trigger_fatal(&format!("{name}: {e}"));
                    break;
                }
                tracing::warn!(worker = name, error = %e, "background pass failed");
            }
        }
        tracing::debug!(worker = name, "background worker stopped");
    })
}

pub struct BackgroundWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundWorkers {
    /// Starts the four loops against the shared state.
    pub fn start(state: Arc<AppState>, shutdown: ShutdownSignal) -> AuditResult<Self> {
        let config = &state.config;

        let poller = Arc::new(HealthPoller::new(
            state.registry.clone(),
            state.store.clone(),
            config.health_check_timeout(),
        )?);
        let collector = Arc::new(Collector::new(
            state.registry.clone(),
            state.store.clone(),
            config.collection_timeout(),
            PayloadDecoder::default(),
        )?);
        let retention = Arc::new(RetentionManager::new(
            state.store.clone(),
            RetentionRules::with_standard_retention_days(i64::from(config.retention_days)),
        ));

        let mut handles = Vec::with_capacity(4);

        handles.push(spawn_periodic(
            "health_poller",
            config.health_check_interval(),
            shutdown.clone(),
            move || {
                let poller = Arc::clone(&poller);
                async move {
                    let outcomes = poller.poll_once().await?;
                    tracing::debug!(checked = outcomes.len(), "health poll complete");
                    Ok(())
                }
            },
        ));

        handles.push(spawn_periodic(
            "collector",
            config.collection_interval(),
            shutdown.clone(),
            move || {
                let collector = Arc::clone(&collector);
                async move {
                    let outcomes = collector.collect_once().await?;
                    let collected: usize = outcomes.iter().map(|o| o.collected).sum();
                    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
                    tracing::debug!(services = outcomes.len(), collected, failed, "collection pass complete");
                    Ok(())
                }
            },
        ));

        let report_state = state.clone();
        handles.push(spawn_periodic(
            "aggregation",
            config.aggregation_interval(),
            shutdown.clone(),
            move || {
                let state = Arc::clone(&report_state);
                async move { run_scheduled_report(&state) }
            },
        ));

        handles.push(spawn_periodic(
            "retention",
            config.retention_interval(),
            shutdown,
            move || {
                let retention = Arc::clone(&retention);
                async move { retention.run_once().map(|_| ()) }
            },
        ));

        Ok(Self { handles })
    }

    /// Waits for every loop to observe shutdown and exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "background worker panicked");
            }
        }
    }
}

/// Hourly report appended to the rolling history.
pub fn run_scheduled_report(state: &AppState) -> AuditResult<()> {
    let report = state.engine.generate_report(ReportWindow::Hourly)?;
    tracing::info!(
        report_id = %report.report_id,
        total_events = report.total_events,
        compliance_score = report.compliance_score,
        "scheduled aggregation report stored"
    );
    state.reports.push(report)
}
