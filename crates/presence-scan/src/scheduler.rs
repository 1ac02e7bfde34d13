//! Scan scheduling engine.
//!
//! One loop drives the whole scanner: start a cycle, wait until `period` has
//! passed since that cycle started, repeat. Cycles run as tokio tasks and a
//! semaphore bounds how many are in flight; with one permit a slow cycle
//! simply delays its successor, which then starts without sleeping.
//!
//! Cancellation stops the loop from starting new cycles. Cycles already in
//! flight always run to completion, so a store write is never cut short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use presence_core::timestamp;
use presence_store::{ApplyOutcome, SessionStore};

use crate::error::{Result, ScanError};
use crate::prober::Prober;

/// Timing and concurrency knobs for a scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Minimum time between the starts of consecutive cycles.
    pub period: Duration,
    pub max_concurrent_cycles: usize,
    /// A probe running longer than this fails its cycle.
    pub probe_timeout: Option<Duration>,
}

impl SchedulerOptions {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            max_concurrent_cycles: 1,
            probe_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Starting cycles, or finishing in-flight ones after cancellation.
    Running,
    /// Cancelled and drained; no further cycles will start.
    Stopping,
}

/// Cycle counts for one `run`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
}

impl RunReport {
    fn record(&mut self, joined: std::result::Result<bool, tokio::task::JoinError>) {
        match joined {
            Ok(true) => self.cycles_succeeded += 1,
            Ok(false) => self.cycles_failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "Scan cycle task panicked");
                self.cycles_failed += 1;
            }
        }
    }
}

/// Periodically probes one address range and folds each snapshot into the store.
pub struct ScanScheduler<P> {
    prober: Arc<P>,
    store: SessionStore,
    target: String,
    options: SchedulerOptions,
    concurrency: Arc<Semaphore>,
    cancel: CancellationToken,
    stopping: AtomicBool,
}

impl<P: Prober + 'static> ScanScheduler<P> {
    pub fn new(
        prober: Arc<P>,
        store: SessionStore,
        target: impl Into<String>,
        options: SchedulerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(options.max_concurrent_cycles.max(1)));
        Self {
            prober,
            store,
            target: target.into(),
            options,
            concurrency,
            cancel,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.stopping.load(Ordering::SeqCst) {
            SchedulerState::Stopping
        } else {
            SchedulerState::Running
        }
    }

    /// Run cycles until the cancellation token fires, then drain.
    ///
    /// Cycle failures are logged and counted, never returned.
    pub async fn run(&self) -> Result<RunReport> {
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut report = RunReport::default();

        tracing::info!(
            target = %self.target,
            period_secs = self.options.period.as_secs_f64(),
            max_concurrent = self.options.max_concurrent_cycles,
            "Scheduler started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                report.record(joined);
            }

            // Waiting for a permit is how an overlong cycle delays its successor.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.concurrency.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let cycle_start = Instant::now();
            report.cycles_started += 1;

            let prober = self.prober.clone();
            let store = self.store.clone();
            let target = self.target.clone();
            let probe_timeout = self.options.probe_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                let cycle_id = Uuid::new_v4();
                match run_cycle(prober.as_ref(), &store, &target, probe_timeout).await {
                    Ok(outcome) => {
                        tracing::info!(
                            cycle_id = %cycle_id,
                            target = %target,
                            opened = outcome.opened,
                            closed = outcome.closed,
                            continued = outcome.continued,
                            new_devices = outcome.new_devices,
                            "Scan cycle complete"
                        );
                        true
                    }
                    Err(e) => {
                        tracing::error!(cycle_id = %cycle_id, target = %target, error = %e, "Scan cycle failed");
                        false
                    }
                }
            });

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(cycle_start + self.options.period) => {}
            }
        }

        tracing::info!(in_flight = tasks.len(), "Cancellation received, finishing in-flight cycles");

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }
        self.stopping.store(true, Ordering::SeqCst);

        tracing::info!(
            started = report.cycles_started,
            succeeded = report.cycles_succeeded,
            failed = report.cycles_failed,
            "Scheduler stopped"
        );
        Ok(report)
    }
}

/// Execute a single cycle: probe → snapshot → apply.
///
/// The store write runs on the blocking pool; the store's own lock keeps
/// overlapping cycles from interleaving their read-modify-write.
pub async fn run_cycle<P: Prober>(
    prober: &P,
    store: &SessionStore,
    target: &str,
    probe_timeout: Option<Duration>,
) -> Result<ApplyOutcome> {
    let probe = prober.probe(target);
    let snapshot = match probe_timeout {
        Some(limit) => timeout(limit, probe)
            .await
            .map_err(|_| ScanError::ProbeTimeout {
                target: target.to_string(),
                timeout_secs: limit.as_secs(),
            })??,
        None => probe.await?,
    };

    let now = timestamp::now();
    let store = store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.apply(&snapshot, now)).await??;
    Ok(outcome)
}
