use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use cadence_core::config::SchedulerConfig;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::{HandlerRegistry, JobHandler, Subscription};
use crate::schedule;
use crate::store::{now_ms, JobStore};
use crate::types::{
    DispatchOutcome, EventAction, Job, JobCreate, JobFilter, JobPatch, RunMode, RunReport,
    Schedule, SchedulerEvent, SchedulerStatus, TickSummary,
};

struct Inner {
    config: SchedulerConfig,
    store: JobStore,
    registry: HandlerRegistry,
    /// Shutdown switch of the running loop; `None` while stopped.
    loop_tx: Mutex<Option<watch::Sender<bool>>>,
    /// Jobs with a dispatch in flight, from a tick or a manual run.
    in_flight: Mutex<HashSet<String>>,
}

/// The scheduling engine: job store, handler registry and tick loop.
///
/// Every instance is independent. Cloning yields another handle to the same
/// engine, which is how job management and the background loop share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store: JobStore::new(),
                registry: HandlerRegistry::new(),
                loop_tx: Mutex::new(None),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    // --- job management ----------------------------------------------------

    pub fn create(&self, input: JobCreate) -> Job {
        self.inner.store.create(input)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.store.get(id)
    }

    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.inner.store.list(filter)
    }

    pub fn update(&self, id: &str, patch: JobPatch) -> Option<Job> {
        self.inner.store.update(id, patch)
    }

    pub fn pause(&self, id: &str) -> Option<Job> {
        self.inner.store.pause(id)
    }

    pub fn resume(&self, id: &str) -> Option<Job> {
        self.inner.store.resume(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.store.remove(id)
    }

    // --- subscriptions -----------------------------------------------------

    /// Register a due-job handler.
    pub fn subscribe(&self, handler: Arc<dyn JobHandler>) -> Subscription {
        self.inner.registry.subscribe(handler)
    }

    /// Job lifecycle events (added, updated, removed, started, finished).
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.store.events()
    }

    // --- schedule queries --------------------------------------------------

    /// Next occurrence of `schedule` strictly after `after_ms`.
    pub fn next_run(schedule: &Schedule, after_ms: i64) -> Option<i64> {
        schedule::resolve_next(schedule, after_ms)
    }

    /// Up to `count` upcoming occurrences of `schedule` after `after_ms`.
    pub fn preview(schedule: &Schedule, after_ms: i64, count: usize) -> Vec<i64> {
        schedule::preview(schedule, after_ms, count)
    }

    pub fn status(&self) -> SchedulerStatus {
        let (jobs, enabled_jobs, next_wake_at_ms) = self.inner.store.counts();
        SchedulerStatus {
            running: self.is_running(),
            jobs,
            enabled_jobs,
            next_wake_at_ms,
        }
    }

    // --- lifecycle ---------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.inner
            .loop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the tick loop: one scan immediately, then one per
    /// `tick_interval_ms`. No-op if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut loop_tx = self
            .inner
            .loop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if loop_tx.is_some() {
            return;
        }

        let (tx, rx) = watch::channel(false);
        *loop_tx = Some(tx);
        let period = Duration::from_millis(self.inner.config.tick_interval_ms.max(1));
        tokio::spawn(run_loop(Arc::downgrade(&self.inner), period, rx));
        let tick_interval_ms = self.inner.config.tick_interval_ms;
        info!(tick_interval_ms, "scheduler started");
    }

    /// Stop arming ticks. A tick already in flight finishes on its own.
    /// No-op if already stopped.
    pub fn stop(&self) {
        let tx = self
            .inner
            .loop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
            info!("scheduler stopped");
        }
    }

    // --- execution ---------------------------------------------------------

    /// Scan for due jobs and dispatch them, returning once every job claimed
    /// by this scan has finished.
    ///
    /// A job whose previous dispatch is still in flight is left alone (not
    /// queued) and counted as `busy`; other due jobs go ahead.
    pub async fn tick(&self) -> TickSummary {
        let due = self.inner.store.due(now_ms());
        if due.is_empty() {
            return TickSummary::default();
        }
        debug!(count = due.len(), "dispatching due jobs");

        let attempts: Vec<Attempt> = if self.inner.config.dispatch_concurrently {
            let runs: Vec<BoxFuture<'_, Attempt>> = due
                .iter()
                .map(|job| self.attempt(&job.id, RunMode::Due).boxed())
                .collect();
            join_all(runs).await
        } else {
            let mut attempts = Vec::with_capacity(due.len());
            for job in &due {
                attempts.push(self.attempt(&job.id, RunMode::Due).await);
            }
            attempts
        };

        let mut summary = TickSummary::default();
        for attempt in attempts {
            match attempt {
                Attempt::Ran(outcome) => {
                    summary.dispatched += 1;
                    if outcome.any_failed {
                        summary.failed += 1;
                    }
                }
                Attempt::Busy => summary.busy += 1,
                Attempt::Skipped => {}
            }
        }
        summary
    }

    /// Run one job outside the timer. `None` for an unknown id.
    ///
    /// [`RunMode::Due`] only dispatches a job that a tick would pick up now;
    /// [`RunMode::Force`] dispatches it regardless. The outcome is recorded
    /// exactly as for a tick. A job that is already running is not started
    /// a second time.
    pub async fn run_job(&self, id: &str, mode: RunMode) -> Option<RunReport> {
        self.inner.store.get(id)?;
        let report = match self.attempt(id, mode).await {
            Attempt::Ran(outcome) => RunReport {
                ran: true,
                outcome: Some(outcome),
            },
            Attempt::Busy => {
                debug!(job_id = %id, "job already running, manual run skipped");
                RunReport {
                    ran: false,
                    outcome: None,
                }
            }
            Attempt::Skipped => RunReport {
                ran: false,
                outcome: None,
            },
        };
        Some(report)
    }

    /// Claim `id`, re-read it and dispatch it if `mode` allows. The re-read
    /// keeps a stale scan from running a job another scan already finished.
    async fn attempt(&self, id: &str, mode: RunMode) -> Attempt {
        let Some(_claim) = InFlight::claim(&self.inner.in_flight, id) else {
            return Attempt::Busy;
        };
        let Some(job) = self.inner.store.get(id) else {
            return Attempt::Skipped;
        };
        let is_due = job.enabled && job.state.next_run_at_ms.is_some_and(|t| t <= now_ms());
        if mode == RunMode::Due && !is_due {
            return Attempt::Skipped;
        }
        Attempt::Ran(self.execute(&job).await)
    }

    /// Dispatch one job and fold the outcome into the store.
    async fn execute(&self, job: &Job) -> DispatchOutcome {
        let store = &self.inner.store;
        store.emit(SchedulerEvent::new(job, EventAction::Started));

        let started = Instant::now();
        let outcome = self.inner.registry.dispatch(job).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let completed_at = now_ms();

        match store.record_run(&job.id, &outcome, completed_at, duration_ms) {
            Some(updated) => {
                debug!(
                    job_id = %job.id,
                    name = %job.name,
                    status = %outcome.status(),
                    duration_ms,
                    next_run_at_ms = updated.state.next_run_at_ms,
                    "job finished"
                );
                let mut event = SchedulerEvent::new(&updated, EventAction::Finished);
                event.status = Some(outcome.status());
                event.error = outcome.last_error.clone();
                store.emit(event);
            }
            None => debug!(job_id = %job.id, "job removed during dispatch"),
        }
        outcome
    }
}

enum Attempt {
    Ran(DispatchOutcome),
    /// A dispatch of the same job is still in flight.
    Busy,
    /// Unknown, removed, or no longer due.
    Skipped,
}

/// Claim on one job id in the in-flight set, released on drop.
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn claim(ids: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let claimed = ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        claimed.then(|| Self {
            ids,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Background loop. Exits on shutdown or once every [`Scheduler`] handle is
/// gone. The first interval tick completes immediately, which gives the
/// scan-on-start.
///
/// Each scan runs on its own task, so a handler that never returns holds up
/// only its own job while the timer keeps firing and shutdown stays prompt.
async fn run_loop(inner: Weak<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let scheduler = Scheduler { inner };
                tokio::spawn(async move {
                    let summary = scheduler.tick().await;
                    if summary.dispatched > 0 || summary.busy > 0 {
                        debug!(
                            dispatched = summary.dispatched,
                            failed = summary.failed,
                            busy = summary.busy,
                            "tick complete"
                        );
                    }
                });
            }
        }
    }
    debug!("scheduler loop exited");
}
