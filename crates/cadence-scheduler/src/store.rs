use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::schedule::resolve_next;
use crate::types::{
    DispatchOutcome, EventAction, Job, JobCreate, JobFilter, JobPatch, JobState, SchedulerEvent,
};

const EVENT_CAPACITY: usize = 256;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Canonical in-memory job collection.
///
/// Jobs are kept in creation order. Every read returns owned clones, so
/// callers can never observe or alter the stored records in place.
pub struct JobStore {
    jobs: RwLock<Vec<Job>>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to job lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new job. `next_run_at_ms` is only computed for enabled jobs.
    pub fn create(&self, input: JobCreate) -> Job {
        let now = now_ms();
        let next_run_at_ms = if input.enabled {
            resolve_next(&input.schedule, now)
        } else {
            None
        };

        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            group_id: input.group_id,
            description: input.description,
            enabled: input.enabled,
            schedule: input.schedule,
            payload: input.payload,
            state: JobState {
                next_run_at_ms,
                ..JobState::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
        };

        self.write().push(job.clone());
        info!(job_id = %job.id, name = %job.name, next_run_at_ms, "job added");
        self.emit(SchedulerEvent::new(&job, EventAction::Added));
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().iter().find(|j| j.id == id).cloned()
    }

    /// Jobs matching `filter`, in creation order.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.read()
            .iter()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Apply `patch`. Returns `None` if the id is unknown.
    ///
    /// `next_run_at_ms` is recomputed from now when the schedule changes or
    /// the job becomes enabled, and cleared whenever the job ends up disabled.
    pub fn update(&self, id: &str, patch: JobPatch) -> Option<Job> {
        let now = now_ms();
        let job = self.modify(id, |job| {
            let was_enabled = job.enabled;
            let schedule_changed = patch.schedule.is_some();

            if let Some(name) = patch.name {
                job.name = name;
            }
            if let Some(description) = patch.description {
                job.description = Some(description);
            }
            if let Some(payload) = patch.payload {
                job.payload = payload;
            }
            if let Some(schedule) = patch.schedule {
                job.schedule = schedule;
            }
            if let Some(enabled) = patch.enabled {
                job.enabled = enabled;
            }

            if !job.enabled {
                job.state.next_run_at_ms = None;
            } else if schedule_changed || !was_enabled {
                job.state.next_run_at_ms = resolve_next(&job.schedule, now);
            }
            job.updated_at_ms = now;
        })?;

        info!(job_id = %id, enabled = job.enabled, next_run_at_ms = job.state.next_run_at_ms, "job updated");
        self.emit(SchedulerEvent::new(&job, EventAction::Updated));
        Some(job)
    }

    /// Disable a job and clear its next run. `None` for an unknown id.
    pub fn pause(&self, id: &str) -> Option<Job> {
        let now = now_ms();
        let job = self.modify(id, |job| {
            job.enabled = false;
            job.state.next_run_at_ms = None;
            job.updated_at_ms = now;
        })?;

        info!(job_id = %id, "job paused");
        self.emit(SchedulerEvent::new(&job, EventAction::Updated));
        Some(job)
    }

    /// Enable a job, computing its next run from now rather than from when
    /// it was created. `None` for an unknown id.
    pub fn resume(&self, id: &str) -> Option<Job> {
        let now = now_ms();
        let job = self.modify(id, |job| {
            job.enabled = true;
            job.state.next_run_at_ms = resolve_next(&job.schedule, now);
            job.updated_at_ms = now;
        })?;

        info!(job_id = %id, next_run_at_ms = job.state.next_run_at_ms, "job resumed");
        self.emit(SchedulerEvent::new(&job, EventAction::Updated));
        Some(job)
    }

    /// Delete a job. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut jobs = self.write();
            jobs.iter()
                .position(|j| j.id == id)
                .map(|idx| jobs.remove(idx))
        };

        match removed {
            Some(job) => {
                info!(job_id = %id, "job removed");
                let mut event = SchedulerEvent::new(&job, EventAction::Removed);
                event.next_run_at_ms = None;
                self.emit(event);
                true
            }
            None => false,
        }
    }

    /// Enabled jobs whose next run is at or before `now`, ordered by due time
    /// with ties kept in creation order.
    pub(crate) fn due(&self, now: i64) -> Vec<Job> {
        let mut due: Vec<Job> = self
            .read()
            .iter()
            .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        // Stable sort keeps creation order among equal due times.
        due.sort_by_key(|j| j.state.next_run_at_ms);
        due
    }

    /// Fold a finished dispatch into the job's state.
    ///
    /// One-shot jobs are disabled whatever the outcome. Recurring jobs get a
    /// next run computed from `completed_at_ms`. Returns `None` if the job
    /// was removed while its handlers ran.
    pub(crate) fn record_run(
        &self,
        id: &str,
        outcome: &DispatchOutcome,
        completed_at_ms: i64,
        duration_ms: u64,
    ) -> Option<Job> {
        self.modify(id, |job| {
            let state = &mut job.state;
            state.run_count = state.run_count.saturating_add(1);
            state.last_run_at_ms = Some(completed_at_ms);
            state.last_status = Some(outcome.status());
            state.last_error = outcome.last_error.clone().filter(|_| outcome.any_failed);
            state.last_duration_ms = Some(duration_ms);

            if job.schedule.is_one_shot() {
                job.enabled = false;
                job.updated_at_ms = completed_at_ms;
            }
            job.state.next_run_at_ms = if job.enabled {
                resolve_next(&job.schedule, completed_at_ms)
            } else {
                None
            };
        })
    }

    /// `(total, enabled, earliest next run among enabled jobs)`.
    pub(crate) fn counts(&self) -> (usize, usize, Option<i64>) {
        let jobs = self.read();
        let enabled = jobs.iter().filter(|j| j.enabled).count();
        let next_wake = jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min();
        (jobs.len(), enabled, next_wake)
    }

    /// Mutate one job under the write lock and return a clone of the result.
    fn modify(&self, id: &str, f: impl FnOnce(&mut Job)) -> Option<Job> {
        let mut jobs = self.write();
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        f(job);
        Some(job.clone())
    }
}
