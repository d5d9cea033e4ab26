use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once, at or after the given ISO-8601 instant.
    At { timestamp: String },

    /// Run repeatedly every `interval_ms`. With an anchor, occurrences snap to
    /// the grid `anchor_ms + k * interval_ms` instead of drifting.
    Every {
        #[serde(rename = "intervalMs")]
        interval_ms: i64,
        #[serde(rename = "anchorMs", default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },

    /// Run according to a 5-field cron expression evaluated in UTC.
    Cron { expression: String },
}

impl Schedule {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Run bookkeeping, owned by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub run_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Wall-clock length of the last dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    /// Present iff the job is enabled and has a future occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
}

/// A scheduled job. Callers only ever hold snapshots of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// UUID v4 string, immutable.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub schedule: Schedule,
    /// Opaque to the engine; forwarded verbatim to handlers.
    pub payload: serde_json::Value,
    pub state: JobState,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    pub name: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub schedule: Schedule,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl JobCreate {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            group_id: None,
            description: None,
            enabled: true,
            schedule,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Re-creation input for a job, dropping identity and run state. Used to
/// restore a snapshot through the normal create path.
impl From<Job> for JobCreate {
    fn from(job: Job) -> Self {
        Self {
            name: job.name,
            group_id: job.group_id,
            description: job.description,
            enabled: job.enabled,
            schedule: job.schedule,
            payload: job.payload,
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub schedule: Option<Schedule>,
    pub enabled: Option<bool>,
}

/// Criteria for [`crate::store::JobStore::list`]; empty matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub group_id: Option<String>,
    pub enabled: Option<bool>,
}

impl JobFilter {
    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            enabled: None,
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            group_id: None,
            enabled: Some(enabled),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.group_id
            .as_deref()
            .is_none_or(|g| job.group_id.as_deref() == Some(g))
            && self.enabled.is_none_or(|e| job.enabled == e)
    }
}

/// How a manual run decides whether to dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Dispatch only if the job is enabled and due.
    #[default]
    Due,
    /// Dispatch regardless of schedule and enabled flag.
    Force,
}

/// Aggregated result of running every handler once for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub any_failed: bool,
    /// Message of the last failing handler in registration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DispatchOutcome {
    pub fn status(&self) -> JobStatus {
        if self.any_failed {
            JobStatus::Error
        } else {
            JobStatus::Ok
        }
    }
}

/// Result of [`crate::engine::Scheduler::run_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// False when the job was not due or was already running.
    pub ran: bool,
    pub outcome: Option<DispatchOutcome>,
}

/// Summary of a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: usize,
    pub failed: usize,
    /// Due jobs left alone because their previous dispatch is still running.
    pub busy: usize,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: usize,
    pub enabled_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_wake_at_ms: Option<i64>,
}

/// Job lifecycle notifications broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerEvent {
    pub job_id: String,
    pub action: EventAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchedulerEvent {
    pub(crate) fn new(job: &Job, action: EventAction) -> Self {
        Self {
            job_id: job.id.clone(),
            action,
            next_run_at_ms: job.state.next_run_at_ms,
            status: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Added,
    Updated,
    Removed,
    Started,
    Finished,
}
