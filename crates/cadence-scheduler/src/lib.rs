//! `cadence-scheduler` — in-memory job scheduling engine on Tokio.
//!
//! # Overview
//!
//! A [`Scheduler`] owns a [`store::JobStore`] of named jobs and a
//! [`registry::HandlerRegistry`] of subscribers. Its tick loop wakes every
//! `tick_interval_ms` (and once immediately on start), hands every due job
//! to each handler, then records the outcome and computes the next run.
//!
//! # Schedule variants
//!
//! | Variant | Behaviour                                                   |
//! |---------|-------------------------------------------------------------|
//! | `At`    | Single fire at an ISO-8601 instant; disabled afterwards     |
//! | `Every` | Repeat every N ms, optionally snapped to an anchor grid     |
//! | `Cron`  | 5-field cron expression evaluated in UTC, minute resolution |
//!
//! Invalid schedules never raise: they have no next occurrence, so the job
//! simply never becomes due.

pub mod cron;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::Scheduler;
pub use error::{CronParseError, HandlerError};
pub use registry::{handler_fn, HandlerRegistry, JobHandler, Subscription};
pub use schedule::{parse_timestamp, preview, resolve_next};
pub use types::{
    DispatchOutcome, EventAction, Job, JobCreate, JobFilter, JobPatch, JobState, JobStatus,
    RunMode, RunReport, Schedule, SchedulerEvent, SchedulerStatus, TickSummary,
};
