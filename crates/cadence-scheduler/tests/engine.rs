// End-to-end behaviour of the tick engine: lifecycle, dispatch isolation and
// run bookkeeping against the real Tokio timer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::SchedulerConfig;
use cadence_scheduler::{
    handler_fn, EventAction, HandlerError, Job, JobCreate, JobHandler, JobStatus, RunMode,
    Schedule, Scheduler,
};
use chrono::{SecondsFormat, Utc};
use tokio::sync::{mpsc, Notify};

fn scheduler(tick_interval_ms: u64) -> Scheduler {
    Scheduler::new(SchedulerConfig::default().with_tick_interval_ms(tick_interval_ms))
}

fn at_in(ms: i64) -> Schedule {
    let ts = Utc::now() + chrono::Duration::milliseconds(ms);
    Schedule::At {
        timestamp: ts.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

fn every(interval_ms: i64) -> Schedule {
    Schedule::Every {
        interval_ms,
        anchor_ms: None,
    }
}

/// Handler that counts calls and forwards each job it sees.
fn counting(count: &Arc<AtomicUsize>) -> (Arc<dyn JobHandler>, mpsc::UnboundedReceiver<Job>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let count = Arc::clone(count);
    let handler = handler_fn(move |job: Job| {
        let count = Arc::clone(&count);
        let tx = tx.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(job);
            Ok::<(), HandlerError>(())
        }
    });
    (handler, rx)
}

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Job>, ms: u64) -> Option<Job> {
    tokio::time::timeout(Duration::from_millis(ms), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn start_scans_immediately() {
    let engine = scheduler(60_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, mut rx) = counting(&count);
    engine.subscribe(handler);

    let job = engine.create(JobCreate::new("soon", at_in(20)));
    tokio::time::sleep(Duration::from_millis(40)).await;

    engine.start();
    let fired = recv_within(&mut rx, 1_000).await.expect("job fired on start");
    assert_eq!(fired.id, job.id);
    engine.stop();
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let engine = scheduler(10_000);
    assert!(!engine.is_running());

    engine.stop();
    assert!(!engine.is_running());

    engine.start();
    engine.start();
    assert!(engine.is_running());
    assert!(engine.status().running);

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
}

#[tokio::test]
async fn restart_performs_fresh_scan() {
    let engine = scheduler(60_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, mut rx) = counting(&count);
    engine.subscribe(handler);

    engine.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.stop();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    engine.create(JobCreate::new("later", at_in(10)));
    tokio::time::sleep(Duration::from_millis(30)).await;

    engine.start();
    assert!(recv_within(&mut rx, 1_000).await.is_some());
    engine.stop();
}

#[tokio::test]
async fn one_shot_fires_exactly_once() {
    let engine = scheduler(10);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, _rx) = counting(&count);
    engine.subscribe(handler);

    let job = engine.create(JobCreate::new("once", at_in(30)));
    engine.start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.stop();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    let after = engine.get(&job.id).unwrap();
    assert!(!after.enabled);
    assert!(after.state.next_run_at_ms.is_none());
    assert_eq!(after.state.run_count, 1);
    assert_eq!(after.state.last_status, Some(JobStatus::Ok));
    assert!(after.state.last_run_at_ms.is_some());
}

#[tokio::test]
async fn failing_middle_handler_is_isolated() {
    let engine = scheduler(10_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (first, _rx1) = counting(&count);
    let (third, _rx3) = counting(&count);
    let failures = Arc::new(AtomicUsize::new(0));
    let failures_in_handler = Arc::clone(&failures);

    engine.subscribe(first);
    engine.subscribe(handler_fn(move |_job| {
        let failures = Arc::clone(&failures_in_handler);
        async move {
            failures.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(HandlerError::from("webhook returned 500"))
        }
    }));
    engine.subscribe(third);

    let job = engine.create(JobCreate::new("notify", at_in(10)));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let summary = engine.tick().await;
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    let after = engine.get(&job.id).unwrap();
    assert_eq!(after.state.last_status, Some(JobStatus::Error));
    assert_eq!(after.state.last_error.as_deref(), Some("webhook returned 500"));
    assert!(!after.enabled);
}

#[tokio::test]
async fn recurring_job_survives_failures() {
    let engine = scheduler(10);
    engine.subscribe(handler_fn(|_job| async {
        Err::<(), _>(HandlerError::from("always fails"))
    }));

    let job = engine.create(JobCreate::new("flaky", every(20)));
    engine.start();
    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.stop();

    let after = engine.get(&job.id).unwrap();
    assert!(after.state.run_count >= 2, "ran {} times", after.state.run_count);
    assert!(after.enabled);
    assert!(after.state.next_run_at_ms.is_some());
    assert_eq!(after.state.last_status, Some(JobStatus::Error));
    assert!(after.state.next_run_at_ms > after.state.last_run_at_ms);
}

#[tokio::test]
async fn disabled_and_not_due_jobs_are_skipped() {
    let engine = scheduler(10_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, _rx) = counting(&count);
    engine.subscribe(handler);

    engine.create(JobCreate::new("off", at_in(5)).disabled());
    engine.create(JobCreate::new("far", at_in(3_600_000)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let summary = engine.tick().await;
    assert_eq!(summary.dispatched, 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl JobHandler for Gate {
    async fn handle(&self, _job: Job) -> Result<(), HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn running_job_is_not_dispatched_again() {
    let engine = scheduler(10_000);
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    engine.subscribe(Arc::new(Gate {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    }));

    let job = engine.create(JobCreate::new("slow", at_in(5)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let background = engine.clone();
    let first = tokio::spawn(async move { background.tick().await });
    entered.notified().await;

    let second = engine.tick().await;
    assert_eq!(second.busy, 1);
    assert_eq!(second.dispatched, 0);

    let manual = engine.run_job(&job.id, RunMode::Force).await.unwrap();
    assert!(!manual.ran);

    release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.busy, 0);
    assert_eq!(first.dispatched, 1);
    assert_eq!(engine.get(&job.id).unwrap().state.run_count, 1);
}

#[tokio::test]
async fn hung_handler_does_not_block_unrelated_jobs() {
    let engine = scheduler(10);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_handler = Arc::clone(&runs);
    engine.subscribe(handler_fn(move |job: Job| {
        let runs = Arc::clone(&runs_in_handler);
        async move {
            if job.name == "stuck" {
                std::future::pending::<()>().await;
            }
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
    }));

    let stuck = engine.create(JobCreate::new("stuck", at_in(5)));
    let heartbeat = engine.create(JobCreate::new("heartbeat", every(20)));
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.start();
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.stop();
    assert!(!engine.is_running());

    let ran = runs.load(Ordering::SeqCst);
    assert!(ran >= 5, "heartbeat ran {ran} times");
    assert!(engine.get(&heartbeat.id).unwrap().state.run_count >= 5);

    let stuck = engine.get(&stuck.id).unwrap();
    assert_eq!(stuck.state.run_count, 0);
    assert!(stuck.enabled, "outcome not written while the handler hangs");
}

/// Handler that sleeps and records how many jobs it saw at once, plus the
/// order in which jobs started.
struct Overlap {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl JobHandler for Overlap {
    async fn handle(&self, job: Job) -> Result<(), HandlerError> {
        self.started.lock().unwrap().push(job.name.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn peak_overlap(dispatch_concurrently: bool) -> (usize, Vec<String>) {
    let engine = Scheduler::new(SchedulerConfig {
        dispatch_concurrently,
        ..SchedulerConfig::default()
    });
    let overlap = Arc::new(Overlap {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        started: std::sync::Mutex::new(Vec::new()),
    });
    engine.subscribe(Arc::clone(&overlap) as Arc<dyn JobHandler>);

    engine.create(JobCreate::new("first", at_in(5)));
    engine.create(JobCreate::new("second", at_in(10)));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let summary = engine.tick().await;
    assert_eq!(summary.dispatched, 2);
    let started = overlap.started.lock().unwrap().clone();
    (overlap.peak.load(Ordering::SeqCst), started)
}

#[tokio::test]
async fn sequential_dispatch_runs_jobs_in_due_order() {
    let (peak, started) = peak_overlap(false).await;
    assert_eq!(peak, 1);
    assert_eq!(started, vec!["first", "second"]);
}

#[tokio::test]
async fn concurrent_dispatch_overlaps_jobs() {
    let (peak, started) = peak_overlap(true).await;
    assert_eq!(peak, 2);
    assert_eq!(started, vec!["first", "second"]);
}

#[tokio::test]
async fn stop_lets_in_flight_tick_finish() {
    let engine = scheduler(10);
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    engine.subscribe(Arc::new(Gate {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    }));

    let job = engine.create(JobCreate::new("slow", every(1)));
    tokio::time::sleep(Duration::from_millis(5)).await;
    engine.start();
    entered.notified().await;

    engine.stop();
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = engine.get(&job.id).unwrap();
    assert_eq!(after.state.run_count, 1);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn manual_runs() {
    let engine = scheduler(10_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, _rx) = counting(&count);
    engine.subscribe(handler);

    assert!(engine.run_job("missing", RunMode::Force).await.is_none());

    let job = engine.create(JobCreate::new("later", at_in(3_600_000)));
    let report = engine.run_job(&job.id, RunMode::Due).await.unwrap();
    assert!(!report.ran);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let report = engine.run_job(&job.id, RunMode::Force).await.unwrap();
    assert!(report.ran);
    assert!(!report.outcome.unwrap().any_failed);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let after = engine.get(&job.id).unwrap();
    assert!(!after.enabled, "forced one-shot is spent");
    assert!(after.state.next_run_at_ms.is_none());
    assert!(after.state.last_duration_ms.is_some());
}

#[tokio::test]
async fn unsubscribed_handler_is_not_called() {
    let engine = scheduler(10_000);
    let count = Arc::new(AtomicUsize::new(0));
    let (handler, _rx) = counting(&count);
    let sub = engine.subscribe(handler);
    sub.unsubscribe();
    sub.unsubscribe();

    let job = engine.create(JobCreate::new("j", every(60_000)));
    engine.run_job(&job.id, RunMode::Force).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(engine.get(&job.id).unwrap().state.run_count, 1);
}

#[tokio::test]
async fn engines_are_independent() {
    let a = scheduler(10_000);
    let b = scheduler(10_000);
    a.create(JobCreate::new("only-in-a", every(60_000)));

    assert_eq!(a.status().jobs, 1);
    assert_eq!(b.status().jobs, 0);
    assert!(b.list(&Default::default()).is_empty());
}

#[tokio::test]
async fn status_reports_next_wake() {
    let engine = scheduler(10_000);
    let near = engine.create(JobCreate::new("near", every(60_000)));
    engine.create(JobCreate::new("far", every(3_600_000)));
    engine.create(JobCreate::new("off", every(1_000)).disabled());

    let status = engine.status();
    assert!(!status.running);
    assert_eq!(status.jobs, 3);
    assert_eq!(status.enabled_jobs, 2);
    assert_eq!(status.next_wake_at_ms, near.state.next_run_at_ms);
}

#[tokio::test]
async fn run_emits_started_and_finished_events() {
    let engine = scheduler(10_000);
    engine.subscribe(handler_fn(|_job| async {
        Err::<(), _>(HandlerError::from("bad"))
    }));
    let job = engine.create(JobCreate::new("j", every(60_000)));
    let mut events = engine.events();

    engine.run_job(&job.id, RunMode::Force).await.unwrap();

    let started = events.recv().await.unwrap();
    assert_eq!(started.action, EventAction::Started);
    let finished = events.recv().await.unwrap();
    assert_eq!(finished.action, EventAction::Finished);
    assert_eq!(finished.job_id, job.id);
    assert_eq!(finished.status, Some(JobStatus::Error));
    assert_eq!(finished.error.as_deref(), Some("bad"));
    assert!(finished.next_run_at_ms.is_some());
}

#[test]
fn schedule_preview_without_a_job() {
    let schedule = Schedule::Cron {
        expression: "0 0 1 1 *".into(),
    };
    let from = cadence_scheduler::parse_timestamp("2030-01-02T00:00:00Z").unwrap();
    let expected = cadence_scheduler::parse_timestamp("2031-01-01T00:00:00Z");
    assert_eq!(Scheduler::next_run(&schedule, from), expected);
    assert_eq!(Scheduler::preview(&schedule, from, 2).len(), 2);
}
