//! Unit tests for the cron job scheduler
//!
//! These run against the wall clock with per-second cron expressions, so
//! each test takes a couple of seconds.

use klinewatch::core::scheduler::{
    parse_schedule, ErrorPolicy, JobCallback, JobOptions, JobScheduler, ScheduleError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const EVERY_SECOND: &str = "* * * * * *";

fn counting(counter: &Arc<AtomicUsize>) -> JobCallback {
    let counter = counter.clone();
    JobCallback::sync(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn test_parse_schedule_accepts_five_and_six_fields() {
    assert!(parse_schedule("*/5 * * * *").is_ok());
    assert!(parse_schedule("0 * * * * *").is_ok());
    assert!(parse_schedule("0 0 12 * * Mon-Fri 2030").is_ok());
}

#[test]
fn test_parse_schedule_rejects_garbage() {
    let err = parse_schedule("every minute").unwrap_err();
    let ScheduleError::InvalidCron { expr, .. } = err;
    assert_eq!(expr, "every minute");
}

#[tokio::test]
async fn test_register_rejects_invalid_cron() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let result = scheduler.register("bad", "61 * * * * *", counting(&counter), JobOptions::default());
    assert!(result.is_err());
    assert!(scheduler.job("bad").is_none());
}

#[tokio::test]
async fn test_recurring_job_fires_every_tick() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .register("tick", EVERY_SECOND, counting(&counter), JobOptions::default())
        .unwrap();

    sleep(Duration::from_millis(2600)).await;
    assert!(counter.load(Ordering::SeqCst) >= 2);
    assert_eq!(job.fire_count() as usize, counter.load(Ordering::SeqCst));
    assert!(job.is_active());

    scheduler.stop_all();
}

#[tokio::test]
async fn test_async_callback_is_spawned() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let task_counter = counter.clone();
    scheduler
        .register(
            "async",
            EVERY_SECOND,
            JobCallback::from_async(move || {
                let counter = task_counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            JobOptions::default(),
        )
        .unwrap();

    sleep(Duration::from_millis(1600)).await;
    assert!(counter.load(Ordering::SeqCst) >= 1);
    scheduler.stop_all();
}

#[tokio::test]
async fn test_blocking_callback_runs_on_blocking_pool() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(
            "blocking",
            EVERY_SECOND,
            counting(&counter),
            JobOptions {
                blocking: true,
                ..JobOptions::default()
            },
        )
        .unwrap();

    sleep(Duration::from_millis(1600)).await;
    assert!(counter.load(Ordering::SeqCst) >= 1);
    scheduler.stop_all();
}

#[tokio::test]
async fn test_once_job_fires_once_and_unregisters() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .register(
            "once",
            EVERY_SECOND,
            counting(&counter),
            JobOptions {
                once: true,
                ..JobOptions::default()
            },
        )
        .unwrap();

    timeout(Duration::from_secs(3), job.wait_stopped())
        .await
        .expect("once job should stop after firing");
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(job.is_stopped());
    assert!(scheduler.job("once").is_none());
}

#[tokio::test]
async fn test_stop_is_cooperative_and_idempotent() {
    let scheduler = JobScheduler::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let job = scheduler
        .register("stoppable", EVERY_SECOND, counting(&counter), JobOptions::default())
        .unwrap();

    assert!(scheduler.stop("stoppable"));
    assert!(!scheduler.stop("stoppable"));
    assert!(!job.is_active());
    assert!(scheduler.job_names().is_empty());

    timeout(Duration::from_secs(3), job.wait_stopped())
        .await
        .expect("stopped job should confirm");
    assert!(job.is_stopped());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.pending_stop_count(), 0);
}

#[tokio::test]
async fn test_register_replaces_existing_job() {
    let scheduler = JobScheduler::default();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let old = scheduler
        .register("shared", EVERY_SECOND, counting(&first), JobOptions::default())
        .unwrap();
    let new = scheduler
        .register("shared", EVERY_SECOND, counting(&second), JobOptions::default())
        .unwrap();

    timeout(Duration::from_secs(3), old.wait_stopped())
        .await
        .expect("replaced job should report stopped");
    let first_after_stop = first.load(Ordering::SeqCst);

    sleep(Duration::from_millis(1600)).await;
    assert_eq!(first.load(Ordering::SeqCst), first_after_stop);
    assert!(second.load(Ordering::SeqCst) >= 1);
    assert!(new.is_active());
    assert_eq!(scheduler.job_names(), vec!["shared".to_string()]);
    assert_eq!(scheduler.pending_stop_count(), 0);

    scheduler.stop_all();
}

#[tokio::test]
async fn test_catch_and_log_keeps_failing_job_alive() {
    let scheduler = JobScheduler::new(Duration::ZERO, ErrorPolicy::CatchAndLog);
    let counter = Arc::new(AtomicUsize::new(0));
    let attempts = counter.clone();
    let job = scheduler
        .register(
            "flaky",
            EVERY_SECOND,
            JobCallback::sync(move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("exchange unavailable")
            }),
            JobOptions::default(),
        )
        .unwrap();

    sleep(Duration::from_millis(2600)).await;
    assert!(counter.load(Ordering::SeqCst) >= 2);
    assert!(job.is_active());
    scheduler.stop_all();
}

#[tokio::test]
async fn test_propagated_error_ends_only_the_failing_job() {
    let scheduler = JobScheduler::default();
    let failing = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicUsize::new(0));
    let attempts = failing.clone();

    let failed_job = scheduler
        .register(
            "failing",
            EVERY_SECOND,
            JobCallback::sync(move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }),
            JobOptions::default(),
        )
        .unwrap();
    let healthy_job = scheduler
        .register("healthy", EVERY_SECOND, counting(&healthy), JobOptions::default())
        .unwrap();

    sleep(Duration::from_millis(2600)).await;
    assert_eq!(failing.load(Ordering::SeqCst), 1);
    assert!(healthy.load(Ordering::SeqCst) >= 2);

    // The dead loop still confirms its stop and leaves the registry.
    timeout(Duration::from_secs(1), failed_job.wait_stopped())
        .await
        .expect("failed job reports stopped");
    assert!(!failed_job.is_active());
    assert!(scheduler.job("failing").is_none());
    assert!(!scheduler.stop("failing"));
    assert_eq!(scheduler.job_names(), vec!["healthy".to_string()]);

    scheduler.stop_all();
    timeout(Duration::from_secs(3), healthy_job.wait_stopped())
        .await
        .expect("healthy job stops");
    assert_eq!(scheduler.pending_stop_count(), 0);
}

#[tokio::test]
async fn test_job_delay_postpones_first_fire() {
    let scheduler = JobScheduler::new(Duration::from_millis(500), ErrorPolicy::default());
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(
            "delayed",
            EVERY_SECOND,
            counting(&counter),
            JobOptions {
                delay: Duration::from_secs(2),
                ..JobOptions::default()
            },
        )
        .unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    scheduler.stop_all();
}
