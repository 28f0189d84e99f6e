//! Cron-based scheduler for recurring jobs
//!
//! Each registered job owns one run loop: compute the next cron fire time
//! (UTC), sleep until it plus the job's delay plus the scheduler-wide added
//! delay, then fire unless the job was stopped meanwhile. The next fire time
//! is recomputed from the wall clock every iteration, so the loop never
//! drifts against the schedule.
//!
//! Async callbacks are spawned and not awaited: a slow cycle may overlap
//! with the next one.

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Work fired on every tick.
#[derive(Clone)]
pub enum JobCallback {
    /// Runs on the scheduler task, or on the blocking pool when
    /// [`JobOptions::blocking`] is set.
    Sync(Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>),
    /// Spawned as its own task; the run loop does not wait for it.
    Async(Arc<dyn Fn() -> JobFuture + Send + Sync>),
}

impl JobCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Fixed delay added after each computed fire time.
    pub delay: Duration,
    /// Fire once, then stop.
    pub once: bool,
    /// Dispatch sync callbacks to the blocking thread pool.
    pub blocking: bool,
}

/// What happens when a callback returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Escalate to a panic of the task running the callback. Sibling jobs
    /// are unaffected; a failing inline sync callback ends its own loop.
    #[default]
    Propagate,
    /// Log the error and keep the job running.
    CatchAndLog,
}

/// Parse a cron expression.
///
/// Five fields are standard cron with seconds fixed at 0; six or seven
/// fields carry a leading seconds field (and trailing year).
pub fn parse_schedule(expr: &str) -> Result<Schedule, ScheduleError> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

pub struct Job {
    name: String,
    schedule: Schedule,
    callback: JobCallback,
    options: JobOptions,
    active: AtomicBool,
    stopped: AtomicBool,
    fires: AtomicU64,
    stopped_tx: watch::Sender<bool>,
}

impl Job {
    fn new(name: String, schedule: Schedule, callback: JobCallback, options: JobOptions) -> Self {
        let (stopped_tx, _) = watch::channel(false);
        Self {
            name,
            schedule,
            callback,
            options,
            active: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            fires: AtomicU64::new(0),
            stopped_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Mark the job inactive. Takes effect when its current sleep ends.
    ///
    /// Returns `false` if the job was already inactive.
    pub fn stop(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the run loop has terminated and notified.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of times the callback has been fired.
    pub fn fire_count(&self) -> u64 {
        self.fires.load(Ordering::SeqCst)
    }

    /// Resolve once the run loop has terminated.
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Flip to stopped; only the first caller gets `true`.
    fn mark_stopped(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.active.store(false, Ordering::SeqCst);
        self.stopped_tx.send_replace(true);
        true
    }

    fn next_fire_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&reference).next()
    }
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    stopping: Mutex<Vec<Arc<Job>>>,
    added_delay: Duration,
    error_policy: ErrorPolicy,
}

impl SchedulerInner {
    fn retire(&self, job: Arc<Job>) {
        job.stop();
        let mut stopping = self.stopping.lock();
        stopping.push(job);
        stopping.retain(|pending| !pending.is_stopped());
    }

    /// Drop stopping-list entries that have confirmed, and unregister a
    /// finished job that is still the registered one under its name.
    fn on_job_stopped(&self, job: &Arc<Job>) {
        {
            let mut jobs = self.jobs.lock();
            if jobs
                .get(job.name())
                .is_some_and(|registered| Arc::ptr_eq(registered, job))
            {
                jobs.remove(job.name());
            }
        }
        self.stopping.lock().retain(|pending| !pending.is_stopped());
        debug!(job = %job.name(), "JobScheduler: job '{}' stopped", job.name());
    }

    fn fire(&self, job: &Job) {
        job.fires.fetch_add(1, Ordering::SeqCst);
        let policy = self.error_policy;
        let name = job.name.clone();

        match &job.callback {
            JobCallback::Async(callback) => {
                let work = callback();
                tokio::spawn(async move { settle(policy, &name, work.await) });
            }
            JobCallback::Sync(callback) if job.options.blocking => {
                let callback = callback.clone();
                tokio::task::spawn_blocking(move || settle(policy, &name, callback()));
            }
            JobCallback::Sync(callback) => settle(policy, &name, callback()),
        }
    }
}

fn settle(policy: ErrorPolicy, name: &str, outcome: anyhow::Result<()>) {
    let Err(err) = outcome else {
        return;
    };
    match policy {
        ErrorPolicy::CatchAndLog => {
            error!(job = %name, error = %format!("{err:#}"), "JobScheduler: job '{}' failed", name);
        }
        ErrorPolicy::Propagate => panic!("job '{name}' failed: {err:#}"),
    }
}

/// Confirms the stop when a run loop ends, including when it unwinds from a
/// propagated callback failure.
struct StopGuard {
    inner: Arc<SchedulerInner>,
    job: Arc<Job>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(job = %self.job.name(), "JobScheduler: job '{}' ended by a failed callback", self.job.name());
        }
        if self.job.mark_stopped() {
            self.inner.on_job_stopped(&self.job);
        }
    }
}

async fn run_job(inner: Arc<SchedulerInner>, job: Arc<Job>) {
    let _guard = StopGuard {
        inner: inner.clone(),
        job: job.clone(),
    };
    let mut reference = Utc::now();

    loop {
        let Some(next_fire) = job.next_fire_after(reference) else {
            warn!(job = %job.name(), "JobScheduler: no upcoming fire time for '{}'", job.name());
            break;
        };
        let wait = (next_fire - Utc::now()).to_std().unwrap_or_default()
            + job.options.delay
            + inner.added_delay;
        tokio::time::sleep(wait).await;

        if !job.is_active() {
            break;
        }

        inner.fire(&job);

        if job.options.once {
            job.stop();
            break;
        }
        reference = Utc::now().max(next_fire);
    }
}

/// Registry of named cron jobs.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(Duration::ZERO, ErrorPolicy::default())
    }
}

impl JobScheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    /// * `added_delay` - Extra sleep applied to every job on every tick
    /// * `error_policy` - How callback errors are handled
    pub fn new(added_delay: Duration, error_policy: ErrorPolicy) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                stopping: Mutex::new(Vec::new()),
                added_delay,
                error_policy,
            }),
        }
    }

    /// Install `callback` under `name` and start its run loop.
    ///
    /// A job already registered under `name` is stopped and replaced. Must be
    /// called from within a Tokio runtime.
    pub fn register(
        &self,
        name: &str,
        cron_expr: &str,
        callback: JobCallback,
        options: JobOptions,
    ) -> Result<Arc<Job>, ScheduleError> {
        let schedule = parse_schedule(cron_expr)?;
        let job = Arc::new(Job::new(name.to_string(), schedule, callback, options));

        let previous = self.inner.jobs.lock().insert(name.to_string(), job.clone());
        if let Some(previous) = previous {
            info!(job = %name, "JobScheduler: replacing job '{}'", name);
            self.inner.retire(previous);
        }

        tokio::spawn(run_job(self.inner.clone(), job.clone()));

        info!(
            job = %name,
            cron = %cron_expr,
            delay_ms = job.options.delay.as_millis() as u64,
            once = job.options.once,
            "JobScheduler: registered job '{}' (cron: {})",
            name,
            cron_expr
        );
        Ok(job)
    }

    /// Unregister and deactivate the job under `name`.
    ///
    /// Returns `false` when no such job exists.
    pub fn stop(&self, name: &str) -> bool {
        let removed = self.inner.jobs.lock().remove(name);
        match removed {
            Some(job) => {
                self.inner.retire(job);
                info!(job = %name, "JobScheduler: stopping job '{}'", name);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let jobs: Vec<Arc<Job>> = self.inner.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in jobs {
            self.inner.retire(job);
        }
        info!("JobScheduler: all jobs stopping");
    }

    pub fn job(&self, name: &str) -> Option<Arc<Job>> {
        self.inner.jobs.lock().get(name).cloned()
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Jobs told to stop whose run loop has not confirmed yet.
    pub fn pending_stop_count(&self) -> usize {
        self.inner.stopping.lock().len()
    }
}
