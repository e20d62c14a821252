//! Executors run jobs with bounded parallelism and report completions as
//! events.

mod pool;
mod tokio;

pub use self::pool::ThreadPoolExecutor;
pub use self::tokio::TokioExecutor;

use crate::callable::JobOutcome;
use crate::error::Result;
use crate::event::{panic_message, Event, EventBus, FailureKind};
use crate::job::RunRequest;
use crate::time::Clock;
use async_trait::async_trait;
use jiff::SignedDuration;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::debug;

/// What an executor needs from its scheduler: where it lives, the bus it
/// reports on, and the clock it stamps events with.
#[derive(Clone)]
pub struct ExecutorContext {
    pub alias: String,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("alias", &self.alias)
            .finish()
    }
}

/// Accepts prepared runs of jobs.
///
/// `submit` enforces the per-job concurrency cap: a run of a job that is
/// already at `max_instances` in flight is refused with
/// [`Error::MaxInstancesReached`](crate::Error::MaxInstancesReached), which
/// the scheduler converts into a `JobMaxInstances` event.  Once a run is
/// accepted the executor emits `JobSubmitted`, then exactly one terminal
/// `JobExecuted` or `JobError` per scheduled run time.  User failures and
/// panics stop with the run; they never reach the scheduler loop.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Called when the owning scheduler starts.  Must be called from within
    /// a tokio runtime.
    fn start(&self, ctx: ExecutorContext) -> Result<()>;

    /// Accept a run for execution.
    fn submit(&self, request: RunRequest) -> Result<()>;

    /// Stop accepting runs.  With `wait`, block until in-flight work
    /// drains; without it, abandon anything still queued.
    async fn shutdown(&self, wait: bool);
}

/// In-flight run counts per job id, shared by all executor flavors.
#[derive(Debug, Default)]
pub(crate) struct InstanceTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl InstanceTracker {
    /// Reserve a slot for `job_id`, refusing once `cap` slots are taken.
    pub(crate) fn try_acquire(&self, job_id: &str, cap: u32) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(job_id.to_string()).or_insert(0);
        if *count >= cap {
            false
        } else {
            *count += 1;
            true
        }
    }

    pub(crate) fn release(&self, job_id: &str) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(job_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(job_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self, job_id: &str) -> u32 {
        self.counts.lock().get(job_id).copied().unwrap_or(0)
    }
}

/// Run a request to completion on the current thread, emitting one terminal
/// event per scheduled run time.  Panics from user code are contained here.
pub(crate) fn run_request(ctx: &ExecutorContext, request: &RunRequest) {
    let job_id = &request.job.id;
    for run_time in &request.run_times {
        debug!(job_id = %job_id, run_time = %run_time, "running job");
        let started = std::time::Instant::now();
        let outcome: std::result::Result<JobOutcome, _> =
            catch_unwind(AssertUnwindSafe(|| request.job.callable.call(&request.run_times)));
        let duration = SignedDuration::from_nanos(started.elapsed().as_nanos() as i64);
        let event = match outcome {
            Ok(Ok(output)) => Event::JobExecuted {
                time: ctx.clock.now(),
                job_id: job_id.clone(),
                run_time: run_time.clone(),
                duration,
                output,
            },
            Ok(Err(failure)) => Event::JobError {
                time: ctx.clock.now(),
                job_id: job_id.clone(),
                run_time: run_time.clone(),
                error: failure.to_string(),
                kind: FailureKind::UserCode,
            },
            Err(panic) => Event::JobError {
                time: ctx.clock.now(),
                job_id: job_id.clone(),
                run_time: run_time.clone(),
                error: panic_message(&*panic),
                kind: FailureKind::UserCode,
            },
        };
        ctx.bus.dispatch(event);
    }
}

/// Emit an infrastructure `JobError` for every run time of a request that
/// never got to execute.
pub(crate) fn report_abandoned(ctx: &ExecutorContext, request: &RunRequest, reason: &str) {
    for run_time in &request.run_times {
        ctx.bus.dispatch(Event::JobError {
            time: ctx.clock.now(),
            job_id: request.job.id.clone(),
            run_time: run_time.clone(),
            error: reason.to_string(),
            kind: FailureKind::Infrastructure,
        });
    }
}
