//! Executor backed by a fixed pool of worker threads.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::executor::{report_abandoned, run_request, Executor, ExecutorContext, InstanceTracker};
use crate::job::RunRequest;
use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::{debug, warn};

/// Runs jobs on a bounded set of dedicated OS threads fed by a channel.
///
/// Queued runs wait for a free worker; the per-job cap is still enforced at
/// submission, so a queued run counts as in flight.  On `shutdown(false)`
/// anything still queued is reported as an infrastructure `JobError` rather
/// than silently dropped.
pub struct ThreadPoolExecutor {
    worker_count: usize,
    inner: Arc<Inner>,
    state: Mutex<State>,
}

#[derive(Default)]
struct Inner {
    ctx: Mutex<Option<ExecutorContext>>,
    tracker: InstanceTracker,
    closed: AtomicBool,
    abort: AtomicBool,
}

#[derive(Default)]
struct State {
    sender: Option<Sender<RunRequest>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// A pool of `worker_count` threads (at least one).
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            inner: Arc::new(Inner::default()),
            state: Mutex::new(State::default()),
        }
    }

    fn worker_loop(inner: Arc<Inner>, ctx: ExecutorContext, receiver: Receiver<RunRequest>) {
        while let Ok(request) = receiver.recv() {
            if inner.abort.load(Ordering::SeqCst) {
                report_abandoned(&ctx, &request, "executor shut down before the run started");
            } else {
                run_request(&ctx, &request);
            }
            inner.tracker.release(&request.job.id);
        }
    }
}

#[async_trait]
impl Executor for ThreadPoolExecutor {
    fn start(&self, ctx: ExecutorContext) -> Result<()> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        *self.inner.ctx.lock() = Some(ctx.clone());
        let mut state = self.state.lock();
        state.sender = Some(sender);
        for index in 0..self.worker_count {
            let inner = Arc::clone(&self.inner);
            let ctx = ctx.clone();
            let receiver = receiver.clone();
            let builder = thread::Builder::new().name(format!("metronome-worker-{index}"));
            match builder.spawn(move || Self::worker_loop(inner, ctx, receiver)) {
                Ok(handle) => state.workers.push(handle),
                Err(error) => warn!(%error, "failed to spawn worker thread"),
            }
        }
        if state.workers.is_empty() {
            state.sender = None;
            return Err(Error::ExecutorStopped);
        }
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.abort.store(false, Ordering::SeqCst);
        debug!(alias = %ctx.alias, workers = state.workers.len(), "thread pool executor started");
        Ok(())
    }

    fn submit(&self, request: RunRequest) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ExecutorStopped);
        }
        let ctx = self.inner.ctx.lock().clone().ok_or(Error::ExecutorStopped)?;
        let state = self.state.lock();
        let Some(sender) = state.sender.clone() else {
            return Err(Error::ExecutorStopped);
        };
        drop(state);

        if !self
            .inner
            .tracker
            .try_acquire(&request.job.id, request.job.max_instances)
        {
            return Err(Error::MaxInstancesReached {
                job_id: request.job.id,
                max_instances: request.job.max_instances,
            });
        }

        // Emitted before the run is queued so submission always precedes
        // the terminal event on the bus.
        ctx.bus.dispatch(Event::JobSubmitted {
            time: ctx.clock.now(),
            job_id: request.job.id.clone(),
            executor: ctx.alias.clone(),
            run_times: request.run_times.clone(),
        });

        if sender.send(request.clone()).is_err() {
            self.inner.tracker.release(&request.job.id);
            report_abandoned(&ctx, &request, "executor queue is closed");
            return Err(Error::ExecutorStopped);
        }
        Ok(())
    }

    async fn shutdown(&self, wait: bool) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if !wait {
            self.inner.abort.store(true, Ordering::SeqCst);
        }
        let (sender, workers) = {
            let mut state = self.state.lock();
            (state.sender.take(), std::mem::take(&mut state.workers))
        };
        drop(sender);
        if workers.is_empty() {
            return;
        }
        // Joining blocks, so do it off the async thread.
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await;
        if joined.is_err() {
            warn!("worker threads could not be joined cleanly");
        }
        debug!("thread pool executor stopped");
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("worker_count", &self.worker_count)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}
