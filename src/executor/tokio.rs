//! Executor that spawns runs onto the scheduler's tokio runtime.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::executor::{run_request, Executor, ExecutorContext, InstanceTracker};
use crate::job::RunRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Notify;
use tracing::debug;

/// Runs each accepted request on the runtime's blocking pool, so work
/// functions may block without starving the scheduler's own task.  This is
/// the executor installed under the `"default"` alias.
#[derive(Debug, Default)]
pub struct TokioExecutor {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ctx: Mutex<Option<ExecutorContext>>,
    handle: Mutex<Option<tokio::runtime::Handle>>,
    tracker: InstanceTracker,
    active: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

impl TokioExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for TokioExecutor {
    fn start(&self, ctx: ExecutorContext) -> Result<()> {
        debug!(alias = %ctx.alias, "tokio executor started");
        *self.inner.ctx.lock() = Some(ctx);
        *self.inner.handle.lock() = Some(tokio::runtime::Handle::current());
        self.inner.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn submit(&self, request: RunRequest) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ExecutorStopped);
        }
        let ctx = self.inner.ctx.lock().clone().ok_or(Error::ExecutorStopped)?;
        let handle = self
            .inner
            .handle
            .lock()
            .clone()
            .ok_or(Error::ExecutorStopped)?;

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
        self.inner.active.fetch_add(1, Ordering::SeqCst);

        // Emitted before the run is spawned so submission always precedes
        // the terminal event on the bus.
        ctx.bus.dispatch(Event::JobSubmitted {
            time: ctx.clock.now(),
            job_id: request.job.id.clone(),
            executor: ctx.alias.clone(),
            run_times: request.run_times.clone(),
        });

        let inner = Arc::clone(&self.inner);
        handle.spawn_blocking(move || {
            run_request(&ctx, &request);
            inner.tracker.release(&request.job.id);
            inner.active.fetch_sub(1, Ordering::SeqCst);
            inner.idle.notify_waiters();
        });
        Ok(())
    }

    async fn shutdown(&self, wait: bool) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if wait {
            loop {
                let drained = self.inner.idle.notified();
                if self.inner.active.load(Ordering::SeqCst) == 0 {
                    break;
                }
                drained.await;
            }
        }
        debug!("tokio executor stopped");
    }
}
