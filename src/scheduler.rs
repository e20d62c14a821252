//! The scheduler owns the stores, executors, and event bus, and runs the
//! wake-dispatch loop that moves due jobs from stores to executors.

use crate::error::{Error, Result};
use crate::event::{Event, EventBus, ListenerId};
use crate::executor::{Executor, ExecutorContext, TokioExecutor};
use crate::job::{Job, JobBuilder, JobChanges, RunRequest, DEFAULT_ALIAS};
use crate::store::{JobStore, MemoryStore};
use crate::time::{millis_between, to_std_duration, Clock, SystemClock};
use crate::trigger::Trigger;
use jiff::{tz::TimeZone, SignedDuration, Zoned};
use parking_lot::Mutex;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

/// Configures a [`Scheduler`].
pub struct SchedulerBuilder {
    timezone: Option<TimeZone>,
    tick_max: SignedDuration,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            timezone: None,
            tick_max: SignedDuration::from_secs(60),
            clock: None,
        }
    }
}

impl SchedulerBuilder {
    /// Timezone the scheduler reads its clock in.  Defaults to the system
    /// timezone.  Ignored when an explicit clock is injected.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Upper bound on how long the loop sleeps between ticks, whatever the
    /// stores say.  Defaults to 60 seconds.
    pub fn tick_max(mut self, tick_max: SignedDuration) -> Self {
        self.tick_max = tick_max;
        self
    }

    /// Inject a [`Clock`]; a [`ManualClock`](crate::time::ManualClock) makes
    /// dispatch behavior deterministic under test.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Scheduler {
        let clock = self.clock.unwrap_or_else(|| {
            Arc::new(SystemClock::new(
                self.timezone.unwrap_or_else(TimeZone::system),
            ))
        });
        let mut stores: BTreeMap<String, Arc<dyn JobStore>> = BTreeMap::new();
        stores.insert(DEFAULT_ALIAS.to_string(), Arc::new(MemoryStore::new()));
        let mut executors: BTreeMap<String, Arc<dyn Executor>> = BTreeMap::new();
        executors.insert(DEFAULT_ALIAS.to_string(), Arc::new(TokioExecutor::new()));
        Scheduler {
            core: Arc::new(Core {
                clock,
                tick_max: self.tick_max,
                bus: Arc::new(EventBus::new()),
                state: Mutex::new(SchedulerState::Stopped),
                stores: Mutex::new(stores),
                executors: Mutex::new(executors),
                wakeup: Notify::new(),
                loop_task: Mutex::new(None),
            }),
        }
    }
}

/// An in-process job scheduler.
///
/// A `"default"` in-memory store and a `"default"` tokio executor are
/// installed at construction; both can be replaced or joined by others
/// under different aliases.  The handle is cheap to clone and every method
/// is safe to call from any task or thread.
///
/// ```no_run
/// use metronome::{IntervalTrigger, JobBuilder, Scheduler, UnitToUnit};
///
/// fn tick() -> metronome::JobOutcome {
///     println!("tick!");
///     Ok(None)
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> metronome::Result<()> {
/// let scheduler = Scheduler::new();
/// let trigger = IntervalTrigger::builder().seconds(10).build()?;
/// scheduler
///     .add_job(JobBuilder::new(trigger, UnitToUnit::new("tick", tick)))
///     .await?;
/// scheduler.start(false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

struct Core {
    clock: Arc<dyn Clock>,
    tick_max: SignedDuration,
    bus: Arc<EventBus>,
    state: Mutex<SchedulerState>,
    stores: Mutex<BTreeMap<String, Arc<dyn JobStore>>>,
    executors: Mutex<BTreeMap<String, Arc<dyn Executor>>>,
    wakeup: Notify,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Scheduler {
    /// A scheduler with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state()
    }

    /// Start dispatching.  With `paused`, the loop comes up waiting and no
    /// job fires until [`resume`](Scheduler::resume).
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self, paused: bool) -> Result<()> {
        {
            let state = self.core.state.lock();
            if *state != SchedulerState::Stopped {
                return Err(Error::SchedulerAlreadyRunning);
            }
        }

        for (alias, store) in self.core.snapshot_stores() {
            store.start(&alias).await?;
        }
        for (alias, executor) in self.core.snapshot_executors() {
            executor.start(self.core.executor_context(&alias))?;
        }

        *self.core.state.lock() = if paused {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        };

        let core = Arc::clone(&self.core);
        *self.core.loop_task.lock() = Some(tokio::spawn(core.run_loop()));

        info!(paused, "scheduler started");
        self.core.dispatch(Event::SchedulerStarted {
            time: self.core.clock.now(),
        });
        Ok(())
    }

    /// Stop dispatching and shut down every executor and store.  With
    /// `wait`, in-flight runs drain before this returns.
    pub async fn shutdown(&self, wait: bool) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if *state == SchedulerState::Stopped {
                return Err(Error::SchedulerNotRunning);
            }
            *state = SchedulerState::Stopped;
        }
        self.core.wakeup.notify_one();

        let task = self.core.loop_task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                error!(%error, "scheduler loop ended abnormally");
            }
        }

        for (_, executor) in self.core.snapshot_executors() {
            executor.shutdown(wait).await;
        }
        for (alias, store) in self.core.snapshot_stores() {
            if let Err(error) = store.shutdown().await {
                error!(store = %alias, %error, "store failed to shut down");
            }
        }

        info!(wait, "scheduler shut down");
        self.core.dispatch(Event::SchedulerShutdown {
            time: self.core.clock.now(),
        });
        Ok(())
    }

    /// Stop firing jobs without tearing anything down.
    pub fn pause(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if *state == SchedulerState::Stopped {
                return Err(Error::SchedulerNotRunning);
            }
            *state = SchedulerState::Paused;
        }
        self.core.wakeup.notify_one();
        self.core.dispatch(Event::SchedulerPaused {
            time: self.core.clock.now(),
        });
        Ok(())
    }

    /// Resume firing.  Jobs that came due while paused are dispatched or
    /// missed on the next tick according to their grace windows.
    pub fn resume(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if *state == SchedulerState::Stopped {
                return Err(Error::SchedulerNotRunning);
            }
            *state = SchedulerState::Running;
        }
        self.core.wakeup.notify_one();
        self.core.dispatch(Event::SchedulerResumed {
            time: self.core.clock.now(),
        });
        Ok(())
    }

    /// Add a job.  Legal in every scheduler state; while stopped the job
    /// just sits in its store until [`start`](Scheduler::start).
    ///
    /// Returns the job's id (auto-generated unless the builder set one).
    pub async fn add_job(&self, job: JobBuilder) -> Result<String> {
        let store_alias = job.store_alias().to_string();
        let store = self.core.store(&store_alias)?;
        let replace = job.replaces_existing();
        let now = self.core.clock.now();
        let built = job.build(&now)?;
        let id = built.id.clone();

        let replaced = replace && store.lookup_job(&id).await?.is_some();
        if replaced {
            store.update_job(built).await?;
            debug!(job_id = %id, store = %store_alias, "job replaced");
            self.core.dispatch(Event::JobModified {
                time: self.core.clock.now(),
                job_id: id.clone(),
                store: store_alias,
            });
        } else {
            store.add_job(built).await?;
            debug!(job_id = %id, store = %store_alias, "job added");
            self.core.dispatch(Event::JobAdded {
                time: self.core.clock.now(),
                job_id: id.clone(),
                store: store_alias,
            });
        }
        self.core.wakeup.notify_one();
        Ok(id)
    }

    /// Apply [`JobChanges`] to a job.  Searches every store unless one is
    /// named.  Returns the updated job.
    pub async fn update_job(
        &self,
        id: &str,
        store: Option<&str>,
        changes: JobChanges,
    ) -> Result<Job> {
        let (alias, store, mut job) = self.core.resolve_job(id, store).await?;
        changes.apply(&mut job, &self.core.clock.now())?;
        store.update_job(job.clone()).await?;
        self.core.dispatch(Event::JobModified {
            time: self.core.clock.now(),
            job_id: id.to_string(),
            store: alias,
        });
        self.core.wakeup.notify_one();
        Ok(job)
    }

    /// Swap a job's trigger, recomputing its next run time.
    pub async fn reschedule_job(
        &self,
        id: &str,
        store: Option<&str>,
        trigger: impl Trigger + 'static,
    ) -> Result<Job> {
        self.update_job(id, store, JobChanges::new().trigger(trigger))
            .await
    }

    /// Park a job; it keeps its configuration but stops firing.
    pub async fn pause_job(&self, id: &str, store: Option<&str>) -> Result<()> {
        let (alias, store, mut job) = self.core.resolve_job(id, store).await?;
        job.next_run_time = None;
        store.update_job(job).await?;
        self.core.dispatch(Event::JobModified {
            time: self.core.clock.now(),
            job_id: id.to_string(),
            store: alias,
        });
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Unpark a job, computing a fresh next run time.  A job whose trigger
    /// has nothing left to offer is removed instead.
    pub async fn resume_job(&self, id: &str, store: Option<&str>) -> Result<()> {
        let (alias, store, mut job) = self.core.resolve_job(id, store).await?;
        let now = self.core.clock.now();
        match job.trigger.next_fire_time(None, &now) {
            Some(next) => {
                job.next_run_time = Some(next);
                store.update_job(job).await?;
                self.core.dispatch(Event::JobModified {
                    time: now,
                    job_id: id.to_string(),
                    store: alias,
                });
            }
            None => {
                debug!(job_id = %id, "trigger exhausted while paused, removing job");
                store.remove_job(id).await?;
                self.core.dispatch(Event::JobRemoved {
                    time: now,
                    job_id: id.to_string(),
                    store: alias,
                });
            }
        }
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Remove a job.  Running instances are not cancelled; removal only
    /// prevents future firings.
    pub async fn remove_job(&self, id: &str, store: Option<&str>) -> Result<()> {
        let (alias, store, job) = self.core.resolve_job(id, store).await?;
        store.remove_job(&job.id).await?;
        self.core.dispatch(Event::JobRemoved {
            time: self.core.clock.now(),
            job_id: id.to_string(),
            store: alias,
        });
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Empty one store, or every store.
    pub async fn remove_all_jobs(&self, store: Option<&str>) -> Result<()> {
        let targets = match store {
            Some(alias) => vec![(alias.to_string(), self.core.store(alias)?)],
            None => self.core.snapshot_stores(),
        };
        for (alias, store) in targets {
            store.remove_all_jobs().await?;
            self.core.dispatch(Event::AllJobsRemoved {
                time: self.core.clock.now(),
                store: alias,
            });
        }
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Fetch a job by id, searching every store unless one is named.
    pub async fn get_job(&self, id: &str, store: Option<&str>) -> Result<Option<Job>> {
        Ok(self
            .core
            .find_job(id, store)
            .await?
            .map(|(_, _, job)| job))
    }

    /// Every job in one store, or in all stores in alias order.
    pub async fn get_jobs(&self, store: Option<&str>) -> Result<Vec<Job>> {
        let targets = match store {
            Some(alias) => vec![(alias.to_string(), self.core.store(alias)?)],
            None => self.core.snapshot_stores(),
        };
        let mut jobs = Vec::new();
        for (_, store) in targets {
            jobs.extend(store.get_all_jobs().await?);
        }
        Ok(jobs)
    }

    /// Register a job store under an alias.  Started immediately if the
    /// scheduler is already running.
    pub async fn add_store(&self, store: Arc<dyn JobStore>, alias: &str) -> Result<()> {
        {
            let mut stores = self.core.stores.lock();
            if stores.contains_key(alias) {
                return Err(Error::ConflictingAlias(alias.to_string()));
            }
            stores.insert(alias.to_string(), Arc::clone(&store));
        }
        if self.core.state() != SchedulerState::Stopped {
            store.start(alias).await?;
        }
        self.core.dispatch(Event::StoreAdded {
            time: self.core.clock.now(),
            alias: alias.to_string(),
        });
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Deregister a store, optionally shutting it down.  Its jobs go with it.
    pub async fn remove_store(&self, alias: &str, shutdown: bool) -> Result<()> {
        let store = self
            .core
            .stores
            .lock()
            .remove(alias)
            .ok_or_else(|| Error::StoreLookup(alias.to_string()))?;
        if shutdown {
            if let Err(error) = store.shutdown().await {
                error!(store = %alias, %error, "store failed to shut down");
            }
        }
        self.core.dispatch(Event::StoreRemoved {
            time: self.core.clock.now(),
            alias: alias.to_string(),
        });
        self.core.wakeup.notify_one();
        Ok(())
    }

    /// Register an executor under an alias.  Started immediately if the
    /// scheduler is already running.
    pub async fn add_executor(&self, executor: Arc<dyn Executor>, alias: &str) -> Result<()> {
        {
            let mut executors = self.core.executors.lock();
            if executors.contains_key(alias) {
                return Err(Error::ConflictingAlias(alias.to_string()));
            }
            executors.insert(alias.to_string(), Arc::clone(&executor));
        }
        if self.core.state() != SchedulerState::Stopped {
            executor.start(self.core.executor_context(alias))?;
        }
        self.core.dispatch(Event::ExecutorAdded {
            time: self.core.clock.now(),
            alias: alias.to_string(),
        });
        Ok(())
    }

    /// Deregister an executor, optionally draining and shutting it down.
    pub async fn remove_executor(&self, alias: &str, shutdown: bool) -> Result<()> {
        let executor = self
            .core
            .executors
            .lock()
            .remove(alias)
            .ok_or_else(|| Error::ExecutorLookup(alias.to_string()))?;
        if shutdown {
            executor.shutdown(true).await;
        }
        self.core.dispatch(Event::ExecutorRemoved {
            time: self.core.clock.now(),
            alias: alias.to_string(),
        });
        Ok(())
    }

    /// Observe lifecycle events matching `mask`.
    pub fn add_listener<F>(&self, mask: u32, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.core.bus.add_listener(mask, callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.bus.remove_listener(id)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.core.state())
            .field("tick_max", &self.core.tick_max)
            .finish()
    }
}

impl Core {
    fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn dispatch(&self, event: Event) {
        self.bus.dispatch(event);
    }

    fn executor_context(&self, alias: &str) -> ExecutorContext {
        ExecutorContext {
            alias: alias.to_string(),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
        }
    }

    fn snapshot_stores(&self) -> Vec<(String, Arc<dyn JobStore>)> {
        self.stores
            .lock()
            .iter()
            .map(|(alias, store)| (alias.clone(), Arc::clone(store)))
            .collect()
    }

    fn snapshot_executors(&self) -> Vec<(String, Arc<dyn Executor>)> {
        self.executors
            .lock()
            .iter()
            .map(|(alias, executor)| (alias.clone(), Arc::clone(executor)))
            .collect()
    }

    fn store(&self, alias: &str) -> Result<Arc<dyn JobStore>> {
        self.stores
            .lock()
            .get(alias)
            .cloned()
            .ok_or_else(|| Error::StoreLookup(alias.to_string()))
    }

    async fn find_job(
        &self,
        id: &str,
        store: Option<&str>,
    ) -> Result<Option<(String, Arc<dyn JobStore>, Job)>> {
        let targets = match store {
            Some(alias) => vec![(alias.to_string(), self.store(alias)?)],
            None => self.snapshot_stores(),
        };
        for (alias, store) in targets {
            if let Some(job) = store.lookup_job(id).await? {
                return Ok(Some((alias, store, job)));
            }
        }
        Ok(None)
    }

    async fn resolve_job(
        &self,
        id: &str,
        store: Option<&str>,
    ) -> Result<(String, Arc<dyn JobStore>, Job)> {
        self.find_job(id, store)
            .await?
            .ok_or_else(|| Error::JobLookup(id.to_string()))
    }

    /// The wake-dispatch loop.  Runs as one tokio task; every store
    /// mutation it performs goes through the stores' own locks, so the
    /// public API can mutate concurrently without torn reads.
    async fn run_loop(self: Arc<Self>) {
        debug!("scheduler loop running");
        loop {
            match self.state() {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => {
                    self.wakeup.notified().await;
                    continue;
                }
                SchedulerState::Running => {}
            }

            let now = self.clock.now();
            let nearest = self.tick(&now).await;
            if self.state() == SchedulerState::Stopped {
                break;
            }

            let wait = match &nearest {
                Some(next) => {
                    let millis = millis_between(next, &self.clock.now()).max(0);
                    SignedDuration::from_millis(millis).min(self.tick_max)
                }
                None => self.tick_max,
            };
            debug!(wait = ?wait, "waiting for the next due job");
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(to_std_duration(wait)) => {}
            }
        }
        debug!("scheduler loop exited");
    }

    /// One iteration: dispatch everything due across all stores, then
    /// report the nearest upcoming run time.
    async fn tick(&self, now: &Zoned) -> Option<Zoned> {
        let stores = self.snapshot_stores();

        let mut due: Vec<(Arc<dyn JobStore>, Job)> = Vec::new();
        for (alias, store) in &stores {
            match store.get_due_jobs(now).await {
                Ok(jobs) => due.extend(jobs.into_iter().map(|job| (Arc::clone(store), job))),
                // One broken store must not stall the others.
                Err(error) => {
                    error!(store = %alias, %error, "failed to read due jobs, skipping store this tick");
                }
            }
        }
        due.sort_by(|(_, a), (_, b)| a.due_order(b));

        for (store, job) in due {
            self.process_due_job(now, store.as_ref(), job).await;
        }

        let mut nearest: Option<Zoned> = None;
        for (alias, store) in &stores {
            match store.get_next_run_time().await {
                Ok(Some(next)) => {
                    nearest = match nearest {
                        Some(current) if current <= next => Some(current),
                        _ => Some(next),
                    };
                }
                Ok(None) => {}
                Err(error) => error!(store = %alias, %error, "failed to read next run time"),
            }
        }
        nearest
    }

    /// Expand a due job's pending firings against its grace window, submit
    /// at most one run request, and roll the job forward (or retire it).
    async fn process_due_job(&self, now: &Zoned, store: &dyn JobStore, job: Job) {
        let mut kept: Vec<Zoned> = Vec::new();
        let mut next = job.next_run_time.clone();
        loop {
            let Some(fire_time) = next.clone() else { break };
            if fire_time > *now {
                break;
            }
            let lateness = millis_between(now, &fire_time);
            let within_grace = job
                .misfire_grace
                .map_or(true, |grace| i128::from(lateness) <= grace.as_millis());
            if within_grace {
                kept.push(fire_time.clone());
            } else {
                warn!(job_id = %job.id, run_time = %fire_time, "firing missed its grace window");
                self.dispatch(Event::JobMissed {
                    time: self.clock.now(),
                    job_id: job.id.clone(),
                    run_time: fire_time.clone(),
                });
            }
            next = job.trigger.next_fire_time(Some(&fire_time), now);
        }

        if job.coalesce && kept.len() > 1 {
            // The merged run keeps only the latest scheduled instant.
            kept = kept.split_off(kept.len() - 1);
        }

        if !kept.is_empty() {
            let executor = self.executors.lock().get(&job.executor).cloned();
            match executor {
                Some(executor) => {
                    let request = RunRequest {
                        job: job.clone(),
                        run_times: kept,
                    };
                    match executor.submit(request) {
                        Ok(()) => {}
                        Err(Error::MaxInstancesReached { .. }) => {
                            debug!(job_id = %job.id, "run skipped, concurrency cap reached");
                            self.dispatch(Event::JobMaxInstances {
                                time: self.clock.now(),
                                job_id: job.id.clone(),
                                executor: job.executor.clone(),
                                max_instances: job.max_instances,
                            });
                        }
                        Err(error) => {
                            error!(job_id = %job.id, %error, "executor refused the run");
                        }
                    }
                }
                None => {
                    error!(job_id = %job.id, executor = %job.executor, "job routes to an unknown executor");
                }
            }
        }

        match next {
            Some(next_run) => {
                let mut updated = job.clone();
                updated.next_run_time = Some(next_run);
                if let Err(error) = store.update_job(updated).await {
                    error!(job_id = %job.id, %error, "failed to roll the job forward");
                }
            }
            None => {
                debug!(job_id = %job.id, "trigger exhausted, retiring job");
                match store.remove_job(&job.id).await {
                    Ok(()) => self.dispatch(Event::JobRemoved {
                        time: self.clock.now(),
                        job_id: job.id.clone(),
                        store: job.store.clone(),
                    }),
                    Err(error) => error!(job_id = %job.id, %error, "failed to retire the job"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{JobOutcome, UnitToUnit};
    use crate::event::mask;
    use crate::time::ManualClock;
    use crate::trigger::{DateTrigger, IntervalTrigger};
    use jiff::{civil, ToSpan as _};
    use pretty_assertions::assert_eq;

    fn no_op() -> JobOutcome {
        Ok(None)
    }

    fn nine() -> Zoned {
        civil::date(2025, 1, 6)
            .at(9, 0, 0, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap()
    }

    fn plus(seconds: i64) -> Zoned {
        nine().checked_add(seconds.seconds()).unwrap()
    }

    /// Records submissions instead of running anything, so tick-level tests
    /// stay fully synchronous.  Emits `JobSubmitted` like the real executors.
    #[derive(Debug, Default)]
    struct RecordingExecutor {
        ctx: Mutex<Option<ExecutorContext>>,
        runs: Arc<Mutex<Vec<RunRequest>>>,
    }

    #[async_trait::async_trait]
    impl Executor for RecordingExecutor {
        fn start(&self, ctx: ExecutorContext) -> Result<()> {
            *self.ctx.lock() = Some(ctx);
            Ok(())
        }
        fn submit(&self, request: RunRequest) -> Result<()> {
            if let Some(ctx) = self.ctx.lock().as_ref() {
                ctx.bus.dispatch(Event::JobSubmitted {
                    time: ctx.clock.now(),
                    job_id: request.job.id.clone(),
                    executor: ctx.alias.clone(),
                    run_times: request.run_times.clone(),
                });
            }
            self.runs.lock().push(request);
            Ok(())
        }
        async fn shutdown(&self, _wait: bool) {}
    }

    /// Always reports the concurrency cap as reached.
    #[derive(Debug, Default)]
    struct SaturatedExecutor;

    #[async_trait::async_trait]
    impl Executor for SaturatedExecutor {
        fn start(&self, _ctx: ExecutorContext) -> Result<()> {
            Ok(())
        }
        fn submit(&self, request: RunRequest) -> Result<()> {
            Err(Error::MaxInstancesReached {
                job_id: request.job.id,
                max_instances: request.job.max_instances,
            })
        }
        async fn shutdown(&self, _wait: bool) {}
    }

    struct Fixture {
        scheduler: Scheduler,
        clock: ManualClock,
        runs: Arc<Mutex<Vec<RunRequest>>>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::new(nine());
        let scheduler = Scheduler::builder().clock(Arc::new(clock.clone())).build();

        let recording = Arc::new(RecordingExecutor::default());
        let runs = Arc::clone(&recording.runs);
        scheduler
            .add_executor(Arc::clone(&recording) as Arc<dyn Executor>, "recording")
            .await
            .unwrap();
        // The scheduler is stopped, so hand the executor its context by hand.
        recording
            .start(scheduler.core.executor_context("recording"))
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        scheduler.add_listener(mask::ALL, move |event| sink.lock().push(event.clone()));

        Fixture {
            scheduler,
            clock,
            runs,
            events,
        }
    }

    fn interval_job(seconds: i64, start: Zoned) -> JobBuilder {
        let trigger = IntervalTrigger::builder()
            .seconds(seconds)
            .start(start)
            .timezone(TimeZone::UTC)
            .build()
            .unwrap();
        JobBuilder::new(trigger, UnitToUnit::new("no_op", no_op)).executor("recording")
    }

    fn codes(events: &Mutex<Vec<Event>>) -> Vec<u32> {
        events.lock().iter().map(Event::code).collect()
    }

    #[tokio::test]
    async fn due_job_is_submitted_and_rolled_forward() {
        let f = fixture().await;
        let id = f
            .scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();

        f.clock.advance(5.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        {
            let runs = f.runs.lock();
            assert_eq!(runs.len(), 1);
            assert_eq!(runs[0].run_times, vec![plus(5)]);
        }

        let job = f.scheduler.get_job(&id, None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(plus(10)));
    }

    #[tokio::test]
    async fn tick_reports_the_nearest_next_run() {
        let f = fixture().await;
        f.scheduler
            .add_job(interval_job(30, plus(30)).id("slow"))
            .await
            .unwrap();
        f.scheduler
            .add_job(interval_job(10, plus(10)).id("fast"))
            .await
            .unwrap();

        let nearest = f.scheduler.core.tick(&f.clock.now()).await;
        assert_eq!(nearest, Some(plus(10)));
    }

    #[tokio::test]
    async fn coalesce_collapses_missed_firings_into_the_latest() {
        let f = fixture().await;
        f.scheduler
            .add_job(interval_job(1, plus(1)).id("tick").misfire_grace(None))
            .await
            .unwrap();

        // Sleep through ten firings.
        f.clock.advance(10.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        let runs = f.runs.lock();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_times, vec![plus(10)]);

        drop(runs);
        let job = f.scheduler.get_job("tick", None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(plus(11)));
    }

    #[tokio::test]
    async fn without_coalesce_every_kept_firing_is_submitted_together() {
        let f = fixture().await;
        f.scheduler
            .add_job(
                interval_job(1, plus(1))
                    .id("tick")
                    .coalesce(false)
                    .misfire_grace(None),
            )
            .await
            .unwrap();

        f.clock.advance(3.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        let runs = f.runs.lock();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_times, vec![plus(1), plus(2), plus(3)]);
    }

    #[tokio::test]
    async fn firings_older_than_grace_are_missed() {
        let f = fixture().await;
        f.scheduler
            .add_job(
                interval_job(1, plus(1))
                    .id("tick")
                    .coalesce(false)
                    .misfire_grace(Some(SignedDuration::from_secs(2))),
            )
            .await
            .unwrap();

        // Ten firings pending; only those at most two seconds late survive.
        f.clock.advance(10.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        let runs = f.runs.lock();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_times, vec![plus(8), plus(9), plus(10)]);

        let missed: Vec<Zoned> = f
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::JobMissed { run_time, .. } => Some(run_time.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            missed,
            (1..=7).map(plus).collect::<Vec<_>>(),
            "firings more than 2s late are reported missed"
        );
    }

    #[tokio::test]
    async fn misses_are_reported_before_the_submission() {
        let f = fixture().await;
        f.scheduler
            .add_job(
                interval_job(1, plus(1))
                    .id("tick")
                    .misfire_grace(Some(SignedDuration::from_secs(1))),
            )
            .await
            .unwrap();

        f.clock.advance(5.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        let codes = codes(&f.events);
        let last_missed = codes.iter().rposition(|c| *c == mask::JOB_MISSED);
        let submitted = codes.iter().position(|c| *c == mask::JOB_SUBMITTED);
        assert!(last_missed.is_some());
        assert!(submitted.is_some());
        assert!(last_missed < submitted);
        assert_eq!(f.runs.lock().len(), 1);
    }

    #[tokio::test]
    async fn saturated_executor_turns_into_a_max_instances_event() {
        let f = fixture().await;
        f.scheduler
            .core
            .executors
            .lock()
            .insert("saturated".to_string(), Arc::new(SaturatedExecutor));

        let trigger = IntervalTrigger::builder()
            .seconds(5)
            .start(plus(5))
            .timezone(TimeZone::UTC)
            .build()
            .unwrap();
        f.scheduler
            .add_job(
                JobBuilder::new(trigger, UnitToUnit::new("no_op", no_op))
                    .id("busy")
                    .max_instances(2)
                    .executor("saturated"),
            )
            .await
            .unwrap();

        f.clock.advance(5.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        let has_cap_event = f.events.lock().iter().any(|event| {
            matches!(
                event,
                Event::JobMaxInstances {
                    job_id,
                    max_instances: 2,
                    ..
                } if job_id == "busy"
            )
        });
        assert!(has_cap_event);

        // The firing is skipped for this tick but the job still advances.
        let job = f.scheduler.get_job("busy", None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(plus(10)));
    }

    #[tokio::test]
    async fn exhausted_trigger_retires_the_job() {
        let f = fixture().await;
        let trigger = DateTrigger::at(plus(5));
        f.scheduler
            .add_job(
                JobBuilder::new(trigger, UnitToUnit::new("no_op", no_op))
                    .id("once")
                    .executor("recording"),
            )
            .await
            .unwrap();

        f.clock.advance(5.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;

        assert_eq!(f.runs.lock().len(), 1);
        assert!(f.scheduler.get_job("once", None).await.unwrap().is_none());
        assert!(codes(&f.events).contains(&mask::JOB_REMOVED));
    }

    #[tokio::test]
    async fn pause_and_resume_job_toggle_the_next_run() {
        let f = fixture().await;
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();

        f.scheduler.pause_job("tick", None).await.unwrap();
        let job = f.scheduler.get_job("tick", None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, None);

        // A paused job never turns up in a tick.
        f.clock.advance(20.seconds());
        f.scheduler.core.tick(&f.clock.now()).await;
        assert!(f.runs.lock().is_empty());

        f.scheduler.resume_job("tick", None).await.unwrap();
        // T+20 sits exactly on the trigger's 5-second grid, so the resumed
        // job fires at the current instant rather than waiting for T+25.
        let job = f.scheduler.get_job("tick", None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(plus(20)));
    }

    #[tokio::test]
    async fn resume_of_a_spent_trigger_removes_the_job() {
        let f = fixture().await;
        // Fires at the top of each minute until 09:05.
        let trigger = crate::trigger::CronTrigger::builder()
            .minute("*")
            .end(plus(300))
            .timezone(TimeZone::UTC)
            .build()
            .unwrap();
        f.scheduler
            .add_job(
                JobBuilder::new(trigger, UnitToUnit::new("no_op", no_op))
                    .id("ending")
                    .executor("recording"),
            )
            .await
            .unwrap();
        f.scheduler.pause_job("ending", None).await.unwrap();

        // By the time the job is resumed its trigger has nothing left.
        f.clock.advance(600.seconds());
        f.scheduler.resume_job("ending", None).await.unwrap();

        assert!(f.scheduler.get_job("ending", None).await.unwrap().is_none());
        assert!(codes(&f.events).contains(&mask::JOB_REMOVED));
    }

    #[tokio::test]
    async fn update_job_reschedules_on_trigger_change() {
        let f = fixture().await;
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();

        let updated = f
            .scheduler
            .reschedule_job("tick", None, DateTrigger::at(plus(60)))
            .await
            .unwrap();
        assert_eq!(updated.next_run_time, Some(plus(60)));

        let renamed = f
            .scheduler
            .update_job("tick", None, JobChanges::new().name("renamed"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.next_run_time, Some(plus(60)));
    }

    #[tokio::test]
    async fn removing_unknown_jobs_is_an_error_and_re_adding_is_not() {
        let f = fixture().await;
        assert!(matches!(
            f.scheduler.remove_job("ghost", None).await,
            Err(Error::JobLookup(_))
        ));

        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();
        f.scheduler.remove_job("tick", None).await.unwrap();
        assert!(matches!(
            f.scheduler.remove_job("tick", None).await,
            Err(Error::JobLookup(_))
        ));
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_existing_swaps_the_job_in_place() {
        let f = fixture().await;
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick"))
            .await
            .unwrap();
        // Without the flag: conflict.
        assert!(matches!(
            f.scheduler.add_job(interval_job(9, plus(9)).id("tick")).await,
            Err(Error::ConflictingId(_))
        ));
        f.scheduler
            .add_job(interval_job(9, plus(9)).id("tick").replace_existing(true))
            .await
            .unwrap();
        let job = f.scheduler.get_job("tick", None).await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(plus(9)));
    }

    #[tokio::test]
    async fn jobs_can_live_in_named_stores() {
        let f = fixture().await;
        f.scheduler
            .add_store(Arc::new(MemoryStore::new()), "secondary")
            .await
            .unwrap();
        assert!(matches!(
            f.scheduler
                .add_store(Arc::new(MemoryStore::new()), "secondary")
                .await,
            Err(Error::ConflictingAlias(_))
        ));

        f.scheduler
            .add_job(interval_job(5, plus(5)).id("tick").store("secondary"))
            .await
            .unwrap();
        assert!(f
            .scheduler
            .get_job("tick", Some("secondary"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.scheduler.get_jobs(None).await.unwrap().len(), 1);

        // Routing to a store that does not exist fails up front.
        assert!(matches!(
            f.scheduler
                .add_job(interval_job(5, plus(5)).store("missing"))
                .await,
            Err(Error::StoreLookup(_))
        ));

        f.scheduler.remove_all_jobs(Some("secondary")).await.unwrap();
        assert_eq!(f.scheduler.get_jobs(None).await.unwrap().len(), 0);
        assert!(codes(&f.events).contains(&mask::ALL_JOBS_REMOVED));

        f.scheduler.remove_store("secondary", true).await.unwrap();
        assert!(matches!(
            f.scheduler.get_jobs(Some("secondary")).await,
            Err(Error::StoreLookup(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_guarded() {
        let f = fixture().await;
        assert_eq!(f.scheduler.state(), SchedulerState::Stopped);
        assert!(matches!(
            f.scheduler.pause(),
            Err(Error::SchedulerNotRunning)
        ));
        assert!(matches!(
            f.scheduler.shutdown(true).await,
            Err(Error::SchedulerNotRunning)
        ));

        f.scheduler.start(false).await.unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Running);
        assert!(matches!(
            f.scheduler.start(false).await,
            Err(Error::SchedulerAlreadyRunning)
        ));

        f.scheduler.pause().unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Paused);
        f.scheduler.resume().unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Running);

        f.scheduler.shutdown(true).await.unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Stopped);

        let lifecycle: Vec<u32> = codes(&f.events)
            .into_iter()
            .filter(|code| {
                [
                    mask::SCHEDULER_STARTED,
                    mask::SCHEDULER_PAUSED,
                    mask::SCHEDULER_RESUMED,
                    mask::SCHEDULER_SHUTDOWN,
                ]
                .contains(code)
            })
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                mask::SCHEDULER_STARTED,
                mask::SCHEDULER_PAUSED,
                mask::SCHEDULER_RESUMED,
                mask::SCHEDULER_SHUTDOWN,
            ]
        );
    }

    #[tokio::test]
    async fn add_job_works_in_every_state() {
        let f = fixture().await;
        // Stopped: queued, not dispatched.
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("early"))
            .await
            .unwrap();
        assert!(f.runs.lock().is_empty());

        f.scheduler.start(true).await.unwrap();
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("while-paused"))
            .await
            .unwrap();
        f.scheduler.shutdown(true).await.unwrap();

        // After shutdown, still accepted.
        f.scheduler
            .add_job(interval_job(5, plus(5)).id("after-shutdown"))
            .await
            .unwrap();
        assert_eq!(f.scheduler.get_jobs(None).await.unwrap().len(), 3);
    }
}
