//! A Job is a piece of work paired with the trigger that decides when it runs.

use crate::callable::Callable;
use crate::error::{Error, Result};
use crate::trigger::Trigger;
use jiff::{SignedDuration, Zoned};
use std::{cmp::Ordering, fmt, sync::Arc};
use uuid::Uuid;

/// The alias jobs route to when no store or executor is named.
pub const DEFAULT_ALIAS: &str = "default";

/// A scheduled unit of work.
///
/// Jobs live inside a [`JobStore`](crate::store::JobStore); the scheduler
/// hands cheap clones (the callable and trigger are shared behind `Arc`s)
/// to executors as snapshots, so mutating a stored job never affects runs
/// already in flight.
#[derive(Clone)]
pub struct Job {
    /// Unique within the job's store, stable for the job's life.
    pub id: String,
    /// Human label; not required to be unique.
    pub name: String,
    /// The work to run.
    pub callable: Arc<dyn Callable>,
    /// Decides firing instants.
    pub trigger: Arc<dyn Trigger>,
    /// When the job fires next.  `None` means paused or exhausted.
    pub next_run_time: Option<Zoned>,
    /// How late a firing may run before it counts as missed.  `None` means
    /// firings never expire.
    pub misfire_grace: Option<SignedDuration>,
    /// Collapse several missed firings within grace into one run at the
    /// latest missed instant.
    pub coalesce: bool,
    /// Cap on concurrent in-flight runs of this job.
    pub max_instances: u32,
    /// Alias of the executor that runs this job.
    pub executor: String,
    /// Alias of the store that owns this job.
    pub store: String,
}

impl Job {
    /// Whether this job is parked (paused or exhausted).
    pub fn is_paused(&self) -> bool {
        self.next_run_time.is_none()
    }

    /// Total order used by stores: ascending next run time, `None` last,
    /// ties broken by id for stable iteration.
    pub(crate) fn due_order(&self, other: &Self) -> Ordering {
        match (&self.next_run_time, &other.next_run_time) {
            (Some(a), Some(b)) => a.cmp(b).then_with(|| self.id.cmp(&other.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.id.cmp(&other.id),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("next_run_time", &self.next_run_time)
            .field("misfire_grace", &self.misfire_grace)
            .field("coalesce", &self.coalesce)
            .field("max_instances", &self.max_instances)
            .field("executor", &self.executor)
            .field("store", &self.store)
            .finish()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Job(id={}, name={}, next_run={})",
            self.id,
            self.name,
            match &self.next_run_time {
                Some(t) => t.to_string(),
                None => "paused".to_string(),
            }
        )
    }
}

/// Configures a job for [`Scheduler::add_job`](crate::Scheduler::add_job).
///
/// ```
/// use metronome::{IntervalTrigger, JobBuilder, UnitToUnit};
///
/// fn tick() -> metronome::JobOutcome {
///     Ok(None)
/// }
///
/// let trigger = IntervalTrigger::builder().minutes(5).build()?;
/// let job = JobBuilder::new(trigger, UnitToUnit::new("tick", tick))
///     .id("heartbeat")
///     .max_instances(2)
///     .coalesce(false);
/// # let _ = job;
/// # Ok::<(), metronome::Error>(())
/// ```
pub struct JobBuilder {
    trigger: Arc<dyn Trigger>,
    callable: Arc<dyn Callable>,
    id: Option<String>,
    name: Option<String>,
    misfire_grace: Option<SignedDuration>,
    coalesce: bool,
    max_instances: u32,
    executor: String,
    store: String,
    replace_existing: bool,
    paused: bool,
}

impl JobBuilder {
    pub fn new(trigger: impl Trigger + 'static, callable: impl Callable + 'static) -> Self {
        Self {
            trigger: Arc::new(trigger),
            callable: Arc::new(callable),
            id: None,
            name: None,
            misfire_grace: Some(SignedDuration::from_secs(1)),
            coalesce: true,
            max_instances: 1,
            executor: DEFAULT_ALIAS.to_string(),
            store: DEFAULT_ALIAS.to_string(),
            replace_existing: false,
            paused: false,
        }
    }

    /// Explicit job id; auto-generated when omitted.
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Human label; defaults to the callable's name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Grace window for late firings; `None` keeps firings eligible forever.
    /// Defaults to one second.
    pub fn misfire_grace(mut self, grace: Option<SignedDuration>) -> Self {
        self.misfire_grace = grace;
        self
    }

    /// Defaults to true.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Defaults to 1.
    pub fn max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn executor(mut self, alias: &str) -> Self {
        self.executor = alias.to_string();
        self
    }

    pub fn store(mut self, alias: &str) -> Self {
        self.store = alias.to_string();
        self
    }

    /// Overwrite a job with the same id instead of failing.
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    /// Add the job parked; it will not fire until resumed.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub(crate) fn store_alias(&self) -> &str {
        &self.store
    }

    pub(crate) fn replaces_existing(&self) -> bool {
        self.replace_existing
    }

    /// Finalize into a [`Job`], computing the first fire time against `now`.
    pub(crate) fn build(self, now: &Zoned) -> Result<Job> {
        if self.max_instances == 0 {
            return Err(Error::ZeroMaxInstances);
        }
        if let Some(grace) = self.misfire_grace {
            if grace < SignedDuration::ZERO {
                return Err(Error::NegativeGrace);
            }
        }
        let next_run_time = if self.paused {
            None
        } else {
            self.trigger.next_fire_time(None, now)
        };
        let name = self
            .name
            .unwrap_or_else(|| self.callable.name().to_string());
        Ok(Job {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name,
            callable: self.callable,
            trigger: self.trigger,
            next_run_time,
            misfire_grace: self.misfire_grace,
            coalesce: self.coalesce,
            max_instances: self.max_instances,
            executor: self.executor,
            store: self.store,
        })
    }
}

/// A partial update for [`Scheduler::update_job`](crate::Scheduler::update_job).
/// Unset fields keep their current values; changing the trigger recomputes
/// the job's next run time.
#[derive(Default)]
pub struct JobChanges {
    pub(crate) name: Option<String>,
    pub(crate) trigger: Option<Arc<dyn Trigger>>,
    pub(crate) misfire_grace: Option<Option<SignedDuration>>,
    pub(crate) coalesce: Option<bool>,
    pub(crate) max_instances: Option<u32>,
    pub(crate) executor: Option<String>,
}

impl JobChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn trigger(mut self, trigger: impl Trigger + 'static) -> Self {
        self.trigger = Some(Arc::new(trigger));
        self
    }

    pub fn misfire_grace(mut self, grace: Option<SignedDuration>) -> Self {
        self.misfire_grace = Some(grace);
        self
    }

    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = Some(coalesce);
        self
    }

    pub fn max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = Some(max_instances);
        self
    }

    pub fn executor(mut self, alias: &str) -> Self {
        self.executor = Some(alias.to_string());
        self
    }

    /// Fold these changes into `job`, recomputing the next run time if the
    /// trigger changed (unless the job is paused).
    pub(crate) fn apply(self, job: &mut Job, now: &Zoned) -> Result<()> {
        if let Some(max_instances) = self.max_instances {
            if max_instances == 0 {
                return Err(Error::ZeroMaxInstances);
            }
            job.max_instances = max_instances;
        }
        if let Some(grace) = self.misfire_grace {
            if let Some(g) = grace {
                if g < SignedDuration::ZERO {
                    return Err(Error::NegativeGrace);
                }
            }
            job.misfire_grace = grace;
        }
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(coalesce) = self.coalesce {
            job.coalesce = coalesce;
        }
        if let Some(executor) = self.executor {
            job.executor = executor;
        }
        if let Some(trigger) = self.trigger {
            job.trigger = trigger;
            if !job.is_paused() {
                job.next_run_time = job.trigger.next_fire_time(None, now);
            }
        }
        Ok(())
    }
}

/// An ephemeral record handed to an executor: a snapshot of the job plus
/// every scheduled instant this submission covers.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job: Job,
    pub run_times: Vec<Zoned>,
}
