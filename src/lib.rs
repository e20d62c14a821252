//! # metronome
//!
//! `metronome` is an in-process job scheduler.  Jobs pair a work function
//! with a [`Trigger`] that computes firing instants; the [`Scheduler`]
//! keeps them in pluggable [`JobStore`]s, wakes at the earliest due time,
//! hands due runs to an [`Executor`], and reports everything that happens
//! as [`Event`]s.
//!
//! ```no_run
//! use metronome::{mask, CronTrigger, JobBuilder, Scheduler, UnitToUnit};
//!
//! fn backup() -> metronome::JobOutcome {
//!     println!("backing up...");
//!     Ok(None)
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> metronome::Result<()> {
//! let scheduler = Scheduler::new();
//! scheduler.add_listener(mask::JOB_ERROR, |event| eprintln!("{event:?}"));
//!
//! let nightly = CronTrigger::builder().hour("3").minute("30").build()?;
//! scheduler
//!     .add_job(JobBuilder::new(nightly, UnitToUnit::new("backup", backup)))
//!     .await?;
//! scheduler.start(false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Firing semantics worth knowing:
//!
//! - A job's `misfire_grace` bounds how late a firing may run; older
//!   firings are dropped with a `JobMissed` event.
//! - `coalesce` folds several missed firings into a single run at the
//!   latest missed instant.
//! - `max_instances` caps concurrent runs per job; firings over the cap
//!   are skipped with a `JobMaxInstances` event for that tick.

pub mod callable;
pub mod error;
pub mod event;
pub mod executor;
pub mod job;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod trigger;

pub use callable::{Callable, Closure, JobFailure, JobOutcome, OneToUnit, ThreeToUnit, TwoToUnit, UnitToUnit};
pub use error::{Error, Result};
pub use event::{mask, Event, EventBus, FailureKind, ListenerId};
pub use executor::{Executor, ExecutorContext, ThreadPoolExecutor, TokioExecutor};
pub use job::{Job, JobBuilder, JobChanges, RunRequest, DEFAULT_ALIAS};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerState};
pub use store::{JobStore, MemoryStore};
pub use time::{Clock, ManualClock, SystemClock};
pub use trigger::{
    AndTrigger, CronTrigger, CronTriggerBuilder, DateTrigger, IntervalTrigger,
    IntervalTriggerBuilder, OrTrigger, Trigger,
};
