//! This module defines the error type and Result alias.

use thiserror::Error;

/// Everything that can go wrong while configuring or driving a scheduler.
///
/// Configuration problems surface to the caller synchronously; operational
/// problems inside the dispatch loop are converted to events and logged, so
/// most of these variants are only ever seen at the API boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `add_job` was given an id that already exists in the target store.
    #[error("a job with id {0} already exists in this store")]
    ConflictingId(String),

    /// An operation referenced a job id that no store knows about.
    #[error("no job with id {0} was found")]
    JobLookup(String),

    /// An operation referenced an unknown store alias.
    #[error("no job store registered under alias {0}")]
    StoreLookup(String),

    /// An operation referenced an unknown executor alias.
    #[error("no executor registered under alias {0}")]
    ExecutorLookup(String),

    /// `add_store`/`add_executor` was given an alias that is already taken.
    #[error("alias {0} is already in use")]
    ConflictingAlias(String),

    /// The executor is already tracking `max_instances` in-flight runs of
    /// this job.  The scheduler converts this into a `JobMaxInstances`
    /// event rather than reporting it to the caller.
    #[error("job {job_id} already has {max_instances} run(s) in flight")]
    MaxInstancesReached { job_id: String, max_instances: u32 },

    /// `start` was called on a scheduler that is already running.
    #[error("scheduler is already running")]
    SchedulerAlreadyRunning,

    /// A lifecycle operation that needs a running scheduler found a stopped one.
    #[error("scheduler is not running")]
    SchedulerNotRunning,

    /// A run was submitted to an executor that has not started or has shut down.
    #[error("executor is not running")]
    ExecutorStopped,

    /// A cron field failed to parse or named values outside its domain.
    #[error("invalid {field} field {value:?}: {reason}")]
    CronField {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// An interval trigger was built with a zero-length period.
    #[error("interval must be longer than zero")]
    EmptyInterval,

    /// An `AndTrigger`/`OrTrigger` was built with no child triggers.
    #[error("combining triggers require at least one child trigger")]
    EmptyCombinator,

    /// A trigger was configured with an end time before its start time.
    #[error("end time precedes start time")]
    EndBeforeStart,

    /// `max_instances` must allow at least one concurrent run.
    #[error("max_instances must be at least one")]
    ZeroMaxInstances,

    /// A negative misfire grace window makes every firing a miss.
    #[error("misfire grace must not be negative")]
    NegativeGrace,

    /// A persistent store could not rehydrate a serialized job.  The store
    /// reports the record as unreadable and continues with the rest.
    #[error("job store could not rehydrate job {job_id}: {reason}")]
    Deserialization { job_id: String, reason: String },

    /// Datetime arithmetic failed (usually overflow far in the future).
    #[error(transparent)]
    Time(#[from] jiff::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
