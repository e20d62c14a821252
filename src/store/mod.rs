//! Job stores hold the scheduler's jobs, keyed by id and indexed by next
//! run time.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::job::Job;
use async_trait::async_trait;
use jiff::Zoned;
use std::fmt;

/// A collection of jobs owned by one scheduler.
///
/// Implementations must make each mutation atomic with respect to the read
/// operations, so the dispatch loop never observes a half-applied update.
/// Persistent backends serialize the full job and must rehydrate it
/// identically; a record that fails to deserialize is reported via
/// [`Error::Deserialization`](crate::Error::Deserialization) (and skipped),
/// never allowed to wedge the rest of the store.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug {
    /// Called when the owning scheduler starts, with the alias this store
    /// is registered under.
    async fn start(&self, _alias: &str) -> Result<()> {
        Ok(())
    }

    /// Called when the owning scheduler shuts down.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Insert a new job.  Fails with `ConflictingId` if the id is taken.
    async fn add_job(&self, job: Job) -> Result<()>;

    /// Replace a job by id.  Fails with `JobLookup` if it is absent.
    async fn update_job(&self, job: Job) -> Result<()>;

    /// Remove a job by id.  Fails with `JobLookup` if it is absent.
    async fn remove_job(&self, job_id: &str) -> Result<()>;

    /// Drop every job in the store.
    async fn remove_all_jobs(&self) -> Result<()>;

    /// Fetch a job by id.
    async fn lookup_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Every job with `next_run_time <= now`, ascending by
    /// `(next_run_time, id)`.
    async fn get_due_jobs(&self, now: &Zoned) -> Result<Vec<Job>>;

    /// The earliest next run time across all jobs, if any job is scheduled.
    async fn get_next_run_time(&self) -> Result<Option<Zoned>>;

    /// Every job, ascending by next run time with parked jobs last.
    async fn get_all_jobs(&self) -> Result<Vec<Job>>;
}
