//! The in-memory reference job store.

use crate::error::{Error, Result};
use crate::job::Job;
use crate::store::JobStore;
use async_trait::async_trait;
use jiff::Zoned;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Keeps jobs in process memory: a map by id plus an id list kept sorted by
/// `(next_run_time, id)` with parked jobs at the end.  Every operation takes
/// the one lock, which is what makes mutations atomic against the dispatch
/// loop's reads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    /// Job ids ordered by due time.  Resorted on every mutation; lookups by
    /// time are then a prefix scan.
    index: Vec<String>,
}

impl Inner {
    fn resort(&mut self) {
        let jobs = &self.jobs;
        self.index.sort_by(|a, b| {
            // Ids in the index always resolve; they are inserted and removed
            // together with the map entries under the same lock.
            match (jobs.get(a), jobs.get(b)) {
                (Some(a), Some(b)) => a.due_order(b),
                _ => a.cmp(b),
            }
        });
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn start(&self, alias: &str) -> Result<()> {
        debug!(alias, "memory store started");
        Ok(())
    }

    async fn add_job(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(Error::ConflictingId(job.id));
        }
        inner.index.push(job.id.clone());
        inner.jobs.insert(job.id.clone(), job);
        inner.resort();
        Ok(())
    }

    async fn update_job(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.jobs.contains_key(&job.id) {
            return Err(Error::JobLookup(job.id));
        }
        inner.jobs.insert(job.id.clone(), job);
        inner.resort();
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.jobs.remove(job_id).is_none() {
            return Err(Error::JobLookup(job_id.to_string()));
        }
        inner.index.retain(|id| id != job_id);
        Ok(())
    }

    async fn remove_all_jobs(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.jobs.clear();
        inner.index.clear();
        Ok(())
    }

    async fn lookup_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().jobs.get(job_id).cloned())
    }

    async fn get_due_jobs(&self, now: &Zoned) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        let mut due = Vec::new();
        for id in &inner.index {
            let Some(job) = inner.jobs.get(id) else {
                continue;
            };
            match &job.next_run_time {
                Some(next) if *next <= *now => due.push(job.clone()),
                // The index is sorted, so the first non-due entry ends the scan.
                _ => break,
            }
        }
        Ok(due)
    }

    async fn get_next_run_time(&self) -> Result<Option<Zoned>> {
        let inner = self.inner.lock();
        Ok(inner
            .index
            .first()
            .and_then(|id| inner.jobs.get(id))
            .and_then(|job| job.next_run_time.clone()))
    }

    async fn get_all_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.inner.lock();
        Ok(inner
            .index
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{JobOutcome, UnitToUnit};
    use crate::job::JobBuilder;
    use crate::trigger::{DateTrigger, IntervalTrigger};
    use jiff::{civil, tz::TimeZone, ToSpan as _};
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

    fn job_at(id: &str, offset_seconds: i64) -> Job {
        let run_at = nine().checked_add(offset_seconds.seconds()).unwrap();
        JobBuilder::new(DateTrigger::at(run_at), UnitToUnit::new("no_op", no_op))
            .id(id)
            .build(&nine())
            .unwrap()
    }

    fn parked_job(id: &str) -> Job {
        let trigger = IntervalTrigger::builder()
            .seconds(5)
            .timezone(TimeZone::UTC)
            .build()
            .unwrap();
        JobBuilder::new(trigger, UnitToUnit::new("no_op", no_op))
            .id(id)
            .paused(true)
            .build(&nine())
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_ids_conflict() {
        let store = MemoryStore::new();
        store.add_job(job_at("a", 0)).await.unwrap();
        let err = store.add_job(job_at("a", 10)).await.unwrap_err();
        assert!(matches!(err, Error::ConflictingId(id) if id == "a"));
    }

    #[tokio::test]
    async fn update_requires_existing_job() {
        let store = MemoryStore::new();
        let err = store.update_job(job_at("ghost", 0)).await.unwrap_err();
        assert!(matches!(err, Error::JobLookup(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn remove_is_not_idempotent() {
        let store = MemoryStore::new();
        store.add_job(job_at("a", 0)).await.unwrap();
        store.remove_job("a").await.unwrap();
        assert!(matches!(
            store.remove_job("a").await,
            Err(Error::JobLookup(_))
        ));
        // Re-adding after removal is fine.
        store.add_job(job_at("a", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn due_jobs_are_exactly_those_at_or_before_now() {
        let store = MemoryStore::new();
        store.add_job(job_at("late", 120)).await.unwrap();
        store.add_job(job_at("now", 60)).await.unwrap();
        store.add_job(job_at("early", 0)).await.unwrap();
        store.add_job(parked_job("parked")).await.unwrap();

        let now = nine().checked_add(60.seconds()).unwrap();
        let due = store.get_due_jobs(&now).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|j| j.id.as_str()).collect();
        // Boundary is inclusive and order ascending.
        assert_eq!(ids, vec!["early", "now"]);
    }

    #[tokio::test]
    async fn due_ties_break_by_id() {
        let store = MemoryStore::new();
        store.add_job(job_at("b", 0)).await.unwrap();
        store.add_job(job_at("a", 0)).await.unwrap();
        let due = store.get_due_jobs(&nine()).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn next_run_time_is_the_earliest() {
        let store = MemoryStore::new();
        assert_eq!(store.get_next_run_time().await.unwrap(), None);

        store.add_job(job_at("later", 30)).await.unwrap();
        store.add_job(job_at("sooner", 10)).await.unwrap();
        assert_eq!(
            store.get_next_run_time().await.unwrap(),
            Some(nine().checked_add(10.seconds()).unwrap())
        );
    }

    #[tokio::test]
    async fn parked_jobs_sort_last_and_never_lead() {
        let store = MemoryStore::new();
        store.add_job(parked_job("parked")).await.unwrap();
        // A store of only parked jobs has no next run time.
        assert_eq!(store.get_next_run_time().await.unwrap(), None);

        store.add_job(job_at("active", 5)).await.unwrap();
        let all = store.get_all_jobs().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["active", "parked"]);
    }

    #[tokio::test]
    async fn updates_reorder_the_index() {
        let store = MemoryStore::new();
        store.add_job(job_at("a", 10)).await.unwrap();
        store.add_job(job_at("b", 20)).await.unwrap();

        let mut moved = store.lookup_job("b").await.unwrap().unwrap();
        moved.next_run_time = Some(nine());
        store.update_job(moved).await.unwrap();

        let all = store.get_all_jobs().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn remove_all_empties_the_store() {
        let store = MemoryStore::new();
        store.add_job(job_at("a", 0)).await.unwrap();
        store.add_job(job_at("b", 5)).await.unwrap();
        store.remove_all_jobs().await.unwrap();
        assert!(store.get_all_jobs().await.unwrap().is_empty());
        assert_eq!(store.get_next_run_time().await.unwrap(), None);
    }
}
