//! Lifecycle events and the bus that fans them out to listeners.
//!
//! Events are facts about what the scheduler did, not commands; listeners
//! observe and never mutate.  Dispatch is synchronous on the thread that
//! produced the event, in listener registration order.

use jiff::{SignedDuration, Zoned};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, error};

/// Bitmask values for filtering listeners, combinable with `|`.
pub mod mask {
    pub const SCHEDULER_STARTED: u32 = 1 << 0;
    pub const SCHEDULER_SHUTDOWN: u32 = 1 << 1;
    pub const SCHEDULER_PAUSED: u32 = 1 << 2;
    pub const SCHEDULER_RESUMED: u32 = 1 << 3;
    pub const STORE_ADDED: u32 = 1 << 4;
    pub const STORE_REMOVED: u32 = 1 << 5;
    pub const EXECUTOR_ADDED: u32 = 1 << 6;
    pub const EXECUTOR_REMOVED: u32 = 1 << 7;
    pub const ALL_JOBS_REMOVED: u32 = 1 << 8;
    pub const JOB_ADDED: u32 = 1 << 9;
    pub const JOB_MODIFIED: u32 = 1 << 10;
    pub const JOB_REMOVED: u32 = 1 << 11;
    pub const JOB_SUBMITTED: u32 = 1 << 12;
    pub const JOB_MAX_INSTANCES: u32 = 1 << 13;
    pub const JOB_EXECUTED: u32 = 1 << 14;
    pub const JOB_ERROR: u32 = 1 << 15;
    pub const JOB_MISSED: u32 = 1 << 16;

    /// Every event.
    pub const ALL: u32 = (1 << 17) - 1;
}

/// Distinguishes whose fault a failed run was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// The work function returned an error or panicked.
    UserCode,
    /// The executor could not run the work at all (e.g. it was shut down
    /// while the run was still queued).
    Infrastructure,
}

/// A fact about the scheduler lifecycle.
///
/// Every variant records when it happened; job-related variants identify the
/// job and, where relevant, the scheduled run time(s) involved.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    SchedulerStarted {
        time: Zoned,
    },
    SchedulerShutdown {
        time: Zoned,
    },
    SchedulerPaused {
        time: Zoned,
    },
    SchedulerResumed {
        time: Zoned,
    },
    StoreAdded {
        time: Zoned,
        alias: String,
    },
    StoreRemoved {
        time: Zoned,
        alias: String,
    },
    ExecutorAdded {
        time: Zoned,
        alias: String,
    },
    ExecutorRemoved {
        time: Zoned,
        alias: String,
    },
    AllJobsRemoved {
        time: Zoned,
        store: String,
    },
    JobAdded {
        time: Zoned,
        job_id: String,
        store: String,
    },
    JobModified {
        time: Zoned,
        job_id: String,
        store: String,
    },
    JobRemoved {
        time: Zoned,
        job_id: String,
        store: String,
    },
    /// The executor accepted a run of this job.
    JobSubmitted {
        time: Zoned,
        job_id: String,
        executor: String,
        run_times: Vec<Zoned>,
    },
    /// A due firing was skipped because the job was already running at its
    /// concurrency cap.
    JobMaxInstances {
        time: Zoned,
        job_id: String,
        executor: String,
        max_instances: u32,
    },
    /// A run finished cleanly.
    JobExecuted {
        time: Zoned,
        job_id: String,
        run_time: Zoned,
        duration: SignedDuration,
        output: Option<serde_json::Value>,
    },
    /// A run failed; `kind` says whether user code or the executor broke.
    JobError {
        time: Zoned,
        job_id: String,
        run_time: Zoned,
        error: String,
        kind: FailureKind,
    },
    /// A firing was dropped because it was older than the job's grace window.
    JobMissed {
        time: Zoned,
        job_id: String,
        run_time: Zoned,
    },
}

impl Event {
    /// The bitmask bit for this event, for matching against listener masks.
    pub fn code(&self) -> u32 {
        match self {
            Event::SchedulerStarted { .. } => mask::SCHEDULER_STARTED,
            Event::SchedulerShutdown { .. } => mask::SCHEDULER_SHUTDOWN,
            Event::SchedulerPaused { .. } => mask::SCHEDULER_PAUSED,
            Event::SchedulerResumed { .. } => mask::SCHEDULER_RESUMED,
            Event::StoreAdded { .. } => mask::STORE_ADDED,
            Event::StoreRemoved { .. } => mask::STORE_REMOVED,
            Event::ExecutorAdded { .. } => mask::EXECUTOR_ADDED,
            Event::ExecutorRemoved { .. } => mask::EXECUTOR_REMOVED,
            Event::AllJobsRemoved { .. } => mask::ALL_JOBS_REMOVED,
            Event::JobAdded { .. } => mask::JOB_ADDED,
            Event::JobModified { .. } => mask::JOB_MODIFIED,
            Event::JobRemoved { .. } => mask::JOB_REMOVED,
            Event::JobSubmitted { .. } => mask::JOB_SUBMITTED,
            Event::JobMaxInstances { .. } => mask::JOB_MAX_INSTANCES,
            Event::JobExecuted { .. } => mask::JOB_EXECUTED,
            Event::JobError { .. } => mask::JOB_ERROR,
            Event::JobMissed { .. } => mask::JOB_MISSED,
        }
    }

    /// When the event happened.
    pub fn time(&self) -> &Zoned {
        match self {
            Event::SchedulerStarted { time }
            | Event::SchedulerShutdown { time }
            | Event::SchedulerPaused { time }
            | Event::SchedulerResumed { time }
            | Event::StoreAdded { time, .. }
            | Event::StoreRemoved { time, .. }
            | Event::ExecutorAdded { time, .. }
            | Event::ExecutorRemoved { time, .. }
            | Event::AllJobsRemoved { time, .. }
            | Event::JobAdded { time, .. }
            | Event::JobModified { time, .. }
            | Event::JobRemoved { time, .. }
            | Event::JobSubmitted { time, .. }
            | Event::JobMaxInstances { time, .. }
            | Event::JobExecuted { time, .. }
            | Event::JobError { time, .. }
            | Event::JobMissed { time, .. } => time,
        }
    }
}

/// Handle returned by [`EventBus::add_listener`], used to deregister.
///
/// Listener identity is a token rather than callback equality; Rust closures
/// have no usable notion of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerFn = Arc<dyn Fn(&Event) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    mask: u32,
    callback: ListenerFn,
}

/// Fan-out of [`Event`]s to registered listeners.
///
/// Listeners run synchronously on whichever thread dispatched the event --
/// the scheduler's own task for loop events, an executor worker for
/// completion events.  A panicking listener is logged and skipped; it never
/// disturbs other listeners or the dispatching thread.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every event whose code is in `mask`.
    pub fn add_listener<F>(&self, mask: u32, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(ListenerEntry {
            id,
            mask,
            callback: Arc::new(callback),
        });
        ListenerId(id)
    }

    /// Deregister a listener.  Returns false if the id was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id.0);
        listeners.len() != before
    }

    /// Deliver an event to every listener whose mask matches.
    pub(crate) fn dispatch(&self, event: Event) {
        let code = event.code();
        debug!(code, event = ?event, "dispatching event");
        // Snapshot the matching callbacks so a listener that registers or
        // removes listeners does not deadlock the bus.
        let matching: Vec<ListenerFn> = self
            .listeners
            .lock()
            .iter()
            .filter(|entry| entry.mask & code != 0)
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in matching {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                error!(
                    code,
                    reason = panic_message(&*panic),
                    "event listener panicked"
                );
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Best-effort extraction of a panic payload for logging.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panicked".to_string()
    }
}
