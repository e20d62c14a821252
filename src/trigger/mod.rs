//! Triggers decide when a job fires next.
//!
//! A trigger is a pure function of `(previous fire time, now)`; all of its
//! state is the configuration it was built with.  Returned instants are
//! strictly greater than `previous` but may lie in the past -- lateness is
//! judged by the dispatcher against the job's grace window, not here.

mod combining;
mod cron;
mod date;
mod interval;

pub use combining::{AndTrigger, OrTrigger};
pub use cron::{CronTrigger, CronTriggerBuilder};
pub use date::DateTrigger;
pub use interval::{IntervalTrigger, IntervalTriggerBuilder};

use jiff::Zoned;
use std::fmt;

/// Computes the next instant a job should fire.
///
/// Implementations must be deterministic (same inputs, same output) and
/// strictly monotonic in `previous`: a non-`None` result is always greater
/// than the `previous` it was derived from.  `None` means the trigger is
/// exhausted and the job can be retired.
pub trait Trigger: fmt::Debug + Send + Sync {
    fn next_fire_time(&self, previous: Option<&Zoned>, now: &Zoned) -> Option<Zoned>;
}
