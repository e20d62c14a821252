//! One-shot trigger: fires exactly once at a fixed instant.

use crate::trigger::Trigger;
use jiff::Zoned;
use std::fmt;

/// Fires once at the configured instant, then reports exhaustion.
///
/// If the instant is already in the past when the job is scheduled, the
/// dispatcher decides via the job's grace window whether the run still
/// happens or is reported as missed.
#[derive(Debug, Clone)]
pub struct DateTrigger {
    run_at: Zoned,
}

impl DateTrigger {
    pub fn at(run_at: Zoned) -> Self {
        Self { run_at }
    }
}

impl Trigger for DateTrigger {
    fn next_fire_time(&self, previous: Option<&Zoned>, _now: &Zoned) -> Option<Zoned> {
        match previous {
            None => Some(self.run_at.clone()),
            Some(_) => None,
        }
    }
}

impl fmt::Display for DateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "once at {}", self.run_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::{civil, tz::TimeZone, ToSpan as _};
    use pretty_assertions::assert_eq;

    fn run_at() -> Zoned {
        civil::date(2025, 1, 6)
            .at(9, 0, 0, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap()
    }

    #[test]
    fn fires_once_then_exhausts() {
        let trigger = DateTrigger::at(run_at());
        let now = run_at().checked_sub(1.hours()).unwrap();

        let first = trigger.next_fire_time(None, &now).unwrap();
        assert_eq!(first, run_at());
        assert!(trigger.next_fire_time(Some(&first), &now).is_none());
    }

    #[test]
    fn past_instants_are_still_returned() {
        // Late scheduling is the dispatcher's problem, not the trigger's.
        let trigger = DateTrigger::at(run_at());
        let now = run_at().checked_add(1.hours()).unwrap();
        assert_eq!(trigger.next_fire_time(None, &now).unwrap(), run_at());
    }
}
