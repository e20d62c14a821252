//! Combinators over other triggers.

use crate::error::{Error, Result};
use crate::trigger::Trigger;
use jiff::Zoned;
use std::{fmt, sync::Arc};
use tracing::warn;

/// How many child probes an [`AndTrigger`] will spend converging before it
/// gives up and reports exhaustion.
const MAX_AND_PROBES: usize = 1000;

/// Fires only at instants every child trigger agrees on.
///
/// Convergence advances each straggling child to the current maximum
/// candidate until all children return the same instant.  Children whose
/// firing grids never meet (say, a one-shot date off an interval's grid)
/// make the composite exhaust, as does blowing the probe budget on
/// pathological configurations.
pub struct AndTrigger {
    children: Vec<Arc<dyn Trigger>>,
}

impl AndTrigger {
    pub fn new(children: Vec<Arc<dyn Trigger>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::EmptyCombinator);
        }
        Ok(Self { children })
    }
}

impl Trigger for AndTrigger {
    fn next_fire_time(&self, previous: Option<&Zoned>, now: &Zoned) -> Option<Zoned> {
        let mut candidates = Vec::with_capacity(self.children.len());
        for child in &self.children {
            candidates.push(child.next_fire_time(previous, now)?);
        }

        let mut probes = 0;
        loop {
            let target = candidates.iter().max()?.clone();
            let mut aligned = true;
            for (candidate, child) in candidates.iter_mut().zip(&self.children) {
                while *candidate < target {
                    probes += 1;
                    if probes > MAX_AND_PROBES {
                        warn!(
                            probes = MAX_AND_PROBES,
                            "AndTrigger children never agreed on a fire time"
                        );
                        return None;
                    }
                    let advanced = child.next_fire_time(Some(candidate), now)?;
                    if advanced <= *candidate {
                        // A child violating strict monotonicity would spin
                        // here forever; treat it as exhausted instead.
                        warn!("child trigger returned a non-increasing fire time");
                        return None;
                    }
                    *candidate = advanced;
                }
                if *candidate > target {
                    aligned = false;
                }
            }
            if aligned {
                return Some(target);
            }
        }
    }
}

impl fmt::Debug for AndTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AndTrigger")
            .field("children", &self.children)
            .finish()
    }
}

/// Fires at the earliest instant any child would fire.
pub struct OrTrigger {
    children: Vec<Arc<dyn Trigger>>,
}

impl OrTrigger {
    pub fn new(children: Vec<Arc<dyn Trigger>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::EmptyCombinator);
        }
        Ok(Self { children })
    }
}

impl Trigger for OrTrigger {
    fn next_fire_time(&self, previous: Option<&Zoned>, now: &Zoned) -> Option<Zoned> {
        self.children
            .iter()
            .filter_map(|child| child.next_fire_time(previous, now))
            .min()
    }
}

impl fmt::Debug for OrTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OrTrigger")
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{DateTrigger, IntervalTrigger};
    use jiff::{civil, tz::TimeZone, ToSpan as _};
    use pretty_assertions::assert_eq;

    fn utc(h: i8, mi: i8, s: i8) -> Zoned {
        civil::date(2025, 1, 6)
            .at(h, mi, s, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap()
    }

    fn interval(seconds: i64, start: Zoned) -> Arc<dyn Trigger> {
        Arc::new(
            IntervalTrigger::builder()
                .seconds(seconds)
                .start(start)
                .timezone(TimeZone::UTC)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn or_takes_the_earliest_child() {
        // every 5s from T, plus a one-shot at T+2.
        let t = utc(9, 0, 0);
        let or = OrTrigger::new(vec![
            interval(5, t.clone()),
            Arc::new(DateTrigger::at(t.checked_add(2.seconds()).unwrap())),
        ])
        .unwrap();

        let now = t.checked_add(1.seconds()).unwrap();
        let first = or.next_fire_time(None, &now).unwrap();
        assert_eq!(first, utc(9, 0, 2));

        let second = or.next_fire_time(Some(&first), &now).unwrap();
        assert_eq!(second, utc(9, 0, 5));

        let third = or.next_fire_time(Some(&second), &now).unwrap();
        assert_eq!(third, utc(9, 0, 10));
    }

    #[test]
    fn or_ignores_exhausted_children() {
        let t = utc(9, 0, 0);
        let or = OrTrigger::new(vec![
            Arc::new(DateTrigger::at(t.clone())),
            interval(5, t.clone()),
        ])
        .unwrap();
        // The date child is spent; the interval keeps going.
        let now = t.clone();
        assert_eq!(or.next_fire_time(Some(&t), &now).unwrap(), utc(9, 0, 5));
    }

    #[test]
    fn or_is_exhausted_only_when_all_children_are() {
        let t = utc(9, 0, 0);
        let or = OrTrigger::new(vec![Arc::new(DateTrigger::at(t.clone()))]).unwrap();
        let now = t.clone();
        assert!(or.next_fire_time(Some(&t), &now).is_none());
    }

    #[test]
    fn and_converges_on_the_common_grid() {
        // 2s and 3s grids from the same anchor meet every 6s.
        let t = utc(9, 0, 0);
        let and = AndTrigger::new(vec![interval(2, t.clone()), interval(3, t.clone())]).unwrap();

        let now = t.clone();
        let first = and.next_fire_time(Some(&t), &now).unwrap();
        assert_eq!(first, utc(9, 0, 6));
        let second = and.next_fire_time(Some(&first), &now).unwrap();
        assert_eq!(second, utc(9, 0, 12));
    }

    #[test]
    fn and_with_unaligned_one_shot_exhausts() {
        let t = utc(9, 0, 0);
        let and = AndTrigger::new(vec![
            Arc::new(DateTrigger::at(t.checked_add(1.seconds()).unwrap())),
            interval(2, t.clone()),
        ])
        .unwrap();
        // The date fires only at T+1, the interval only at even offsets;
        // there is no common instant.
        let now = t.clone();
        assert!(and.next_fire_time(None, &now).is_none());
    }

    #[test]
    fn and_agrees_immediately_when_children_align() {
        let t = utc(9, 0, 0);
        let and = AndTrigger::new(vec![
            interval(5, t.checked_add(5.seconds()).unwrap()),
            Arc::new(DateTrigger::at(utc(9, 0, 5))),
        ])
        .unwrap();
        let now = t.clone();
        assert_eq!(and.next_fire_time(None, &now).unwrap(), utc(9, 0, 5));
    }

    #[test]
    fn empty_combinators_are_construction_errors() {
        assert!(matches!(
            AndTrigger::new(Vec::new()),
            Err(Error::EmptyCombinator)
        ));
        assert!(matches!(
            OrTrigger::new(Vec::new()),
            Err(Error::EmptyCombinator)
        ));
    }

    #[test]
    fn and_gives_up_after_the_probe_budget() {
        // Two 2-second grids, one second out of phase: even offsets never
        // equal odd offsets, so convergence can only stop at the budget.
        let a = interval(2, utc(9, 0, 0));
        let b = interval(2, utc(9, 0, 1));
        let and = AndTrigger::new(vec![a, b]).unwrap();
        let now = utc(9, 0, 0);
        assert!(and.next_fire_time(Some(&utc(9, 0, 0)), &now).is_none());
    }
}
