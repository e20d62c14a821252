//! Fixed-period trigger.

use crate::error::{Error, Result};
use crate::trigger::Trigger;
use jiff::{tz::TimeZone, SignedDuration, Timestamp, Zoned};
use std::fmt;

/// Fires on a fixed-period grid.
///
/// With an explicit `start`, firings land exactly on `start + k * period`
/// no matter how late the previous firing was observed; the first firing
/// is `start` itself, or the smallest grid point at or after `now` when
/// the start has already passed.  Without a start, the first firing is
/// `now + period` and subsequent firings step from the previous one.
/// Exhausts once the next firing would pass `end`.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    period: SignedDuration,
    start: Option<Zoned>,
    end: Option<Zoned>,
    tz: TimeZone,
}

/// Configures an [`IntervalTrigger`].  The period is the sum of the unit
/// setters and must come out longer than zero.
#[derive(Debug, Default)]
pub struct IntervalTriggerBuilder {
    weeks: i64,
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
    start: Option<Zoned>,
    end: Option<Zoned>,
    timezone: Option<TimeZone>,
}

impl IntervalTriggerBuilder {
    pub fn weeks(mut self, weeks: i64) -> Self {
        self.weeks = weeks;
        self
    }

    pub fn days(mut self, days: i64) -> Self {
        self.days = days;
        self
    }

    pub fn hours(mut self, hours: i64) -> Self {
        self.hours = hours;
        self
    }

    pub fn minutes(mut self, minutes: i64) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn seconds(mut self, seconds: i64) -> Self {
        self.seconds = seconds;
        self
    }

    /// Anchor of the firing grid and earliest allowed firing.
    pub fn start(mut self, start: Zoned) -> Self {
        self.start = Some(start);
        self
    }

    /// Latest allowed firing.
    pub fn end(mut self, end: Zoned) -> Self {
        self.end = Some(end);
        self
    }

    /// Timezone firing instants are rendered in.  Defaults to the system
    /// timezone.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.timezone = Some(tz);
        self
    }

    pub fn build(self) -> Result<IntervalTrigger> {
        let seconds = self.weeks * 7 * 86_400
            + self.days * 86_400
            + self.hours * 3_600
            + self.minutes * 60
            + self.seconds;
        if seconds <= 0 {
            return Err(Error::EmptyInterval);
        }
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if end < start {
                return Err(Error::EndBeforeStart);
            }
        }
        Ok(IntervalTrigger {
            period: SignedDuration::from_secs(seconds),
            start: self.start,
            end: self.end,
            tz: self.timezone.unwrap_or_else(TimeZone::system),
        })
    }
}

impl IntervalTrigger {
    pub fn builder() -> IntervalTriggerBuilder {
        IntervalTriggerBuilder::default()
    }

    /// Shorthand for a plain period with no start or end bound.
    pub fn every(period: SignedDuration) -> Result<Self> {
        if period <= SignedDuration::ZERO {
            return Err(Error::EmptyInterval);
        }
        Ok(Self {
            period,
            start: None,
            end: None,
            tz: TimeZone::system(),
        })
    }

    /// The configured period.
    pub fn period(&self) -> SignedDuration {
        self.period
    }

    fn render(&self, millis: i64) -> Option<Zoned> {
        let ts = Timestamp::from_millisecond(millis).ok()?;
        Some(ts.to_zoned(self.tz.clone()))
    }

    fn bounded(&self, candidate: Zoned) -> Option<Zoned> {
        match &self.end {
            Some(end) if candidate > *end => None,
            _ => Some(candidate),
        }
    }
}

impl Trigger for IntervalTrigger {
    fn next_fire_time(&self, previous: Option<&Zoned>, now: &Zoned) -> Option<Zoned> {
        let period_ms = self.period.as_millis() as i64;
        let candidate = match previous {
            None => match &self.start {
                Some(start) if *start > *now => start.timestamp().to_zoned(self.tz.clone()),
                Some(start) => {
                    // The start has already passed: ceil to the smallest
                    // grid point at or after now.
                    let start_ms = start.timestamp().as_millisecond();
                    let elapsed = now.timestamp().as_millisecond() - start_ms;
                    let k = (elapsed + period_ms - 1) / period_ms;
                    self.render(start_ms + k * period_ms)?
                }
                None => self.render(now.timestamp().as_millisecond() + period_ms)?,
            },
            Some(prev) => match &self.start {
                Some(start) if start > prev => start.timestamp().to_zoned(self.tz.clone()),
                Some(start) => {
                    // Smallest grid point strictly after `previous`.
                    let start_ms = start.timestamp().as_millisecond();
                    let elapsed = prev.timestamp().as_millisecond() - start_ms;
                    let k = elapsed / period_ms + 1;
                    self.render(start_ms + k * period_ms)?
                }
                None => self.render(prev.timestamp().as_millisecond() + period_ms)?,
            },
        };
        self.bounded(candidate)
    }
}

impl fmt::Display for IntervalTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "every {:?}", self.period)
    }
}
