//! Calendar-field trigger: fires at every instant matching a set of cron
//! field constraints.

mod field;

use crate::error::{Error, Result};
use crate::trigger::Trigger;
use field::{CronField, FieldKind};
use jiff::{civil, tz::TimeZone, SignedDuration, ToSpan as _, Zoned};
use std::fmt;

/// Fires at every instant whose calendar fields all match.
///
/// Fields accept `*`, steps (`*/2`), ranges (`1-5`, `mon-fri`), lists
/// (`1,15,last`), three-letter month and weekday names, and -- in the day
/// field -- `last` and `last <weekday>`.  Weekdays are numbered 0=Monday
/// through 6=Sunday.
///
/// Fields you leave out are filled in: anything more significant than the
/// least significant field you specified becomes `*`, anything less
/// significant snaps to its minimum (week and weekday stay unconstrained).
/// So `hour = "9"` means 09:00:00 every day, not every second of hour nine.
///
/// ```
/// use metronome::CronTrigger;
///
/// // Weekdays at 09:30:00 in the scheduler's zone.
/// let trigger = CronTrigger::builder()
///     .day_of_week("mon-fri")
///     .hour("9")
///     .minute("30")
///     .build()?;
/// # Ok::<(), metronome::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct CronTrigger {
    year: CronField,
    month: CronField,
    day: CronField,
    week: CronField,
    day_of_week: CronField,
    hour: CronField,
    minute: CronField,
    second: CronField,
    start: Option<Zoned>,
    end: Option<Zoned>,
    tz: TimeZone,
}

/// Configures a [`CronTrigger`].  Field setters take the textual field spec.
#[derive(Debug, Default)]
pub struct CronTriggerBuilder {
    specs: [Option<String>; 8],
    start: Option<Zoned>,
    end: Option<Zoned>,
    timezone: Option<TimeZone>,
}

// Most significant first; the index order is relied on when defaulting.
const KINDS: [FieldKind; 8] = [
    FieldKind::Year,
    FieldKind::Month,
    FieldKind::Day,
    FieldKind::Week,
    FieldKind::DayOfWeek,
    FieldKind::Hour,
    FieldKind::Minute,
    FieldKind::Second,
];

impl CronTriggerBuilder {
    fn spec(mut self, index: usize, value: &str) -> Self {
        self.specs[index] = Some(value.to_string());
        self
    }

    pub fn year(self, spec: &str) -> Self {
        self.spec(0, spec)
    }

    pub fn month(self, spec: &str) -> Self {
        self.spec(1, spec)
    }

    pub fn day(self, spec: &str) -> Self {
        self.spec(2, spec)
    }

    /// ISO week of the year, 1-53.
    pub fn week(self, spec: &str) -> Self {
        self.spec(3, spec)
    }

    pub fn day_of_week(self, spec: &str) -> Self {
        self.spec(4, spec)
    }

    pub fn hour(self, spec: &str) -> Self {
        self.spec(5, spec)
    }

    pub fn minute(self, spec: &str) -> Self {
        self.spec(6, spec)
    }

    pub fn second(self, spec: &str) -> Self {
        self.spec(7, spec)
    }

    /// Earliest instant the trigger may fire.
    pub fn start(mut self, start: Zoned) -> Self {
        self.start = Some(start);
        self
    }

    /// Latest instant the trigger may fire.
    pub fn end(mut self, end: Zoned) -> Self {
        self.end = Some(end);
        self
    }

    /// Timezone the calendar fields are evaluated in.  Defaults to the
    /// system timezone.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.timezone = Some(tz);
        self
    }

    pub fn build(self) -> Result<CronTrigger> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if end < start {
                return Err(Error::EndBeforeStart);
            }
        }

        // The least significant field the user pinned down; with nothing
        // specified, behave like classic crontab (every minute, at :00).
        let least_significant = self
            .specs
            .iter()
            .rposition(|spec| spec.is_some())
            .unwrap_or(6);

        let field = |index: usize| -> Result<CronField> {
            let kind = KINDS[index];
            match &self.specs[index] {
                Some(spec) => CronField::parse(kind, spec),
                None if index <= least_significant => Ok(CronField::wildcard(kind)),
                // Week and weekday never default to a pinned value; a bare
                // `hour = 9` should not mean "only on Mondays".
                None if matches!(kind, FieldKind::Week | FieldKind::DayOfWeek) => {
                    Ok(CronField::wildcard(kind))
                }
                None => Ok(CronField::minimum(kind)),
            }
        };

        let year = field(0)?;
        let month = field(1)?;
        let day = field(2)?;
        let week = field(3)?;
        let day_of_week = field(4)?;
        let hour = field(5)?;
        let minute = field(6)?;
        let second = field(7)?;

        Ok(CronTrigger {
            year,
            month,
            day,
            week,
            day_of_week,
            hour,
            minute,
            second,
            start: self.start,
            end: self.end,
            tz: self.timezone.unwrap_or_else(TimeZone::system),
        })
    }
}

impl CronTrigger {
    pub fn builder() -> CronTriggerBuilder {
        CronTriggerBuilder::default()
    }

    /// Build from a classic five-field crontab line:
    /// `minute hour day month day_of_week`.
    ///
    /// Note that numeric weekdays use this library's numbering (0=Monday);
    /// prefer names (`mon`, `fri`) in expressions that move between systems.
    pub fn from_crontab(expr: &str) -> Result<Self> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, day_of_week] = tokens[..] else {
            return Err(Error::CronField {
                field: "crontab",
                value: expr.to_string(),
                reason: "expected 5 whitespace-separated fields".to_string(),
            });
        };
        Self::builder()
            .minute(minute)
            .hour(hour)
            .day(day)
            .month(month)
            .day_of_week(day_of_week)
            .build()
    }

    fn date_matches(&self, date: civil::Date) -> bool {
        self.day.matches_date(date)
            && self
                .day_of_week
                .matches(i16::from(date.weekday().to_monday_zero_offset()))
            && self.week.matches(i16::from(date.iso_week_date().week()))
    }

    /// Smallest matching time-of-day at or after `(h0, m0, s0)`, if any is
    /// left in the day.
    fn next_time(&self, h0: i8, m0: i8, s0: i8) -> Option<civil::Time> {
        for hour in h0..=23 {
            if !self.hour.matches(i16::from(hour)) {
                continue;
            }
            let minute_lo = if hour == h0 { m0 } else { 0 };
            for minute in minute_lo..=59 {
                if !self.minute.matches(i16::from(minute)) {
                    continue;
                }
                let second_lo = if hour == h0 && minute == m0 { s0 } else { 0 };
                for second in second_lo..=59 {
                    if self.second.matches(i16::from(second)) {
                        return civil::Time::new(hour, minute, second, 0).ok();
                    }
                }
            }
        }
        None
    }

    /// Smallest civil datetime `>= floor` matching every field, searching no
    /// further than `bound_year`.
    fn next_civil(&self, floor: civil::DateTime, bound_year: i16) -> Option<civil::DateTime> {
        let floor_date = floor.date();
        let mut year = floor_date.year();
        while year <= bound_year {
            if !self.year.matches(year) {
                year += 1;
                continue;
            }
            let month_lo = if year == floor_date.year() {
                floor_date.month()
            } else {
                1
            };
            for month in month_lo..=12 {
                if !self.month.matches(i16::from(month)) {
                    continue;
                }
                let Ok(first_of_month) = civil::Date::new(year, month, 1) else {
                    continue;
                };
                let day_lo = if year == floor_date.year() && month == floor_date.month() {
                    floor_date.day()
                } else {
                    1
                };
                for day in day_lo..=first_of_month.days_in_month() {
                    let Ok(date) = civil::Date::new(year, month, day) else {
                        continue;
                    };
                    if !self.date_matches(date) {
                        continue;
                    }
                    let (h0, m0, s0) = if date == floor_date {
                        (floor.hour(), floor.minute(), floor.second())
                    } else {
                        (0, 0, 0)
                    };
                    if let Some(time) = self.next_time(h0, m0, s0) {
                        return Some(civil::DateTime::from_parts(date, time));
                    }
                }
            }
            year += 1;
        }
        None
    }
}

impl Trigger for CronTrigger {
    fn next_fire_time(&self, previous: Option<&Zoned>, now: &Zoned) -> Option<Zoned> {
        // The earliest instant we may return: strictly after `previous`, or
        // at/after now (respecting `start`) on the first call.
        let floor = match previous {
            Some(prev) => {
                let after = prev
                    .timestamp()
                    .to_zoned(self.tz.clone())
                    .checked_add(SignedDuration::from_secs(1))
                    .ok()?;
                match &self.start {
                    Some(start) if *start > after => start.timestamp().to_zoned(self.tz.clone()),
                    _ => after,
                }
            }
            None => {
                let base = match &self.start {
                    Some(start) if start > now => start,
                    _ => now,
                };
                base.timestamp().to_zoned(self.tz.clone())
            }
        };

        // Truncate to whole seconds, rounding up so we never drift earlier
        // than the floor instant.
        let dt = floor.datetime();
        let mut civil_floor =
            civil::DateTime::from_parts(dt.date(), civil::Time::new(dt.hour(), dt.minute(), dt.second(), 0).ok()?);
        if dt.subsec_nanosecond() != 0 {
            civil_floor = civil_floor.checked_add(1.seconds()).ok()?;
        }

        let bound_year = civil_floor.year().saturating_add(100).min(9999);
        let mut candidate_floor = civil_floor;
        loop {
            let dt = self.next_civil(candidate_floor, bound_year)?;
            match dt.to_zoned(self.tz.clone()) {
                Ok(zoned) => {
                    if let Some(end) = &self.end {
                        if zoned > *end {
                            return None;
                        }
                    }
                    return Some(zoned);
                }
                // A local time the timezone cannot represent; skip past it.
                Err(_) => candidate_floor = dt.checked_add(1.seconds()).ok()?,
            }
        }
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cron trigger in {:?}", self.tz)
    }
}
