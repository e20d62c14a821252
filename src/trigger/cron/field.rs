//! Parsing and matching for individual cron calendar fields.

use crate::error::{Error, Result};
use jiff::civil;
use regex::Regex;
use std::sync::LazyLock;

// Expression grammars, compiled once.
static STAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*(?:/(\d+))?$").unwrap());
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-z]+)(?:-([0-9a-z]+))?(?:/(\d+))?$").unwrap());
static LAST_WEEKDAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^last\s+([a-z]+)$").unwrap());

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

// 0 = Monday .. 6 = Sunday.
const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// The calendar fields a cron trigger constrains, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Year,
    Month,
    Day,
    Week,
    DayOfWeek,
    Hour,
    Minute,
    Second,
}

impl FieldKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            FieldKind::Year => "year",
            FieldKind::Month => "month",
            FieldKind::Day => "day",
            FieldKind::Week => "week",
            FieldKind::DayOfWeek => "day_of_week",
            FieldKind::Hour => "hour",
            FieldKind::Minute => "minute",
            FieldKind::Second => "second",
        }
    }

    pub(crate) fn min(self) -> i16 {
        match self {
            FieldKind::Year => 1970,
            FieldKind::Month | FieldKind::Day | FieldKind::Week => 1,
            FieldKind::DayOfWeek | FieldKind::Hour | FieldKind::Minute | FieldKind::Second => 0,
        }
    }

    pub(crate) fn max(self) -> i16 {
        match self {
            FieldKind::Year => 9999,
            FieldKind::Month => 12,
            FieldKind::Day => 31,
            FieldKind::Week => 53,
            FieldKind::DayOfWeek => 6,
            FieldKind::Hour => 23,
            FieldKind::Minute | FieldKind::Second => 59,
        }
    }
}

/// One comma-separated term of a field spec.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    /// `*` or `*/step`.
    All { step: i16 },
    /// `a`, `a-b`, `a-b/step`, or `a/step` (open-ended).
    Range { first: i16, last: i16, step: i16 },
    /// `last` -- the final day of the month.
    LastDay,
    /// `last <weekday>` -- the final such weekday of the month.
    LastWeekday { weekday: i16 },
}

/// A parsed cron field: one or more expressions over the field's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CronField {
    kind: FieldKind,
    exprs: Vec<Expr>,
}

impl CronField {
    /// Parse a field spec such as `"*/2"`, `"mon-fri"`, or `"1,15,last"`.
    pub(crate) fn parse(kind: FieldKind, spec: &str) -> Result<Self> {
        let lowered = spec.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Err(field_error(kind, spec, "empty expression"));
        }
        let exprs = lowered
            .split(',')
            .map(|part| parse_expr(kind, part.trim(), spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { kind, exprs })
    }

    /// The unconstrained field: `*`.
    pub(crate) fn wildcard(kind: FieldKind) -> Self {
        Self {
            kind,
            exprs: vec![Expr::All { step: 1 }],
        }
    }

    /// The field pinned to its minimum value, used when defaulting fields
    /// less significant than the least significant one the user gave.
    pub(crate) fn minimum(kind: FieldKind) -> Self {
        let min = kind.min();
        Self {
            kind,
            exprs: vec![Expr::Range {
                first: min,
                last: min,
                step: 1,
            }],
        }
    }

    /// Whether `value` satisfies this field.  Not meaningful for the day
    /// field, whose `last` markers need a concrete date; see
    /// [`CronField::matches_date`].
    pub(crate) fn matches(&self, value: i16) -> bool {
        let min = self.kind.min();
        self.exprs.iter().any(|expr| match expr {
            Expr::All { step } => (value - min) % step == 0,
            Expr::Range { first, last, step } => {
                value >= *first && value <= *last && (value - first) % step == 0
            }
            Expr::LastDay | Expr::LastWeekday { .. } => false,
        })
    }

    /// Whether `date`'s day-of-month satisfies this (day) field, resolving
    /// `last` markers against the month in question.
    pub(crate) fn matches_date(&self, date: civil::Date) -> bool {
        let day = i16::from(date.day());
        let days_in_month = i16::from(date.days_in_month());
        self.exprs.iter().any(|expr| match expr {
            Expr::All { step } => (day - 1) % step == 0,
            Expr::Range { first, last, step } => {
                day >= *first && day <= *last && (day - first) % step == 0
            }
            Expr::LastDay => day == days_in_month,
            Expr::LastWeekday { weekday } => {
                i16::from(date.weekday().to_monday_zero_offset()) == *weekday
                    && day + 7 > days_in_month
            }
        })
    }
}

fn parse_expr(kind: FieldKind, part: &str, original: &str) -> Result<Expr> {
    if let Some(captures) = STAR_RE.captures(part) {
        let step = parse_step(kind, captures.get(1).map(|m| m.as_str()), original)?;
        return Ok(Expr::All { step });
    }

    if part == "last" {
        if kind != FieldKind::Day {
            return Err(field_error(
                kind,
                original,
                "`last` is only valid in the day field",
            ));
        }
        return Ok(Expr::LastDay);
    }

    if let Some(captures) = LAST_WEEKDAY_RE.captures(part) {
        if kind != FieldKind::Day {
            return Err(field_error(
                kind,
                original,
                "`last <weekday>` is only valid in the day field",
            ));
        }
        let weekday = lookup_name(&WEEKDAY_NAMES, &captures[1])
            .ok_or_else(|| field_error(kind, original, "unknown weekday name"))?;
        return Ok(Expr::LastWeekday { weekday });
    }

    if let Some(captures) = RANGE_RE.captures(part) {
        let first = parse_value(kind, &captures[1], original)?;
        let last = match captures.get(2) {
            Some(m) => Some(parse_value(kind, m.as_str(), original)?),
            None => None,
        };
        let step_given = captures.get(3).is_some();
        let step = parse_step(kind, captures.get(3).map(|m| m.as_str()), original)?;
        // `a/step` with no upper bound runs to the end of the domain.
        let last = last.unwrap_or(if step_given { kind.max() } else { first });
        if last < first {
            return Err(field_error(kind, original, "range end precedes range start"));
        }
        return Ok(Expr::Range { first, last, step });
    }

    Err(field_error(kind, original, "unrecognized expression"))
}

fn parse_step(kind: FieldKind, step: Option<&str>, original: &str) -> Result<i16> {
    match step {
        None => Ok(1),
        Some(raw) => {
            let step: i16 = raw
                .parse()
                .map_err(|_| field_error(kind, original, "step is not a number"))?;
            if step < 1 {
                return Err(field_error(kind, original, "step must be at least 1"));
            }
            Ok(step)
        }
    }
}

fn parse_value(kind: FieldKind, token: &str, original: &str) -> Result<i16> {
    let value = if let Ok(number) = token.parse::<i16>() {
        number
    } else {
        let named = match kind {
            FieldKind::Month => lookup_name(&MONTH_NAMES, token).map(|i| i + 1),
            FieldKind::DayOfWeek => lookup_name(&WEEKDAY_NAMES, token),
            _ => None,
        };
        named.ok_or_else(|| field_error(kind, original, "not a number or a known name"))?
    };
    if value < kind.min() || value > kind.max() {
        return Err(field_error(
            kind,
            original,
            &format!("{value} is outside {}-{}", kind.min(), kind.max()),
        ));
    }
    Ok(value)
}

fn lookup_name<const N: usize>(names: &[&str; N], token: &str) -> Option<i16> {
    names.iter().position(|name| *name == token).map(|i| i as i16)
}

fn field_error(kind: FieldKind, value: &str, reason: &str) -> Error {
    Error::CronField {
        field: kind.name(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(field: &CronField, kind: FieldKind) -> Vec<i16> {
        (kind.min()..=kind.max())
            .filter(|v| field.matches(*v))
            .collect()
    }

    #[test]
    fn wildcard_matches_whole_domain() {
        let field = CronField::parse(FieldKind::Hour, "*").unwrap();
        assert_eq!(values(&field, FieldKind::Hour), (0..=23).collect::<Vec<_>>());
    }

    #[test]
    fn wildcard_step() {
        let field = CronField::parse(FieldKind::Minute, "*/15").unwrap();
        assert_eq!(values(&field, FieldKind::Minute), vec![0, 15, 30, 45]);
    }

    #[test]
    fn ranges_steps_and_lists() {
        let field = CronField::parse(FieldKind::Hour, "1-5").unwrap();
        assert_eq!(values(&field, FieldKind::Hour), vec![1, 2, 3, 4, 5]);

        let field = CronField::parse(FieldKind::Hour, "0-12/3").unwrap();
        assert_eq!(values(&field, FieldKind::Hour), vec![0, 3, 6, 9, 12]);

        let field = CronField::parse(FieldKind::Hour, "1,9,17").unwrap();
        assert_eq!(values(&field, FieldKind::Hour), vec![1, 9, 17]);

        // Open-ended: from 50 to the end of the domain.
        let field = CronField::parse(FieldKind::Minute, "50/5").unwrap();
        assert_eq!(values(&field, FieldKind::Minute), vec![50, 55]);
    }

    #[test]
    fn month_and_weekday_names() {
        let field = CronField::parse(FieldKind::Month, "JAN,jun,Dec").unwrap();
        assert_eq!(values(&field, FieldKind::Month), vec![1, 6, 12]);

        let field = CronField::parse(FieldKind::DayOfWeek, "mon-fri").unwrap();
        assert_eq!(values(&field, FieldKind::DayOfWeek), vec![0, 1, 2, 3, 4]);

        let field = CronField::parse(FieldKind::DayOfWeek, "sat,sun").unwrap();
        assert_eq!(values(&field, FieldKind::DayOfWeek), vec![5, 6]);
    }

    #[test]
    fn last_day_of_month() {
        let field = CronField::parse(FieldKind::Day, "last").unwrap();
        // February 2024 was a leap month.
        assert!(field.matches_date(civil::date(2024, 2, 29)));
        assert!(!field.matches_date(civil::date(2024, 2, 28)));
        assert!(field.matches_date(civil::date(2025, 2, 28)));
        assert!(field.matches_date(civil::date(2025, 4, 30)));
    }

    #[test]
    fn last_weekday_of_month() {
        let field = CronField::parse(FieldKind::Day, "last fri").unwrap();
        // The last Friday of January 2025 was the 31st.
        assert!(field.matches_date(civil::date(2025, 1, 31)));
        assert!(!field.matches_date(civil::date(2025, 1, 24)));
        // The last Friday of June 2025 was the 27th.
        assert!(field.matches_date(civil::date(2025, 6, 27)));
        assert!(!field.matches_date(civil::date(2025, 6, 20)));
    }

    #[test]
    fn day_lists_can_mix_numbers_and_last() {
        let field = CronField::parse(FieldKind::Day, "1,15,last").unwrap();
        assert!(field.matches_date(civil::date(2025, 3, 1)));
        assert!(field.matches_date(civil::date(2025, 3, 15)));
        assert!(field.matches_date(civil::date(2025, 3, 31)));
        assert!(!field.matches_date(civil::date(2025, 3, 30)));
    }

    #[test]
    fn minimum_default_pins_to_min() {
        let field = CronField::minimum(FieldKind::Second);
        assert_eq!(values(&field, FieldKind::Second), vec![0]);
        let field = CronField::minimum(FieldKind::Day);
        assert!(field.matches_date(civil::date(2025, 3, 1)));
        assert!(!field.matches_date(civil::date(2025, 3, 2)));
    }

    #[test]
    fn rejects_nonsense() {
        assert!(CronField::parse(FieldKind::Hour, "25").is_err());
        assert!(CronField::parse(FieldKind::Hour, "5-2").is_err());
        assert!(CronField::parse(FieldKind::Hour, "*/0").is_err());
        assert!(CronField::parse(FieldKind::Hour, "lunchtime").is_err());
        assert!(CronField::parse(FieldKind::Hour, "last").is_err());
        assert!(CronField::parse(FieldKind::Month, "smarch").is_err());
        assert!(CronField::parse(FieldKind::Day, "last payday").is_err());
        assert!(CronField::parse(FieldKind::Minute, "").is_err());
    }

    #[test]
    fn errors_name_the_field() {
        let err = CronField::parse(FieldKind::DayOfWeek, "8").unwrap_err();
        assert!(err.to_string().contains("day_of_week"));
    }
}
