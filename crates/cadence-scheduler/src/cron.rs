//! Five-field cron expressions (`minute hour day-of-month month day-of-week`)
//! evaluated in UTC at one-minute granularity.
//!
//! Each field accepts `*`, a value `a`, a range `a-b`, a step `*/n` or
//! `a-b/n`, and comma-separated lists of those. Day-of-week runs 0–6 with
//! Sunday = 0.
//!
//! # Day-of-month and day-of-week
//!
//! Follows Vixie cron: when both day fields are restricted (neither starts
//! with `*`), a day matches if *either* field matches. Otherwise both must
//! match, which reduces to the restricted field alone. `0 0 13 * 5` therefore
//! fires on every 13th and on every Friday.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::CronParseError;

/// How far ahead [`CronExpr::next_after`] searches before giving up.
/// Eight years covers the longest gap between leap days (2096 → 2104).
const SEARCH_HORIZON_YEARS: i32 = 8;

#[derive(Debug, Clone, Copy)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }
}

/// Accepted values of one field as a bitmask (bit `v` set = `v` accepted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn insert_range(&mut self, start: u32, end: u32, step: u32) {
        let mut v = Some(start);
        while let Some(value) = v.filter(|value| *value <= end) {
            self.0 |= 1 << value;
            v = value.checked_add(step);
        }
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        match fields.len() {
            5 => {}
            6 => return Err(CronParseError::SecondsField),
            found => return Err(CronParseError::FieldCount { found }),
        }

        let mut sets = [FieldSet(0); 5];
        for ((set, text), field) in sets.iter_mut().zip(&fields).zip(Field::ALL) {
            *set = parse_field(text, field)?;
        }

        Ok(Self {
            minutes: sets[0],
            hours: sets[1],
            days_of_month: sets[2],
            months: sets[3],
            days_of_week: sets[4],
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// Whether `at` (seconds ignored) is an occurrence of this expression.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.months.contains(at.month())
            && self.day_matches(at.date_naive())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First occurrence strictly after `after_ms`, starting from the next
    /// whole minute. `None` if nothing matches within the search horizon.
    ///
    /// Skips whole months, days and hours that cannot match; the result is
    /// the same as testing every minute in turn.
    pub fn next_after(&self, after_ms: i64) -> Option<i64> {
        let start_ms = after_ms.div_euclid(60_000).checked_add(1)?.checked_mul(60_000)?;
        let mut t = DateTime::<Utc>::from_timestamp_millis(start_ms)?;
        let limit = t
            .with_year(t.year() + SEARCH_HORIZON_YEARS)
            .or_else(|| t.checked_add_signed(Duration::days(366 * SEARCH_HORIZON_YEARS as i64)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        while t <= limit {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(&t)?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = start_of_next_day(&t)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)?.checked_add_signed(Duration::hours(1))?;
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = t.checked_add_signed(Duration::minutes(1))?;
                continue;
            }
            return Some(t.timestamp_millis());
        }
        None
    }
}

impl std::str::FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

fn start_of_next_day(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = t.date_naive().succ_opt()?;
    Some(next.and_hms_opt(0, 0, 0)?.and_utc())
}

fn parse_field(text: &str, field: Field) -> Result<FieldSet, CronParseError> {
    let mut set = FieldSet(0);
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(step, field)?)),
            None => (part, None),
        };
        let (start, end) = parse_range(range, step.is_some(), field)?;
        set.insert_range(start, end, step.unwrap_or(1));
    }
    Ok(set)
}

fn parse_step(text: &str, field: Field) -> Result<u32, CronParseError> {
    match parse_number(text, field)? {
        0 => Err(CronParseError::ZeroStep { field: field.name() }),
        n => Ok(n),
    }
}

/// `*`, `a-b`, or (without a step) a single value.
fn parse_range(text: &str, stepped: bool, field: Field) -> Result<(u32, u32), CronParseError> {
    let (min, max) = field.bounds();
    if text == "*" {
        return Ok((min, max));
    }
    if let Some((start, end)) = text.split_once('-') {
        let start = parse_value(start, field)?;
        let end = parse_value(end, field)?;
        if start > end {
            return Err(CronParseError::InvertedRange {
                field: field.name(),
                start,
                end,
            });
        }
        return Ok((start, end));
    }
    if stepped {
        // `a/n` is not part of the supported grammar.
        return Err(invalid(text, field));
    }
    let value = parse_value(text, field)?;
    Ok((value, value))
}

fn parse_value(text: &str, field: Field) -> Result<u32, CronParseError> {
    let value = parse_number(text, field)?;
    let (min, max) = field.bounds();
    if value < min || value > max {
        return Err(CronParseError::OutOfRange {
            field: field.name(),
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn parse_number(text: &str, field: Field) -> Result<u32, CronParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(text, field));
    }
    text.parse().map_err(|_| invalid(text, field))
}

fn invalid(token: &str, field: Field) -> CronParseError {
    CronParseError::InvalidToken {
        field: field.name(),
        token: token.to_string(),
    }
}
