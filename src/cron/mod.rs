//! Cron expression handling
//!
//! Sources declare their crawl frequency as a standard 5-field cron expression
//! (`minute hour day-of-month month day-of-week`) evaluated at minute
//! resolution in UTC. This module parses those expressions and answers the two
//! questions the scheduler asks: does the expression fire at a given minute, and
//! when does it fire next.
//!
//! Supported syntax per field: `*`, single values, ranges (`1-5`), steps
//! (`*/15`, `10-40/10`, `5/20`), comma lists, and three-letter month and
//! weekday names. Day-of-week accepts both `0` and `7` for Sunday. When both
//! day-of-month and day-of-week are restricted, a day matches if either
//! matches (classic cron semantics).

mod field;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use field::{parse_field, FieldKind};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a cron expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} step must be greater than zero")]
    ZeroStep { field: &'static str },
}

/// Upper bound on how far ahead `next_after` searches (five years covers any
/// leap-day-only expression).
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// A parsed 5-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parses a cron expression
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_harvest::cron::CronExpr;
    ///
    /// let expr = CronExpr::parse("*/15 8-18 * * mon-fri").unwrap();
    /// assert_eq!(expr.as_str(), "*/15 8-18 * * mon-fri");
    /// ```
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let minutes = parse_field(parts[0], FieldKind::Minute)?;
        let hours = parse_field(parts[1], FieldKind::Hour)?;
        let days_of_month = parse_field(parts[2], FieldKind::DayOfMonth)?;
        let months = parse_field(parts[3], FieldKind::Month)?;
        let mut days_of_week = parse_field(parts[4], FieldKind::DayOfWeek)?;

        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: parts.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    /// Returns the normalized expression text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the expression fires during the minute containing `at`
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, at.month())
            && self.day_matches(at)
    }

    /// Returns the first firing minute strictly after `after`
    ///
    /// Returns `None` only for expressions that can never fire (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(after) + Duration::minutes(1);
        let horizon = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= horizon {
            if !bit(self.months, candidate.month()) {
                candidate = start_of_next_month(&candidate)?;
                continue;
            }
            if !self.day_matches(&candidate) {
                candidate = start_of_day(&candidate) + Duration::days(1);
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                candidate = start_of_hour(&candidate) + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    /// Returns true if the expression fires in the window `(from, to]`
    pub fn fires_between(&self, from: &DateTime<Utc>, to: &DateTime<Utc>) -> bool {
        match self.next_after(from) {
            Some(next) => next <= truncate_to_minute(to),
            None => false,
        }
    }

    fn day_matches(&self, at: &DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, at.day());
        let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn truncate_to_minute(at: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), at.minute(), 0)
        .single()
        .unwrap_or(*at)
}

fn start_of_hour(at: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), 0, 0)
        .single()
        .unwrap_or(*at)
}

fn start_of_day(at: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
        .single()
        .unwrap_or(*at)
}

fn start_of_next_month(at: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}
