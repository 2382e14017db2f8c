//! Parsing of a single cron field into a bitmask

use super::CronError;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Which of the five cron fields is being parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            // 7 is accepted as Sunday and folded by the caller
            Self::DayOfWeek => (0, 7),
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            Self::Month => Some((MONTH_NAMES, 1)),
            Self::DayOfWeek => Some((WEEKDAY_NAMES, 0)),
            _ => None,
        }
    }
}

/// Parses one comma-separated cron field into a bitmask of allowed values
pub(super) fn parse_field(text: &str, kind: FieldKind) -> Result<u64, CronError> {
    let mut mask = 0u64;

    for part in text.split(',') {
        if part.is_empty() {
            return Err(invalid(kind, text));
        }
        mask |= parse_part(part, kind)?;
    }

    Ok(mask)
}

fn parse_part(part: &str, kind: FieldKind) -> Result<u64, CronError> {
    let (min, max) = kind.bounds();

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step.parse().map_err(|_| invalid(kind, part))?;
            if step == 0 {
                return Err(CronError::ZeroStep { field: kind.name() });
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" {
        (min, max)
    } else if let Some((lo, hi)) = range.split_once('-') {
        (parse_value(lo, kind)?, parse_value(hi, kind)?)
    } else {
        let value = parse_value(range, kind)?;
        // `5/20` means "from 5 to the end of the range, every 20"
        match step {
            Some(_) => (value, max),
            None => (value, value),
        }
    };

    if start > end {
        return Err(invalid(kind, part));
    }

    let step = step.unwrap_or(1) as usize;
    let mask = (start..=end)
        .step_by(step)
        .fold(0u64, |mask, value| mask | (1u64 << value));

    Ok(mask)
}

fn parse_value(text: &str, kind: FieldKind) -> Result<u32, CronError> {
    let (min, max) = kind.bounds();

    let value = match text.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let (names, offset) = kind.names().ok_or_else(|| invalid(kind, text))?;
            let lowered = text.to_lowercase();
            let index = names
                .iter()
                .position(|name| *name == lowered)
                .ok_or_else(|| invalid(kind, text))?;
            index as u32 + offset
        }
    };

    if value < min || value > max {
        return Err(CronError::OutOfRange {
            field: kind.name(),
            value,
            min,
            max,
        });
    }

    Ok(value)
}

fn invalid(kind: FieldKind, value: &str) -> CronError {
    CronError::InvalidField {
        field: kind.name(),
        value: value.to_string(),
    }
}
