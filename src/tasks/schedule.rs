//! Cron schedules for BackupPolicies.
//!
//! Accepts standard five-field expressions (`minute hour day-of-month month day-of-week`, with
//! day-of-week `0` or `7` meaning Sunday), the six/seven-field seconds-first form understood by
//! the `cron` crate, and `@hourly`-style descriptors. All times are UTC.

use std::{fmt::Display, str::FromStr as _};

use chrono::{DateTime, Utc};
use snafu::{ensure, ResultExt as _, Snafu};

#[derive(Snafu, Debug)]
pub enum ScheduleError {
    #[snafu(display("schedule is empty"))]
    Empty,

    #[snafu(display("invalid day-of-week value '{value}'"))]
    DayOfWeek { value: String },

    #[snafu(display("invalid cron expression '{expression}': {source}"))]
    Parse { expression: String, source: cron::error::Error },
}

/// A parsed schedule. A five-field expression restricting both day-of-month and day-of-week fires
/// when either matches, so it is kept as two `cron` schedules.
#[derive(Clone, Debug)]
pub struct Schedule {
    expression: String,
    inner: Vec<cron::Schedule>,
}

impl Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl Schedule {
    /// First fire time strictly after `after`, `None` when the schedule never fires again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.iter().filter_map(|x| x.after(&after).next()).min()
    }
}

pub fn parse(expression: &str) -> Result<Schedule, ScheduleError> {
    let trimmed = expression.trim();
    ensure!(!trimmed.is_empty(), EmptySnafu);

    let inner = normalize(trimmed)?
        .iter()
        .map(|x| cron::Schedule::from_str(x))
        .collect::<Result<Vec<_>, _>>()
        .context(ParseSnafu { expression: trimmed.to_string() })?;

    Ok(Schedule { expression: trimmed.to_string(), inner })
}

/// Rewrite a five-field expression into the seconds-first form, converting day-of-week from
/// 0-7 (Sunday = 0 or 7) to the 1-7 (Sunday = 1) numbering of the `cron` crate. When both day
/// fields are restricted, one expression per day field is returned. Anything else is passed
/// through.
fn normalize(expression: &str) -> Result<Vec<String>, ScheduleError> {
    let fields: Vec<_> = expression.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Ok(vec![expression.to_string()]);
    };

    let dow = convert_day_of_week(dow)?;
    if is_wildcard(dom) || is_wildcard(&dow) {
        return Ok(vec![format!("0 {minute} {hour} {dom} {month} {dow}")]);
    }
    Ok(vec![
        format!("0 {minute} {hour} {dom} {month} *"),
        format!("0 {minute} {hour} * {month} {dow}"),
    ])
}

fn is_wildcard(field: &str) -> bool {
    matches!(field, "*" | "?")
}

fn convert_day_of_week(field: &str) -> Result<String, ScheduleError> {
    let parts = field
        .split(',')
        .map(|part| match part.split_once('/') {
            Some((range, step)) => convert_stepped(range, step),
            None => match part.split_once('-') {
                Some((start, end)) => convert_range(start, end),
                None => convert_day(part),
            },
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

    Ok(parts.join(","))
}

/// A stepped field is expanded into its days so the step applies in 0-6 numbering.
fn convert_stepped(range: &str, step: &str) -> Result<String, ScheduleError> {
    let bounds = match range.split_once('-') {
        Some((start, end)) => day_number(start)?.zip(day_number(end)?),
        None if is_wildcard(range) => Some((0, 6)),
        None => day_number(range)?.map(|first| (first, 6)),
    };
    let Some((first, last)) = bounds else {
        return Ok(format!("{range}/{step}"));
    };

    let step = match step.parse::<usize>() {
        Ok(step) if step > 0 => step,
        _ => return DayOfWeekSnafu { value: format!("{range}/{step}") }.fail(),
    };

    let mut days: Vec<_> = (first..=last).step_by(step).map(|day| day % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();
    ensure!(!days.is_empty(), DayOfWeekSnafu { value: format!("{range}/{step}") });
    Ok(days.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
}

fn convert_range(start: &str, end: &str) -> Result<String, ScheduleError> {
    let (Some(first), Some(last)) = (day_number(start)?, day_number(end)?) else {
        return Ok(format!("{start}-{end}"));
    };

    // A range ending on Sunday-as-7 wraps in the 1-7 numbering.
    Ok(match (first, last) {
        (0, 7) => "1-7".to_string(),
        (first, 7) => format!("{}-7,1", first + 1),
        (first, last) => format!("{}-{}", first + 1, last + 1),
    })
}

fn convert_day(value: &str) -> Result<String, ScheduleError> {
    Ok(match day_number(value)? {
        Some(day) => (day % 7 + 1).to_string(),
        None => value.to_string(),
    })
}

/// Numeric day-of-week, `None` for `*`, `?` and names such as `MON`.
fn day_number(value: &str) -> Result<Option<u32>, ScheduleError> {
    if !value.chars().all(|x| x.is_ascii_digit()) || value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => DayOfWeekSnafu { value }.fail(),
    }
}
