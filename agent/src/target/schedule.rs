//! Schedule expressions for cron job targets.
//!
//! Accepted forms: `@every <duration>`, the `@yearly`-style descriptors, and
//! cron expressions whose first field is seconds. The day-of-week field may be
//! omitted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use common::error::{Error, Result};

#[derive(Clone)]
pub enum CronSchedule {
    /// Fixed interval, measured from the end of the previous wait.
    Every(Duration),
    Cron(Box<Schedule>),
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("@every") {
            if !rest.starts_with(char::is_whitespace) {
                return Err(schedule_err(expr, "missing duration after @every"));
            }
            let every = parse_every(rest.trim()).map_err(|reason| schedule_err(expr, reason))?;
            return Ok(CronSchedule::Every(every));
        }

        let normalized = normalize_cron_expr(expr).map_err(|reason| schedule_err(expr, reason))?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| schedule_err(expr, e))?;
        Ok(CronSchedule::Cron(Box::new(schedule)))
    }

    /// Time to wait from `now` until the next tick, `None` when the schedule
    /// has no future ticks.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            CronSchedule::Every(every) => Some(*every),
            CronSchedule::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronSchedule::Every(every) => f.debug_tuple("Every").field(every).finish(),
            CronSchedule::Cron(schedule) => f.debug_tuple("Cron").field(&schedule.to_string()).finish(),
        }
    }
}

fn normalize_cron_expr(expr: &str) -> std::result::Result<String, String> {
    let descriptor = match expr {
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@weekly" => Some("0 0 0 * * Sun"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@hourly" => Some("0 0 * * * *"),
        _ if expr.starts_with('@') => return Err(format!("unrecognized descriptor {}", expr)),
        _ => None,
    };
    if let Some(descriptor) = descriptor {
        return Ok(descriptor.to_string());
    }

    let fields: Vec<String> = expr.split_whitespace().map(|f| f.replace('?', "*")).collect();
    match fields.len() {
        5 => Ok(format!("{} *", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(format!("expected 5 or 6 fields, found {}", n)),
    }
}

/// Parses an interval such as `90s` or `1h30m`, truncated to whole seconds
/// and never shorter than one second.
fn parse_every(text: &str) -> std::result::Result<Duration, humantime::DurationError> {
    let every = humantime::parse_duration(text)?;
    Ok(Duration::from_secs(every.as_secs().max(1)))
}

fn schedule_err(expr: &str, reason: impl ToString) -> Error {
    Error::Schedule {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}
