//! Calendar expression parsing.
//!
//! The engine underneath is the `cron` crate, which wants six or seven fields
//! with seconds first and numbers Sunday as day 1. Callers usually write the
//! classic five-field form, so [`Trigger::parse`] translates:
//!
//! | input                       | result                               |
//! |-----------------------------|--------------------------------------|
//! | `*/5 * * * *`               | `0 */5 * * * *`                      |
//! | `0 9 * * 1-5`               | `0 0 9 * * 2,3,4,5,6`                |
//! | `0 0 12 * * MON` (6 fields) | passed through                       |
//! | `@daily`, `@hourly`, ...    | [`CronPresets`] expression           |
//! | `@every 1h30m`              | [`Trigger::Every`]                   |
//! | `0 0 1 * 1`                 | `0 0 0 1 * * \| 0 0 0 * * 2`          |
//!
//! In the five-field form a day that matches either a restricted day of month
//! or a restricted day of week fires, as in classic cron. The `cron` crate
//! requires both, so such specs are split into two schedules.

use crate::error::{RunnerError, RunnerResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// Parsed calendar expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    schedule: Schedule,
    alternate: Option<Schedule>,
    expression: String,
}

impl CronExpression {
    /// Parse an expression in the native six/seven field grammar.
    ///
    /// - Second (0-59)
    /// - Minute (0-59)
    /// - Hour (0-23)
    /// - Day of month (1-31)
    /// - Month (1-12)
    /// - Day of week (1-7, Sunday = 1, or SUN-SAT)
    /// - Year (optional)
    ///
    /// # Examples
    ///
    /// ```
    /// use jobrunner::CronExpression;
    ///
    /// // Every minute
    /// let expr = CronExpression::parse("0 * * * * *").unwrap();
    ///
    /// // Every Monday at 9 AM
    /// let expr = CronExpression::parse("0 0 9 * * MON").unwrap();
    /// ```
    pub fn parse(expression: &str) -> RunnerResult<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| RunnerError::InvalidExpression(format!("{}: {}", expression, e)))?;

        Ok(Self {
            schedule,
            alternate: None,
            expression: expression.to_string(),
        })
    }

    /// Fire times of either expression.
    fn union(by_month_day: &str, by_week_day: &str) -> RunnerResult<Self> {
        let mut expr = Self::parse(by_month_day)?;
        expr.alternate = Some(Self::parse(by_week_day)?.schedule);
        expr.expression = format!("{} | {}", by_month_day, by_week_day);
        Ok(expr)
    }

    /// Parse an expression in the classic five-field grammar (or any form
    /// accepted by [`Trigger::parse`] that yields a calendar).
    pub fn parse_standard(spec: &str) -> RunnerResult<Self> {
        match Trigger::parse(spec)? {
            Trigger::Cron(expr) => Ok(expr),
            Trigger::Every(_) => Err(RunnerError::InvalidExpression(format!(
                "{}: not a calendar expression",
                spec
            ))),
        }
    }

    /// Get the next execution time after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&after).next();
        let Some(alternate) = &self.alternate else {
            return next;
        };

        match (next, alternate.after(&after).next()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Get the next execution time from now.
    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next_after(Utc::now())
    }

    /// Get the expression string in the native grammar. A day-of-month or
    /// day-of-week union reads as both expressions joined by ` | `.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

/// Common cron expression presets, in the native grammar.
pub struct CronPresets;

impl CronPresets {
    /// Every second
    pub const EVERY_SECOND: &'static str = "* * * * * *";

    /// Every minute
    pub const EVERY_MINUTE: &'static str = "0 * * * * *";

    /// Every 5 minutes
    pub const EVERY_5_MINUTES: &'static str = "0 */5 * * * *";

    /// Every 15 minutes
    pub const EVERY_15_MINUTES: &'static str = "0 */15 * * * *";

    /// Every hour
    pub const EVERY_HOUR: &'static str = "0 0 * * * *";

    /// Every day at midnight
    pub const DAILY: &'static str = "0 0 0 * * *";

    /// Every week on Sunday at midnight
    pub const WEEKLY: &'static str = "0 0 0 * * SUN";

    /// Every month on the 1st at midnight
    pub const MONTHLY: &'static str = "0 0 0 1 * *";

    /// Every year on January 1st at midnight
    pub const YEARLY: &'static str = "0 0 0 1 1 *";

    /// Expression for a `@descriptor`, if it is one.
    pub fn descriptor(name: &str) -> Option<&'static str> {
        match name.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => Some(Self::YEARLY),
            "@monthly" => Some(Self::MONTHLY),
            "@weekly" => Some(Self::WEEKLY),
            "@daily" | "@midnight" => Some(Self::DAILY),
            "@hourly" => Some(Self::EVERY_HOUR),
            _ => None,
        }
    }
}

/// When an entry fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// At each instant matched by a calendar expression
    Cron(CronExpression),
    /// After the given idle gap following the previous run
    Every(Duration),
}

impl Trigger {
    /// Parse a standard schedule specification.
    ///
    /// # Examples
    ///
    /// ```
    /// use jobrunner::Trigger;
    /// use std::time::Duration;
    ///
    /// assert!(matches!(Trigger::parse("*/5 * * * *"), Ok(Trigger::Cron(_))));
    /// assert!(matches!(
    ///     Trigger::parse("@every 90s"),
    ///     Ok(Trigger::Every(d)) if d == Duration::from_secs(90)
    /// ));
    /// assert!(Trigger::parse("not a valid expr").is_err());
    /// ```
    pub fn parse(spec: &str) -> RunnerResult<Self> {
        let spec = spec.trim();

        if let Some(rest) = strip_prefix_ignore_case(spec, "@every")
            .filter(|rest| rest.starts_with(char::is_whitespace))
        {
            let rest = rest.trim();
            let interval = humantime::parse_duration(rest)
                .map_err(|e| RunnerError::InvalidInterval(format!("{}: {}", rest, e)))?;
            if interval.is_zero() {
                return Err(RunnerError::InvalidInterval(format!(
                    "{}: interval must be positive",
                    rest
                )));
            }
            return Ok(Trigger::Every(interval));
        }

        if spec.starts_with('@') {
            let expr = CronPresets::descriptor(spec).ok_or_else(|| {
                RunnerError::InvalidExpression(format!("{}: unknown descriptor", spec))
            })?;
            return CronExpression::parse(expr).map(Trigger::Cron);
        }

        let fields: Vec<&str> = spec.split_whitespace().collect();
        match fields.len() {
            5 => {
                let day_of_week = convert_day_of_week(fields[4])
                    .map_err(|e| RunnerError::InvalidExpression(format!("{}: {}", spec, e)))?;
                let (minute, hour, day_of_month, month) =
                    (fields[0], fields[1], fields[2], fields[3]);

                let parsed = if is_restricted(day_of_month) && is_restricted(fields[4]) {
                    CronExpression::union(
                        &format!("0 {} {} {} {} *", minute, hour, day_of_month, month),
                        &format!("0 {} {} * {} {}", minute, hour, month, day_of_week),
                    )
                } else {
                    CronExpression::parse(&format!(
                        "0 {} {} {} {} {}",
                        minute, hour, day_of_month, month, day_of_week
                    ))
                };
                parsed.map(Trigger::Cron).map_err(|e| match e {
                    RunnerError::InvalidExpression(detail) => {
                        RunnerError::InvalidExpression(format!("{} (as {})", spec, detail))
                    }
                    other => other,
                })
            }
            6 | 7 => CronExpression::parse(spec).map(Trigger::Cron),
            n => Err(RunnerError::InvalidExpression(format!(
                "{}: expected 5 to 7 fields, found {}",
                spec, n
            ))),
        }
    }
}

impl FromStr for Trigger {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::parse(s)
    }
}

// Fields starting with a wildcard, `*/2` included, do not restrict the day.
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && !field.starts_with('?')
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Rewrite a standard day-of-week field (0-7, Sunday = 0 or 7) into the
/// `cron` crate numbering (1-7, Sunday = 1).
///
/// Named days and bare wildcards are kept as written. Numeric items,
/// including ranges and steps, are expanded to an explicit day list.
fn convert_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut named = Vec::new();
    let mut days = BTreeSet::new();

    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty day-of-week item in '{}'", field));
        }
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_day(a)?, parse_day(b)?),
                // `n/step` runs from n to the end of the week
                None if item.contains('/') => (parse_day(range)?, 6),
                None => {
                    let day = parse_day(range)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return Err(format!("descending range '{}'", range));
        }

        for day in (start..=end).step_by(step as usize) {
            days.insert(day % 7 + 1);
        }
    }

    let mut items: Vec<String> = days.into_iter().map(|d| d.to_string()).collect();
    items.extend(named);
    Ok(items.join(","))
}

fn parse_day(s: &str) -> Result<u32, String> {
    let day: u32 = s.parse().map_err(|_| format!("invalid day '{}'", s))?;
    if day > 7 {
        return Err(format!("day {} out of range 0-7", day));
    }
    Ok(day)
}
