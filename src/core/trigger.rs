//! Recurrence expressions for scheduler triggers.
//!
//! Expressions are handed to the `cron` crate. This module only adds the
//! classic five-field form, a short human description and the
//! "time until" formatting used by status reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::core::CollectorError;

/// What a trigger runs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// All five phases.
    FullPipeline,
    /// Only the indicator refresh phase.
    IndicatorRefresh,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullPipeline => f.write_str("full pipeline"),
            Self::IndicatorRefresh => f.write_str("indicator refresh"),
        }
    }
}

/// Parsed recurrence expression.
#[derive(Debug, Clone)]
pub struct TriggerExpression {
    raw: String,
    normalized: String,
    schedule: Schedule,
}

impl TriggerExpression {
    /// Parse a five-, six- or seven-field cron expression.
    ///
    /// Five-field expressions use the classic layout (minute first, Sunday
    /// as 0 or 7); they get a zero seconds field and named weekdays.
    ///
    /// # Errors
    ///
    /// `CollectorError::Config` if the expression has the wrong number of
    /// fields or the `cron` crate rejects it.
    pub fn parse(expression: &str) -> Result<Self, CollectorError> {
        let normalized = normalize(expression).map_err(CollectorError::Config)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            CollectorError::Config(format!("invalid cron expression '{expression}': {e}"))
        })?;

        Ok(Self {
            raw: expression.trim().to_string(),
            normalized,
            schedule,
        })
    }

    /// The expression as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The six/seven-field form given to the `cron` crate.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// First fire time strictly after `after`, in the same timezone.
    #[must_use]
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedule.after(after).next()
    }

    /// Short human description of the recurrence.
    #[must_use]
    pub fn describe(&self) -> String {
        let fields: Vec<&str> = self.normalized.split_whitespace().collect();
        let [_, minute, hour, dom, month, dow, ..] = fields.as_slice() else {
            return format!("cron `{}`", self.raw);
        };

        let any = |f: &str| f == "*" || f == "?";
        if !any(dom) || !any(month) {
            return format!("cron `{}`", self.raw);
        }
        let days = if any(dow) {
            "every day".to_string()
        } else {
            format!("on {dow}")
        };

        match (minute.parse::<u32>(), hour.parse::<u32>()) {
            (Ok(m), Ok(h)) => format!("at {h:02}:{m:02} {days}"),
            _ => match minute.strip_prefix("*/") {
                Some(step) if any(hour) => format!("every {step} minutes {days}"),
                Some(step) => format!("every {step} minutes during hours {hour} {days}"),
                None => format!("cron `{}`", self.raw),
            },
        }
    }
}

impl fmt::Display for TriggerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for TriggerExpression {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Convert an expression to the form the `cron` crate accepts.
///
/// # Errors
///
/// Returns a message if the field count is not 5, 6 or 7.
pub fn normalize(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let weekdays = classic_weekdays(fields[4]);
            Ok(format!(
                "0 {} {} {} {} {weekdays}",
                fields[0], fields[1], fields[2], fields[3]
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(format!(
            "cron expression '{}' has {n} fields, expected 5, 6 or 7",
            expression.trim()
        )),
    }
}

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Map classic numeric weekdays (0 or 7 = Sunday) to names, leaving step
/// values and existing names untouched.
///
/// A numeric range ending in 7 would wrap once named, so it is expanded
/// into a list of days.
fn classic_weekdays(field: &str) -> String {
    field.split(',').map(classic_weekday_part).collect::<Vec<_>>().join(",")
}

fn classic_weekday_part(part: &str) -> String {
    let name = |token: &str| match token.parse::<usize>() {
        Ok(n) if n < WEEKDAY_NAMES.len() => WEEKDAY_NAMES[n].to_string(),
        _ => token.to_string(),
    };

    let (range, step) = part.split_once('/').map_or((part, None), |(r, s)| (r, Some(s)));
    let start = range
        .split_once('-')
        .filter(|(_, end)| end.trim() == "7")
        .and_then(|(start, _)| start.trim().parse::<usize>().ok());
    let stride = step.map_or(Some(1), |s| s.trim().parse::<usize>().ok().filter(|s| *s > 0));

    if let (Some(start), Some(stride)) = (start, stride) {
        if start <= 7 {
            let mut days: Vec<usize> = (start..=7).step_by(stride).map(|d| d % 7).collect();
            days.sort_unstable();
            days.dedup();
            return days
                .into_iter()
                .map(|d| WEEKDAY_NAMES[d])
                .collect::<Vec<_>>()
                .join(",");
        }
    }

    let range = range.split('-').map(name).collect::<Vec<_>>().join("-");
    match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    }
}

/// Format the gap between `now` and `next` as "Xh Ym", "Ym" or "Past due".
#[must_use]
pub fn time_until<Z: TimeZone>(next: &DateTime<Z>, now: &DateTime<Z>) -> String {
    let remaining = next.clone().signed_duration_since(now.clone());
    if remaining <= chrono::Duration::zero() {
        return "Past due".to_string();
    }
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
