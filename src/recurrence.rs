//! Recurrence engine.
//!
//! A template task carries a [`RecurrenceConfig`]. The engine computes the
//! next occurrence date for that rule and materializes detached task
//! instances linked back to the template through `recurrence_parent_id`.
//!
//! The engine never touches storage. Callers hand it loaded tasks and
//! persist whatever it returns.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RecurrenceSettings;
use crate::dates;
use crate::error::{Error, Result};
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Weekdays,
    /// Every `interval` days, or a weekly rule when `days_of_week` is set.
    Custom,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::Yearly => "yearly",
            RecurrencePattern::Weekdays => "weekdays",
            RecurrencePattern::Custom => "custom",
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrencePattern {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RecurrencePattern::Daily),
            "weekly" => Ok(RecurrencePattern::Weekly),
            "monthly" => Ok(RecurrencePattern::Monthly),
            "yearly" => Ok(RecurrencePattern::Yearly),
            "weekdays" => Ok(RecurrencePattern::Weekdays),
            "custom" => Ok(RecurrencePattern::Custom),
            other => Err(Error::Validation(format!(
                "unknown recurrence pattern '{other}' (expected daily|weekly|monthly|yearly|weekdays|custom)"
            ))),
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// Unvalidated recurrence fields, as read from the CLI or from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceSpec {
    pub pattern: RecurrencePattern,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_of_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RecurrenceSpec {
    pub fn new(pattern: RecurrencePattern) -> Self {
        Self {
            pattern,
            interval: default_interval(),
            days_of_week: Vec::new(),
            day_of_month: None,
            month_of_year: None,
            end_date: None,
            count: None,
        }
    }
}

/// A validated recurrence rule.
///
/// Construction enforces the per-pattern required fields, value ranges and
/// that `end_date` and `count` are never both set, so the engine only ever
/// sees well-formed rules. Deserialization goes through the same checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RecurrenceSpec", into = "RecurrenceSpec")]
pub struct RecurrenceConfig {
    spec: RecurrenceSpec,
}

impl RecurrenceConfig {
    pub fn new(spec: RecurrenceSpec) -> Result<Self> {
        Self::try_from(spec)
    }

    pub fn pattern(&self) -> RecurrencePattern {
        self.spec.pattern
    }

    pub fn interval(&self) -> u32 {
        self.spec.interval
    }

    /// Sorted, de-duplicated day indices (0=Monday..6=Sunday).
    pub fn days_of_week(&self) -> &[u8] {
        &self.spec.days_of_week
    }

    pub fn day_of_month(&self) -> Option<u32> {
        self.spec.day_of_month
    }

    pub fn month_of_year(&self) -> Option<u32> {
        self.spec.month_of_year
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.spec.end_date
    }

    pub fn count(&self) -> Option<u32> {
        self.spec.count
    }

    pub fn spec(&self) -> &RecurrenceSpec {
        &self.spec
    }

    /// Checks that depend on repository configuration rather than on the
    /// rule itself.
    pub fn check_policy(&self, settings: &RecurrenceSettings) -> Result<()> {
        if settings.require_end_condition && self.end_date().is_none() && self.count().is_none() {
            return Err(Error::Validation(
                "an end date or an occurrence count is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn next_after(&self, base: NaiveDate) -> Option<NaiveDate> {
        compute_next_occurrence(
            base,
            self.pattern(),
            self.interval(),
            self.days_of_week(),
            self.day_of_month(),
            self.month_of_year(),
        )
    }

    /// Human readable summary, e.g. `every 2 weeks on mon,thu until 2025-06-30`.
    pub fn describe(&self) -> String {
        let interval = self.interval();
        let weekly_days = !self.days_of_week().is_empty();
        let mut text = match self.pattern() {
            RecurrencePattern::Custom if weekly_days && interval == 1 => "every week".to_string(),
            RecurrencePattern::Custom if weekly_days => format!("every {interval} weeks"),
            RecurrencePattern::Daily | RecurrencePattern::Custom if interval == 1 => {
                "every day".to_string()
            }
            RecurrencePattern::Daily | RecurrencePattern::Custom => format!("every {interval} days"),
            RecurrencePattern::Weekly if interval == 1 => "every week".to_string(),
            RecurrencePattern::Weekly => format!("every {interval} weeks"),
            RecurrencePattern::Monthly if interval == 1 => "every month".to_string(),
            RecurrencePattern::Monthly => format!("every {interval} months"),
            RecurrencePattern::Yearly if interval == 1 => "every year".to_string(),
            RecurrencePattern::Yearly => format!("every {interval} years"),
            RecurrencePattern::Weekdays => "every weekday".to_string(),
        };
        if weekly_days {
            let names: Vec<&str> = self.days_of_week().iter().map(|d| day_name(*d)).collect();
            text.push_str(&format!(" on {}", names.join(",")));
        }
        match (self.pattern(), self.day_of_month(), self.month_of_year()) {
            (RecurrencePattern::Monthly, Some(day), _) => text.push_str(&format!(" on day {day}")),
            (RecurrencePattern::Yearly, Some(day), Some(month)) => {
                text.push_str(&format!(" on {month:02}-{day:02}"))
            }
            _ => {}
        }
        if let Some(end) = self.end_date() {
            text.push_str(&format!(" until {end}"));
        }
        if let Some(count) = self.count() {
            text.push_str(&format!(" for {count} occurrences"));
        }
        text
    }
}

impl TryFrom<RecurrenceSpec> for RecurrenceConfig {
    type Error = Error;

    fn try_from(mut spec: RecurrenceSpec) -> Result<Self> {
        if spec.interval == 0 {
            return Err(Error::Validation("interval must be >= 1".to_string()));
        }

        if let Some(day) = spec.days_of_week.iter().find(|d| **d > dates::MAX_DAY_OF_WEEK) {
            return Err(Error::Validation(format!(
                "day of week {day} out of range (0=Monday..6=Sunday)"
            )));
        }
        spec.days_of_week.sort_unstable();
        spec.days_of_week.dedup();

        if let Some(day) = spec.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(Error::Validation(format!(
                    "day of month {day} out of range (1-31)"
                )));
            }
        }
        if let Some(month) = spec.month_of_year {
            if !(1..=12).contains(&month) {
                return Err(Error::Validation(format!(
                    "month of year {month} out of range (1-12)"
                )));
            }
        }

        match spec.pattern {
            RecurrencePattern::Weekly if spec.days_of_week.is_empty() => {
                return Err(Error::Validation(
                    "weekly recurrence requires days of week".to_string(),
                ));
            }
            RecurrencePattern::Monthly if spec.day_of_month.is_none() => {
                return Err(Error::Validation(
                    "monthly recurrence requires a day of month".to_string(),
                ));
            }
            RecurrencePattern::Yearly => {
                let (Some(day), Some(month)) = (spec.day_of_month, spec.month_of_year) else {
                    return Err(Error::Validation(
                        "yearly recurrence requires a day of month and a month of year".to_string(),
                    ));
                };
                // Checked against a leap year so Feb 29 stays expressible.
                let longest = dates::days_in_month(2000, month).unwrap_or(31);
                if day > longest {
                    return Err(Error::Validation(format!(
                        "day {day} does not exist in month {month}"
                    )));
                }
            }
            _ => {}
        }

        match (spec.end_date, spec.count) {
            (Some(_), Some(_)) => {
                return Err(Error::Validation(
                    "end date and count cannot both be set".to_string(),
                ));
            }
            (None, Some(0)) => {
                return Err(Error::Validation("count must be >= 1".to_string()));
            }
            _ => {}
        }

        Ok(Self { spec })
    }
}

impl From<RecurrenceConfig> for RecurrenceSpec {
    fn from(config: RecurrenceConfig) -> Self {
        config.spec
    }
}

/// Compute the next occurrence strictly after `base`.
///
/// Returns `None` when the pattern's required fields are missing or out of
/// range. Callers treat that as "cannot schedule", not as a failure.
pub fn compute_next_occurrence(
    base: NaiveDate,
    pattern: RecurrencePattern,
    interval: u32,
    days_of_week: &[u8],
    day_of_month: Option<u32>,
    month_of_year: Option<u32>,
) -> Option<NaiveDate> {
    if interval == 0 {
        return None;
    }
    match pattern {
        RecurrencePattern::Daily => dates::add_days(base, interval as i64),
        RecurrencePattern::Weekly => next_weekly(base, interval, days_of_week),
        RecurrencePattern::Weekdays => dates::next_weekday(base),
        RecurrencePattern::Monthly => {
            let day = day_of_month.filter(|d| (1..=31).contains(d))?;
            dates::add_months_clamped(base, interval, day)
        }
        RecurrencePattern::Yearly => {
            let day = day_of_month.filter(|d| (1..=31).contains(d))?;
            let month = month_of_year.filter(|m| (1..=12).contains(m))?;
            dates::add_years_clamped(base, interval, month, day)
        }
        RecurrencePattern::Custom if days_of_week.is_empty() => {
            dates::add_days(base, interval as i64)
        }
        RecurrencePattern::Custom => next_weekly(base, interval, days_of_week),
    }
}

fn next_weekly(base: NaiveDate, interval: u32, days_of_week: &[u8]) -> Option<NaiveDate> {
    let current = dates::day_of_week(base);
    let mut candidates: Vec<u8> = days_of_week
        .iter()
        .copied()
        .filter(|d| *d <= dates::MAX_DAY_OF_WEEK)
        .collect();
    candidates.sort_unstable();

    if let Some(later) = candidates.iter().find(|d| **d > current) {
        return dates::add_days(base, (*later - current) as i64);
    }

    // Every candidate this week has passed: wrap to the earliest day,
    // `interval` weeks on.
    let first = *candidates.first()?;
    let offset = 7 * interval as i64 - current as i64 + first as i64;
    dates::add_days(base, offset)
}

/// Whether a template may still produce instances on `current_date`.
///
/// `generated` is the number of instances already created from the
/// template (the template itself is not counted).
pub fn should_advance(template: &Task, generated: usize, current_date: NaiveDate) -> bool {
    let Some(config) = template.recurrence.as_ref() else {
        return false;
    };
    if let Some(end) = config.end_date() {
        if current_date > end {
            return false;
        }
    }
    if let Some(count) = config.count() {
        if generated >= count as usize {
            return false;
        }
    }
    true
}

/// Build a new detached instance of `template` for `occurrence`.
///
/// The caller persists the returned task.
pub fn materialize_instance(
    template: &Task,
    occurrence: NaiveDate,
    id: String,
    now: DateTime<Utc>,
) -> Task {
    let start_date = template.start_date.map(|_| occurrence);
    let due_date = match (template.start_date, template.due_date) {
        (Some(start), Some(due)) => occurrence.checked_add_signed(due - start),
        (None, Some(_)) => Some(occurrence),
        _ => None,
    };

    Task {
        id,
        title: template.title.clone(),
        description: template.description.clone(),
        status: TaskStatus::Todo,
        priority: template.priority,
        project: template.project.clone(),
        assignee: template.assignee.clone(),
        estimated_hours: template.estimated_hours,
        position: template.position,
        categories: template.categories.clone(),
        tags: template.tags.clone(),
        start_date,
        due_date,
        completed_at: None,
        parent_task_id: None,
        recurrence_parent_id: Some(template.id.clone()),
        recurrence: None,
        created_at: now,
        updated_at: now,
    }
}

/// The most recently generated instance among `instances`.
pub fn latest_instance<'a>(instances: &[&'a Task]) -> Option<&'a Task> {
    instances
        .iter()
        .copied()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// The date the next occurrence is computed from: the later of the
/// template's and the latest instance's due date, falling back to start
/// dates and finally to `today`.
pub fn schedule_base(template: &Task, latest: Option<&Task>, today: NaiveDate) -> NaiveDate {
    let due = template.due_date.max(latest.and_then(|t| t.due_date));
    let start = template.start_date.max(latest.and_then(|t| t.start_date));
    due.or(start).unwrap_or(today)
}

/// Next occurrence date for `template`, ignoring the open-instance throttle.
pub fn next_occurrence(template: &Task, instances: &[&Task], today: NaiveDate) -> Option<NaiveDate> {
    let config = template.recurrence.as_ref()?;
    let base = schedule_base(template, latest_instance(instances), today);
    let next = config.next_after(base)?;
    match config.end_date() {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// Materialize the next instance of `template` if one is due.
///
/// `instances` are the tasks whose `recurrence_parent_id` is the template.
/// At most one open instance exists per template: while any instance is
/// not done, nothing is generated.
pub fn advance_if_due(
    template: &Task,
    instances: &[&Task],
    now: DateTime<Utc>,
    next_id: impl FnOnce() -> String,
) -> Option<Task> {
    let today = now.date_naive();
    if !should_advance(template, instances.len(), today) {
        debug!(template = %template.id, "recurrence exhausted or inactive");
        return None;
    }
    if let Some(open) = instances.iter().find(|task| task.status != TaskStatus::Done) {
        debug!(template = %template.id, open = %open.id, "open instance pending");
        return None;
    }
    let Some(occurrence) = next_occurrence(template, instances, today) else {
        debug!(template = %template.id, "no next occurrence could be scheduled");
        return None;
    };
    let instance = materialize_instance(template, occurrence, next_id(), now);
    debug!(
        template = %template.id,
        instance = %instance.id,
        %occurrence,
        "materialized recurring instance"
    );
    Some(instance)
}

fn day_name(day: u8) -> &'static str {
    match day {
        0 => "mon",
        1 => "tue",
        2 => "wed",
        3 => "thu",
        4 => "fri",
        5 => "sat",
        6 => "sun",
        _ => "?",
    }
}

/// Parse a day-of-week list such as `mon,wed,fri` or `0,2,4`.
pub fn parse_days_of_week(raw: &str) -> Result<Vec<u8>> {
    raw.split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .map(|part| match part.as_str() {
            "mon" | "monday" => Ok(0),
            "tue" | "tuesday" => Ok(1),
            "wed" | "wednesday" => Ok(2),
            "thu" | "thursday" => Ok(3),
            "fri" | "friday" => Ok(4),
            "sat" | "saturday" => Ok(5),
            "sun" | "sunday" => Ok(6),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|d| *d <= dates::MAX_DAY_OF_WEEK)
                .ok_or_else(|| Error::Validation(format!("unknown day of week '{other}'"))),
        })
        .collect()
}
