//! Pipeline run schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When and how often a pipeline should run.
///
/// A schedule is either cron based or interval based (start time plus
/// interval).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schedule {
    /// Optional schedule name; derived from the run name template if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// First run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// No runs after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_second: Option<u64>,
    /// Whether missed runs are backfilled.
    #[serde(default)]
    pub catchup: bool,
}

impl Schedule {
    /// Creates a cron schedule.
    #[must_use]
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expression.into()),
            ..Self::default()
        }
    }

    /// Creates an interval schedule.
    #[must_use]
    pub fn interval(start_time: DateTime<Utc>, interval_second: u64) -> Self {
        Self {
            start_time: Some(start_time),
            interval_second: Some(interval_second),
            ..Self::default()
        }
    }

    /// Sets the schedule name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Checks that the schedule is either cron or interval based.
    ///
    /// # Errors
    ///
    /// Returns the reason the schedule is invalid.
    pub fn validate(&self) -> Result<(), String> {
        let interval = self.start_time.is_some() && self.interval_second.is_some();
        match (&self.cron_expression, interval) {
            (Some(_), true) => Err("a schedule is either cron based or interval based, not both".to_string()),
            (Some(cron), false) if cron.split_whitespace().count() < 5 => {
                Err(format!("'{cron}' is not a valid cron expression"))
            }
            (Some(_), false) | (None, true) => {
                if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
                    if end <= start {
                        return Err("the end time must be after the start time".to_string());
                    }
                }
                Ok(())
            }
            (None, false) => Err(
                "either a cron expression or a start time and interval are required".to_string(),
            ),
        }
    }
}
