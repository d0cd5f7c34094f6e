// Recurring Task Domain Model (cron-scheduled job templates)

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::job::{JobArguments, Priority, Timestamp};

/// Parsed cron expression, evaluated in UTC
///
/// Accepts the classic 5-field form (minute precision, seconds pinned to 0)
/// as well as the 6/7-field form with a leading seconds column.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, DomainError> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            _ => trimmed.to_string(),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| DomainError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        let from = DateTime::<Utc>::from_timestamp_millis(after)?;
        self.schedule
            .after(&from)
            .next()
            .map(|at| at.timestamp_millis())
    }
}

/// Next fire time of `expression` strictly after `after`.
///
/// Returns `None` for an unparseable expression or one that never fires again.
pub fn next_fire(expression: &str, after: Timestamp) -> Option<Timestamp> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            tracing::warn!(expression = %expression, error = %e, "Ignoring invalid cron schedule");
            None
        }
    }
}

/// Recurring Task Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub key: String,
    pub schedule: String,
    pub class_name: String,
    pub queue_name: String,
    pub priority: Priority,
    pub arguments: JobArguments,
    /// Precomputed next fire time; `None` when the schedule is invalid or exhausted
    pub next_at: Option<Timestamp>,
}

impl RecurringTask {
    pub fn new(
        key: impl Into<String>,
        schedule: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            schedule: schedule.into(),
            class_name: class_name.into(),
            queue_name: "default".to_string(),
            priority: 0,
            arguments: JobArguments::default(),
            next_at: None,
        }
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = JobArguments::new(arguments);
        self
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        matches!(self.next_at, Some(at) if at <= now)
    }
}
