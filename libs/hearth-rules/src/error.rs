//! Rule Engine Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// A named timer with a live handle already exists
    #[error("Timer already exists: {0}")]
    TimerExists(String),

    /// Cron expression could not be parsed
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Time-of-day trigger carries an out-of-range field
    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    /// Context has no cron schedule (not a cron/time-of-day trigger)
    #[error("Context is not schedulable: {0}")]
    NotScheduled(String),
}
