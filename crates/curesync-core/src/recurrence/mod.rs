//! Recurrence model: the parsed, normalized form of a medication schedule.
//!
//! The stored representation is the JSON object written by the medication
//! form (`{"type":"daily","times":["08:00"]}` and friends). This module is
//! its only parser. Parsing fails closed: anything malformed becomes "no
//! rule" and the medication simply has no reminders.

mod rule;
mod time;

pub use rule::*;
pub use time::*;

use thiserror::Error;

/// Reasons a stored schedule was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecurrenceError {
    #[error("Schedule is not valid JSON: {0}")]
    Json(String),

    #[error("Unknown schedule type: {0}")]
    UnknownKind(String),

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Schedule has no times")]
    EmptyTimes,

    #[error("Weekly schedule has no days")]
    EmptyDays,

    #[error("Invalid weekday index: {0}")]
    InvalidWeekday(i64),

    #[error("Interval hours must be at least 1, got {0}")]
    InvalidInterval(i64),
}

pub type RecurrenceResult<T> = Result<T, RecurrenceError>;

/// Parse a stored schedule, treating any malformed input as absent.
///
/// `None` and blank strings mean "no schedule" and are not logged.
pub fn parse(raw: Option<&str>) -> Option<RecurrenceRule> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match RecurrenceRule::parse_strict(raw) {
        Ok(rule) if rule.validate() => Some(rule),
        Ok(rule) => {
            tracing::warn!(?rule, "Schedule failed validation, treating as absent");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed schedule, treating as absent");
            None
        }
    }
}
