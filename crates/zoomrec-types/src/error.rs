use thiserror::Error;

/// Validation failure for an event record, surfaced to the record's creator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("missing attribute {0}")]
    MissingField(&'static str),
    #[error("invalid date/time format '{value}', use DD/MM/YYYY HH:MM")]
    InvalidDateTime { value: String },
    #[error("local time '{value}' does not exist in timezone {timezone}")]
    NonexistentLocalTime { value: String, timezone: String },
    #[error("invalid timezone '{value}', use values such as 'America/New_York'")]
    InvalidTimezone { value: String },
    #[error("invalid duration '{value}', duration must be a positive number of minutes")]
    InvalidDuration { value: String },
    #[error("invalid attribute rrule '{value}', not a valid RRULE string: {reason}")]
    InvalidRecurrence { value: String, reason: String },
    #[error("invalid zoom id '{value}', must be a number with minimum 9 digits (no blanks)")]
    InvalidId { value: String },
    #[error("invalid URL format in url '{value}'")]
    InvalidUrl { value: String },
    #[error("zoom events need an id or a url")]
    MissingTarget,
    #[error("invalid {field} '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("assigned and assigned_timestamp must both be provided or both be empty")]
    PartialLease,
    #[error("invalid assigned_timestamp '{value}', expected an ISO 8601 instant")]
    InvalidLeaseTimestamp { value: String },
}
