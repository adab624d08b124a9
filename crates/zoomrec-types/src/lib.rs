//! Shared data types for zoomrec event scheduling.
//!
//! Defines the event record exchanged between producers, the store and the
//! workers, plus the status lifecycle, the instruction lookup and the
//! validation error taxonomy.

use chrono::{DateTime, Duration, DurationRound, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod draft;
mod error;
mod filter;
mod instruction;

pub use draft::EventDraft;
pub use error::ScheduleError;
pub use filter::{FieldValue, Filter, FilterOp};
pub use instruction::{Instruction, InstructionKey};

/// `strftime` layout of `Event::dtstart` (naive local time).
pub const DTSTART_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Error returned when a status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("invalid event_status transition: {from:?} -> {to:?}")]
    Invalid { from: EventStatus, to: EventStatus },
}

/// Enum value as it appears on the wire: a name or a legacy numeric code.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireCode {
    Code(u64),
    Name(String),
}

impl WireCode {
    fn into_text(self) -> String {
        match self {
            Self::Code(code) => code.to_string(),
            Self::Name(name) => name,
        }
    }
}

/// Lifecycle state of an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "WireCode")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Processing,
    Postprocessing,
    Deleted,
}

impl EventStatus {
    /// Returns true when this status can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Scheduled, Self::Processing)
                | (Self::Scheduled, Self::Deleted)
                | (Self::Processing, Self::Postprocessing)
                | (Self::Processing, Self::Scheduled)
                | (Self::Processing, Self::Deleted)
                | (Self::Postprocessing, Self::Scheduled)
                | (Self::Postprocessing, Self::Deleted)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(StatusTransitionError::Invalid { from: self, to: next })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Postprocessing => "postprocessing",
            Self::Deleted => "deleted",
        }
    }

    /// Human readable label used in listings.
    pub fn description(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Processing => "Processing",
            Self::Postprocessing => "Postprocessing",
            Self::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ScheduleError;

    // Numeric codes are the legacy wire encoding.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "1" => Ok(Self::Scheduled),
            "processing" | "2" => Ok(Self::Processing),
            "postprocessing" | "3" => Ok(Self::Postprocessing),
            "deleted" | "99" => Ok(Self::Deleted),
            _ => Err(ScheduleError::InvalidValue {
                field: "status",
                value: value.to_string(),
            }),
        }
    }
}

impl TryFrom<WireCode> for EventStatus {
    type Error = ScheduleError;

    fn try_from(value: WireCode) -> Result<Self, Self::Error> {
        value.into_text().parse()
    }
}

/// Routing target of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", try_from = "WireCode")]
pub enum EventType {
    /// Meeting hosted by the meeting provider; joined and recorded by a worker.
    #[default]
    Zoom,
    /// Internal event, e.g. a maintenance window for the worker itself.
    System,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zoom => "zoom",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zoom" | "1" => Ok(Self::Zoom),
            "system" | "2" => Ok(Self::System),
            _ => Err(ScheduleError::InvalidValue {
                field: "type",
                value: value.to_string(),
            }),
        }
    }
}

impl TryFrom<WireCode> for EventType {
    type Error = ScheduleError;

    fn try_from(value: WireCode) -> Result<Self, Self::Error> {
        value.into_text().parse()
    }
}

/// Addressable fields of an event record, used by store filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    Key,
    Type,
    Title,
    Dtstart,
    Timezone,
    Duration,
    Rrule,
    Id,
    Password,
    Url,
    Instruction,
    UserKey,
    Status,
    Assigned,
    AssignedTimestamp,
    CreatedTimestamp,
    LastUpdatedTimestamp,
}

impl EventField {
    pub const ALL: [EventField; 17] = [
        Self::Key,
        Self::Type,
        Self::Title,
        Self::Dtstart,
        Self::Timezone,
        Self::Duration,
        Self::Rrule,
        Self::Id,
        Self::Password,
        Self::Url,
        Self::Instruction,
        Self::UserKey,
        Self::Status,
        Self::Assigned,
        Self::AssignedTimestamp,
        Self::CreatedTimestamp,
        Self::LastUpdatedTimestamp,
    ];

    /// Wire and column name of the field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Type => "type",
            Self::Title => "title",
            Self::Dtstart => "dtstart",
            Self::Timezone => "timezone",
            Self::Duration => "duration",
            Self::Rrule => "rrule",
            Self::Id => "id",
            Self::Password => "password",
            Self::Url => "url",
            Self::Instruction => "instruction",
            Self::UserKey => "user_key",
            Self::Status => "status",
            Self::Assigned => "assigned",
            Self::AssignedTimestamp => "assigned_timestamp",
            Self::CreatedTimestamp => "created_timestamp",
            Self::LastUpdatedTimestamp => "last_updated_timestamp",
        }
    }
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventField {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == value)
            .ok_or_else(|| ScheduleError::InvalidValue {
                field: "filter field",
                value: value.to_string(),
            })
    }
}

/// A worker's claim on an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub worker_id: String,
    /// Claim instant, expressed in the event's own timezone.
    pub assigned_at: DateTime<FixedOffset>,
}

/// The unit of scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    #[serde(default)]
    pub title: String,
    /// Naive local start, see [`DTSTART_FORMAT`].
    pub dtstart: String,
    /// IANA zone name `dtstart` is interpreted in.
    pub timezone: String,
    /// Length in minutes.
    pub duration: u32,
    /// RFC 5545 recurrence rule, empty for one-off events.
    #[serde(default)]
    pub rrule: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub instruction: Instruction,
    pub user_key: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub assigned: String,
    #[serde(default)]
    pub assigned_timestamp: String,
    pub created_timestamp: DateTime<Utc>,
    pub last_updated_timestamp: DateTime<Utc>,
}

impl Event {
    /// Returns the recurrence rule, if the event recurs.
    pub fn recurrence(&self) -> Option<&str> {
        let rule = self.rrule.trim();
        (!rule.is_empty()).then_some(rule)
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence().is_some()
    }

    /// Decodes the `(assigned, assigned_timestamp)` pair.
    pub fn lease(&self) -> Result<Option<Lease>, ScheduleError> {
        let worker = self.assigned.trim();
        let timestamp = self.assigned_timestamp.trim();
        match (worker.is_empty(), timestamp.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => {
                let assigned_at = DateTime::parse_from_rfc3339(timestamp).map_err(|_| {
                    ScheduleError::InvalidLeaseTimestamp {
                        value: timestamp.to_string(),
                    }
                })?;
                Ok(Some(Lease {
                    worker_id: worker.to_string(),
                    assigned_at,
                }))
            }
            _ => Err(ScheduleError::PartialLease),
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.assigned.trim().is_empty()
    }

    pub fn is_assigned_to(&self, worker_id: &str) -> bool {
        self.assigned.trim() == worker_id
    }

    /// True when the event carries a lease belonging to another worker.
    pub fn is_held_by_other(&self, worker_id: &str) -> bool {
        self.is_assigned() && !self.is_assigned_to(worker_id)
    }

    /// Sets both lease fields at once.
    pub fn assign(&mut self, worker_id: &str, at: DateTime<FixedOffset>) {
        self.assigned = worker_id.to_string();
        self.assigned_timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, false);
    }

    pub fn clear_assignment(&mut self) {
        self.assigned.clear();
        self.assigned_timestamp.clear();
    }

    /// Current value of `field`, typed for filter comparison.
    pub fn field_value(&self, field: EventField) -> FieldValue {
        match field {
            EventField::Key => FieldValue::from(self.key.as_str()),
            EventField::Type => FieldValue::from(self.event_type),
            EventField::Title => FieldValue::from(self.title.as_str()),
            EventField::Dtstart => FieldValue::from(self.dtstart.as_str()),
            EventField::Timezone => FieldValue::from(self.timezone.as_str()),
            EventField::Duration => FieldValue::Integer(i64::from(self.duration)),
            EventField::Rrule => FieldValue::from(self.rrule.as_str()),
            EventField::Id => FieldValue::from(self.id.as_str()),
            EventField::Password => FieldValue::from(self.password.as_str()),
            EventField::Url => FieldValue::from(self.url.as_str()),
            EventField::Instruction => FieldValue::Text(self.instruction.to_string()),
            EventField::UserKey => FieldValue::from(self.user_key.as_str()),
            EventField::Status => FieldValue::from(self.status),
            EventField::Assigned => FieldValue::from(self.assigned.as_str()),
            EventField::AssignedTimestamp => FieldValue::from(self.assigned_timestamp.as_str()),
            EventField::CreatedTimestamp => FieldValue::Timestamp(self.created_timestamp),
            EventField::LastUpdatedTimestamp => FieldValue::Timestamp(self.last_updated_timestamp),
        }
    }
}

/// Formats a store timestamp with fixed microsecond precision so the text
/// form sorts like the instant.
pub fn format_store_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Returns the next `last_updated_timestamp`: `now` truncated to microseconds,
/// bumped past `previous` when the clock has not moved on.
pub fn next_store_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or(now);
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}
