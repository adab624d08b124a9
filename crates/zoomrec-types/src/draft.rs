//! Loosely typed event submissions from producers (API, mail intake, chat).

use crate::{next_store_timestamp, Event, EventStatus, EventType, Instruction, ScheduleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Event as submitted by a producer, before defaults and validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtstart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Minutes, accepted as a JSON string or number.
    #[serde(
        default,
        deserialize_with = "deserialize_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationInput {
    Minutes(i64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<DurationInput>::deserialize(deserializer)?.map(|input| match input {
            DurationInput::Minutes(minutes) => minutes.to_string(),
            DurationInput::Text(text) => text,
        }),
    )
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ScheduleError> {
    present(value).ok_or(ScheduleError::MissingField(field))
}

impl EventDraft {
    /// Applies creation defaults and converts field types.
    ///
    /// Only shape is checked here; schedule-level validation (date format,
    /// timezone, recurrence, ids) runs on the resulting [`Event`].
    pub fn into_event(self, key: impl Into<String>, now: DateTime<Utc>) -> Result<Event, ScheduleError> {
        let event_type = match present(self.event_type) {
            Some(raw) => raw.parse::<EventType>()?,
            None => EventType::Zoom,
        };
        let dtstart = required(self.dtstart, "dtstart")?;
        let timezone = required(self.timezone, "timezone")?;
        let raw_duration = required(self.duration, "duration")?;
        let duration = raw_duration
            .parse::<u32>()
            .map_err(|_| ScheduleError::InvalidDuration {
                value: raw_duration.clone(),
            })?;
        let instruction = match present(self.instruction) {
            Some(raw) => Instruction::parse(&raw),
            None => Instruction::recording(),
        };
        let user_key = required(self.user_key, "user_key")?;
        let stamped = next_store_timestamp(None, now);

        Ok(Event {
            key: key.into(),
            event_type,
            title: present(self.title).unwrap_or_default(),
            dtstart,
            timezone,
            duration,
            rrule: present(self.rrule).unwrap_or_default(),
            id: present(self.id).unwrap_or_default(),
            password: self.password.unwrap_or_default(),
            url: present(self.url).unwrap_or_default(),
            instruction,
            user_key,
            status: EventStatus::Scheduled,
            assigned: String::new(),
            assigned_timestamp: String::new(),
            created_timestamp: stamped,
            last_updated_timestamp: stamped,
        })
    }
}
