use crate::OccurrenceSchedule;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;
use zoomrec_types::{Event, EventDraft, EventType, ScheduleError};

// Meeting ids are at least nine digits; spaces between groups are not allowed.
fn zoom_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{9,}").ok()).as_ref()
}

fn looks_like_url(value: &str) -> bool {
    value.trim().to_ascii_lowercase().starts_with("http")
}

fn validate_url(value: &str) -> Result<(), ScheduleError> {
    let invalid = || ScheduleError::InvalidUrl {
        value: value.to_string(),
    };
    let parsed = Url::parse(value.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

/// Checks a typed record before it is stored.
pub fn validate_event(event: &Event) -> Result<(), ScheduleError> {
    if event.duration == 0 {
        return Err(ScheduleError::InvalidDuration {
            value: event.duration.to_string(),
        });
    }
    OccurrenceSchedule::resolve(event)?;

    if looks_like_url(&event.url) {
        validate_url(&event.url)?;
    }
    if event.event_type == EventType::Zoom {
        let id = event.id.trim();
        if id.is_empty() && event.url.trim().is_empty() {
            return Err(ScheduleError::MissingTarget);
        }
        if looks_like_url(id) {
            validate_url(id)?;
        } else if !id.is_empty() && !zoom_id_pattern().is_some_and(|pattern| pattern.is_match(id)) {
            return Err(ScheduleError::InvalidId {
                value: event.id.clone(),
            });
        }
    }
    if event.user_key.trim().is_empty() {
        return Err(ScheduleError::MissingField("user_key"));
    }
    event.lease()?;
    Ok(())
}

/// Converts a producer draft into a validated event.
pub fn accept_draft(
    draft: EventDraft,
    key: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<Event, ScheduleError> {
    let event = draft.into_event(key, now)?;
    validate_event(&event)?;
    Ok(event)
}
