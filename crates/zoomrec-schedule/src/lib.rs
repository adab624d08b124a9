//! Schedule evaluation for zoomrec events.
//!
//! Expands an event's start and recurrence rule into concrete occurrences,
//! derives the actionable window around each one and picks the event a worker
//! should act on next. All evaluation is pure: callers pass `now` explicitly.

mod lease;
mod occurrence;
mod selector;
mod validate;
mod window;

pub use lease::{lease_is_stale, leased_window};
pub use occurrence::{parse_dtstart, parse_timezone, OccurrenceSchedule};
pub use selector::{select_next, Selection};
pub use validate::{accept_draft, validate_event};
pub use window::{LeadOffsets, Window, WindowState};

use chrono::{DateTime, Utc};
use zoomrec_types::{Event, ScheduleError};

/// Convenience wrapper: true when every window of `event` has expired.
pub fn event_is_past(
    event: &Event,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    let schedule = OccurrenceSchedule::resolve(event)?;
    Ok(schedule.is_past(event.duration, offsets, now))
}

/// Window of `event` that is open at `now`, if any.
pub fn active_window(
    event: &Event,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> Result<Option<Window>, ScheduleError> {
    let schedule = OccurrenceSchedule::resolve(event)?;
    Ok(schedule
        .current_window(event.duration, offsets, now)
        .filter(|window| window.is_active(now)))
}
