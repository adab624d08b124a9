use crate::{LeadOffsets, OccurrenceSchedule, Window};
use chrono::{DateTime, Utc};
use zoomrec_types::{Event, EventStatus, ScheduleError};

/// Window of the occurrence a lease was taken for: the first one still open
/// at the lease instant.
pub fn leased_window(
    schedule: &OccurrenceSchedule,
    event: &Event,
    offsets: LeadOffsets,
) -> Result<Option<Window>, ScheduleError> {
    let Some(lease) = event.lease()? else {
        return Ok(None);
    };
    let assigned_at = lease.assigned_at.with_timezone(&Utc);
    Ok(schedule.current_window(event.duration, offsets, assigned_at))
}

/// True when the event carries a lease whose occurrence window has closed
/// without the holder getting past `Processing`.
///
/// A lease taken after the last occurrence has no window and is stale as well.
pub fn lease_is_stale(
    event: &Event,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    if !matches!(event.status, EventStatus::Scheduled | EventStatus::Processing) {
        return Ok(false);
    }
    if event.lease()?.is_none() {
        return Ok(false);
    }
    let schedule = OccurrenceSchedule::resolve(event)?;
    Ok(match leased_window(&schedule, event, offsets)? {
        Some(window) => window.is_expired(now),
        None => true,
    })
}
