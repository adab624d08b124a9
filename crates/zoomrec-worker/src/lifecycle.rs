//! Status transitions a claimed event goes through while a worker acts on it.
//!
//! `Scheduled(leased) -> Processing -> [Postprocessing] -> Scheduled(unleased)`,
//! or `Deleted` when the processed occurrence was the last one.

use chrono::Utc;
use zoomrec_schedule::{OccurrenceSchedule, Window};
use zoomrec_store::{EventStore, StoreResult};
use zoomrec_types::{Event, EventStatus};

/// How an event left a worker's hands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Lease cleared; a later occurrence remains claimable.
    Rescheduled(Event),
    /// The processed occurrence was the last one.
    Retired(Event),
}

impl ReleaseOutcome {
    pub fn event(&self) -> &Event {
        match self {
            Self::Rescheduled(event) | Self::Retired(event) => event,
        }
    }
}

async fn transition(
    store: &dyn EventStore,
    mut event: Event,
    next: EventStatus,
) -> StoreResult<Event> {
    event.status.ensure_transition(next)?;
    let from = event.status;
    event.status = next;
    let stored = store.update(event).await?;
    tracing::info!(
        event_key = %stored.key,
        from = %from,
        to = %next,
        "event status changed"
    );
    Ok(stored)
}

/// Marks the hand-off to the action executor.
pub async fn begin_processing(store: &dyn EventStore, event: Event) -> StoreResult<Event> {
    transition(store, event, EventStatus::Processing).await
}

pub async fn enter_postprocessing(store: &dyn EventStore, event: Event) -> StoreResult<Event> {
    transition(store, event, EventStatus::Postprocessing).await
}

/// True when `event` produces another occurrence after the processed one.
///
/// A record whose schedule no longer resolves is kept: deleting it would hide
/// the problem from its owner.
pub fn has_further_occurrence(event: &Event, processed: &Window) -> bool {
    match OccurrenceSchedule::resolve(event) {
        Ok(schedule) => schedule.has_occurrence_after(processed.occurrence.with_timezone(&Utc)),
        Err(error) => {
            tracing::warn!(event_key = %event.key, %error, "schedule no longer resolves");
            true
        }
    }
}

/// Clears the lease and either reschedules or retires the event.
pub async fn release(
    store: &dyn EventStore,
    mut event: Event,
    processed: &Window,
) -> StoreResult<ReleaseOutcome> {
    let next = if has_further_occurrence(&event, processed) {
        EventStatus::Scheduled
    } else {
        EventStatus::Deleted
    };
    event.status.ensure_transition(next)?;
    event.status = next;
    event.clear_assignment();
    let stored = store.update(event).await?;

    if next == EventStatus::Deleted {
        tracing::info!(event_key = %stored.key, "retired event after last occurrence");
        Ok(ReleaseOutcome::Retired(stored))
    } else {
        tracing::info!(event_key = %stored.key, "released event for its next occurrence");
        Ok(ReleaseOutcome::Rescheduled(stored))
    }
}
