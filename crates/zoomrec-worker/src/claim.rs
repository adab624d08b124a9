//! Optimistic lease-based claiming of event occurrences.
//!
//! The store offers no compare-and-swap, so two workers can both observe an
//! empty lease and both write one. The loser notices after its confirmation
//! read (or its read after the action, see [`crate::EventWorker`]) and yields.

use chrono::{DateTime, Utc};
use zoomrec_schedule::{active_window, lease_is_stale, LeadOffsets, Window};
use zoomrec_store::{EventStore, StoreResult};
use zoomrec_types::{Event, EventStatus, ScheduleError};

/// Why a worker may not claim an event right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    Missing,
    Deleted,
    HeldByOther { worker_id: String },
    /// Unassigned but already past `Scheduled`; left for its owner to settle.
    Busy { status: EventStatus },
    /// No occurrence window is open at the evaluation instant.
    NotActive,
    InvalidRecord(ScheduleError),
}

/// Result of evaluating a claim against one event snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Unassigned and active: write a fresh lease.
    Claim { window: Window },
    /// Stale lease of `previous`: overwrite it.
    TakeOver { window: Window, previous: String },
    /// Already leased to this worker: nothing to write.
    AlreadyHeld { window: Window },
    Reject(ClaimRejection),
}

/// Decides whether `worker_id` may claim `event` at `now`.
pub fn evaluate_claim(
    event: &Event,
    worker_id: &str,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> ClaimDecision {
    if event.status == EventStatus::Deleted {
        return ClaimDecision::Reject(ClaimRejection::Deleted);
    }
    let lease = match event.lease() {
        Ok(lease) => lease,
        Err(error) => return ClaimDecision::Reject(ClaimRejection::InvalidRecord(error)),
    };
    let stale = match lease_is_stale(event, offsets, now) {
        Ok(stale) => stale,
        Err(error) => return ClaimDecision::Reject(ClaimRejection::InvalidRecord(error)),
    };
    let window = match active_window(event, offsets, now) {
        Ok(window) => window,
        Err(error) => return ClaimDecision::Reject(ClaimRejection::InvalidRecord(error)),
    };

    match lease {
        Some(lease) if !stale => {
            if lease.worker_id != worker_id {
                return ClaimDecision::Reject(ClaimRejection::HeldByOther {
                    worker_id: lease.worker_id,
                });
            }
            match window {
                Some(window) => ClaimDecision::AlreadyHeld { window },
                None => ClaimDecision::Reject(ClaimRejection::NotActive),
            }
        }
        Some(lease) => match window {
            Some(window) if lease.worker_id == worker_id => ClaimDecision::Claim { window },
            Some(window) => ClaimDecision::TakeOver {
                window,
                previous: lease.worker_id,
            },
            None => ClaimDecision::Reject(ClaimRejection::NotActive),
        },
        None => {
            if event.status != EventStatus::Scheduled {
                return ClaimDecision::Reject(ClaimRejection::Busy {
                    status: event.status,
                });
            }
            match window {
                Some(window) => ClaimDecision::Claim { window },
                None => ClaimDecision::Reject(ClaimRejection::NotActive),
            }
        }
    }
}

/// Outcome of [`claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A lease was written; carries the stored record and the claimed window.
    Claimed { event: Event, window: Window },
    /// The worker already held the lease; the record is returned unchanged.
    AlreadyHeld { event: Event, window: Window },
    Rejected(ClaimRejection),
}

impl ClaimOutcome {
    pub fn is_held(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Reads `key` fresh from the store and claims it for `worker_id` when allowed.
///
/// The lease timestamp is written in the event's own timezone. A takeover of a
/// lease abandoned mid-action also resets the status to `Scheduled`.
pub async fn claim(
    store: &dyn EventStore,
    key: &str,
    worker_id: &str,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> StoreResult<ClaimOutcome> {
    let Some(current) = store.get_event(key).await? else {
        return Ok(ClaimOutcome::Rejected(ClaimRejection::Missing));
    };

    let (window, previous) = match evaluate_claim(&current, worker_id, offsets, now) {
        ClaimDecision::AlreadyHeld { window } => {
            return Ok(ClaimOutcome::AlreadyHeld {
                event: current,
                window,
            });
        }
        ClaimDecision::Reject(rejection) => return Ok(ClaimOutcome::Rejected(rejection)),
        ClaimDecision::Claim { window } => (window, None),
        ClaimDecision::TakeOver { window, previous } => (window, Some(previous)),
    };

    let mut leased = current;
    let local_now = now.with_timezone(&window.occurrence.timezone()).fixed_offset();
    leased.assign(worker_id, local_now);
    if leased.status == EventStatus::Processing {
        leased.status = EventStatus::Scheduled;
    }
    let stored = store.update(leased).await?;

    match previous {
        Some(previous) => tracing::info!(
            event_key = %key,
            worker_id = %worker_id,
            previous_worker = %previous,
            "took over stale lease"
        ),
        None => tracing::info!(event_key = %key, worker_id = %worker_id, "claimed event"),
    }
    Ok(ClaimOutcome::Claimed {
        event: stored,
        window,
    })
}

/// Re-reads `key` and returns it only while `worker_id` still holds the lease.
pub async fn confirm_lease(
    store: &dyn EventStore,
    key: &str,
    worker_id: &str,
) -> StoreResult<Option<Event>> {
    Ok(store
        .get_event(key)
        .await?
        .filter(|event| event.status != EventStatus::Deleted && event.is_assigned_to(worker_id)))
}
