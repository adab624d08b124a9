use crate::{LeadOffsets, OccurrenceSchedule, Window};
use chrono::{DateTime, Utc};
use zoomrec_types::Event;

/// Event chosen by [`select_next`] together with the window that made it win.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Position of the event in the input sequence.
    pub index: usize,
    pub event: &'a Event,
    pub window: Window,
}

/// Picks the event whose next non-expired window ends soonest.
///
/// Events whose schedule cannot be resolved are skipped. Ties keep the event
/// that appears first in `events`.
pub fn select_next<'a, I>(events: I, offsets: LeadOffsets, now: DateTime<Utc>) -> Option<Selection<'a>>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut best: Option<Selection<'a>> = None;
    for (index, event) in events.into_iter().enumerate() {
        let schedule = match OccurrenceSchedule::resolve(event) {
            Ok(schedule) => schedule,
            Err(error) => {
                tracing::warn!(
                    event_key = %event.key,
                    %error,
                    "skipping event with unresolvable schedule"
                );
                continue;
            }
        };
        let Some(window) = schedule.current_window(event.duration, offsets, now) else {
            continue;
        };
        let better = best
            .as_ref()
            .map_or(true, |current| window.end < current.window.end);
        if better {
            best = Some(Selection {
                index,
                event,
                window,
            });
        }
    }
    best
}
