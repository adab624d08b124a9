#![no_main]

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use zoomrec_schedule::{accept_draft, LeadOffsets, OccurrenceSchedule};
use zoomrec_types::EventDraft;

fuzz_target!(|data: &[u8]| {
    let Ok(draft) = serde_json::from_slice::<EventDraft>(data) else {
        return;
    };
    let Some(now) = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).single() else {
        return;
    };
    let Ok(event) = accept_draft(draft, "fuzz", now) else {
        return;
    };
    let schedule = OccurrenceSchedule::resolve(&event).expect("accepted events resolve");
    let mut previous = None;
    for window in schedule.windows(event.duration, LeadOffsets::default()).take(8) {
        assert!(window.start <= window.occurrence);
        assert!(window.occurrence < window.end);
        if let Some(previous) = previous {
            assert!(previous <= window.occurrence);
        }
        previous = Some(window.occurrence);
    }
});
