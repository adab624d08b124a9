//! Incremental mirror of the store, driven by a `last_updated_timestamp`
//! high-water mark.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use zoomrec_schedule::{lease_is_stale, LeadOffsets};
use zoomrec_store::{EventStore, StoreResult};
use zoomrec_types::{Event, EventField, EventStatus, EventType, Filter};

/// What one merged batch did to the mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub upserted: usize,
    pub removed: usize,
}

/// A worker's local view of the events it may act on.
#[derive(Debug, Clone)]
pub struct SyncMirror {
    worker_id: String,
    event_type: EventType,
    events: HashMap<String, Event>,
    high_water_mark: Option<DateTime<Utc>>,
}

impl SyncMirror {
    pub fn new(worker_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            worker_id: worker_id.into(),
            event_type,
            events: HashMap::new(),
            high_water_mark: None,
        }
    }

    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        self.high_water_mark
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Event> {
        self.events.get(key)
    }

    /// Mirrored events in creation order, so selection ties stay deterministic.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.values().cloned().collect();
        events.sort_by(|left, right| {
            left.created_timestamp
                .cmp(&right.created_timestamp)
                .then_with(|| left.key.cmp(&right.key))
        });
        events
    }

    /// Filters for the next poll.
    ///
    /// The first poll loads every live event of the mirrored type; later polls
    /// only ask for records changed after the high-water mark, deletions
    /// included.
    pub fn poll_filters(&self) -> Vec<Filter> {
        let mut filters = vec![Filter::equal(EventField::Type, self.event_type)];
        match self.high_water_mark {
            Some(mark) => filters.push(Filter::greater(EventField::LastUpdatedTimestamp, mark)),
            None => filters.push(Filter::not_equal(EventField::Status, EventStatus::Deleted)),
        }
        filters
    }

    /// Merges a batch of changed records.
    ///
    /// Deleted events and events leased to other workers leave the mirror;
    /// everything else is upserted. The high-water mark only moves forward.
    pub fn merge(&mut self, batch: Vec<Event>) -> MergeReport {
        let mut report = MergeReport::default();
        for event in batch {
            self.high_water_mark = self
                .high_water_mark
                .max(Some(event.last_updated_timestamp));
            if event.status == EventStatus::Deleted || event.is_held_by_other(&self.worker_id) {
                if self.events.remove(&event.key).is_some() {
                    report.removed += 1;
                }
                continue;
            }
            self.events.insert(event.key.clone(), event);
            report.upserted += 1;
        }
        report
    }

    /// Records a write this worker made itself. The high-water mark is left
    /// alone so the next poll still sees concurrent writes from others.
    pub fn record_local(&mut self, event: Event) {
        if event.status == EventStatus::Deleted {
            self.events.remove(&event.key);
        } else {
            self.events.insert(event.key.clone(), event);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Event> {
        self.events.remove(key)
    }

    /// Polls the store for changes and merges them.
    pub async fn refresh(&mut self, store: &dyn EventStore) -> StoreResult<MergeReport> {
        let batch = store.get(None, &self.poll_filters()).await?;
        let report = self.merge(batch);
        tracing::debug!(
            worker_id = %self.worker_id,
            upserted = report.upserted,
            removed = report.removed,
            mirrored = self.events.len(),
            "merged sync batch"
        );
        Ok(report)
    }

    /// Pulls in events whose lease was abandoned by another worker.
    ///
    /// Such records never change again on their own, so the delta poll alone
    /// would never bring them back once they left the mirror.
    pub async fn adopt_stale_leases(
        &mut self,
        store: &dyn EventStore,
        offsets: LeadOffsets,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let filters = [
            Filter::equal(EventField::Type, self.event_type),
            Filter::not_equal(EventField::Status, EventStatus::Deleted),
            Filter::not_equal(EventField::Assigned, ""),
        ];
        let mut adopted = 0;
        for event in store.get(None, &filters).await? {
            if !event.is_held_by_other(&self.worker_id) || self.events.contains_key(&event.key) {
                continue;
            }
            match lease_is_stale(&event, offsets, now) {
                Ok(true) => {
                    tracing::info!(
                        event_key = %event.key,
                        previous_worker = %event.assigned,
                        "detected stale lease"
                    );
                    self.events.insert(event.key.clone(), event);
                    adopted += 1;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(event_key = %event.key, %error, "skipping malformed lease");
                }
            }
        }
        Ok(adopted)
    }
}
