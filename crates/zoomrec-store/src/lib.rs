//! Event store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use zoomrec_schedule::{accept_draft, validate_event};
use zoomrec_types::{next_store_timestamp, ScheduleError, StatusTransitionError};

mod http;
mod sqlite;

pub use http::{HttpEventStore, HttpStoreConfig};
pub use sqlite::SqliteEventStore;
pub use zoomrec_types::{Event, EventDraft, EventField, EventStatus, FieldValue, Filter, FilterOp};

/// Result type for event store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event '{0}' not found")]
    NotFound(String),
    #[error("event '{0}' already exists")]
    AlreadyExists(String),
    #[error("field '{field}' of event '{key}' cannot be changed")]
    ImmutableField { key: String, field: &'static str },
    #[error(transparent)]
    Validation(#[from] ScheduleError),
    #[error(transparent)]
    Transition(#[from] StatusTransitionError),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("event service responded with status {status}: {body}")]
    Http { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for failures worth retrying on the next poll: transport errors,
    /// server-side HTTP failures and SQLite lock contention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => matches!(
                error.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Async store contract shared by producers and workers.
///
/// Every mutation advances `last_updated_timestamp` past every timestamp the
/// store has handed out before, so `last_updated_timestamp > mark` polls never
/// miss a write.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns events matching `key` (when given) and every filter, ordered by
    /// creation time.
    async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>>;

    async fn get_event(&self, key: &str) -> StoreResult<Option<Event>> {
        Ok(self.get(Some(key), &[]).await?.into_iter().next())
    }

    /// Validates `draft`, assigns a key and stores it.
    async fn create(&self, draft: EventDraft) -> StoreResult<Event>;

    /// Replaces the stored record with `event` and returns what was stored.
    async fn update(&self, event: Event) -> StoreResult<Event>;

    /// Soft delete. Returns `false` when `key` is unknown.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

pub(crate) fn new_event_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Builds the record to insert for `draft`.
pub(crate) fn prepare_create(
    draft: EventDraft,
    last_stamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StoreResult<Event> {
    let mut event = accept_draft(draft, new_event_key(), now)?;
    let stamp = next_store_timestamp(last_stamp, now);
    event.created_timestamp = stamp;
    event.last_updated_timestamp = stamp;
    Ok(event)
}

/// Checks an update against the stored record and stamps it.
pub(crate) fn prepare_update(
    existing: &Event,
    mut incoming: Event,
    last_stamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StoreResult<Event> {
    if incoming.user_key != existing.user_key {
        return Err(StoreError::ImmutableField {
            key: existing.key.clone(),
            field: "user_key",
        });
    }
    if incoming.created_timestamp != existing.created_timestamp {
        return Err(StoreError::ImmutableField {
            key: existing.key.clone(),
            field: "created_timestamp",
        });
    }
    existing.status.ensure_transition(incoming.status)?;
    validate_event(&incoming)?;
    let previous = last_stamp.max(Some(existing.last_updated_timestamp));
    incoming.last_updated_timestamp = next_store_timestamp(previous, now);
    Ok(incoming)
}

pub(crate) fn sort_events(events: &mut [Event]) {
    events.sort_by(|left, right| {
        left.created_timestamp
            .cmp(&right.created_timestamp)
            .then_with(|| left.key.cmp(&right.key))
    });
}

/// In-memory implementation for tests and single-process setups.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    events: HashMap<String, Event>,
    last_stamp: Option<DateTime<Utc>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully formed record as-is, e.g. fixtures in tests.
    pub async fn insert(&self, event: Event) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.key) {
            return Err(StoreError::AlreadyExists(event.key));
        }
        inner.last_stamp = inner.last_stamp.max(Some(event.last_updated_timestamp));
        inner.events.insert(event.key.clone(), event);
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
        let inner = self.inner.read().await;
        let mut events: Vec<Event> = inner
            .events
            .values()
            .filter(|event| key.is_none_or(|key| event.key == key))
            .filter(|event| filters.iter().all(|filter| filter.matches(event)))
            .cloned()
            .collect();
        sort_events(&mut events);
        Ok(events)
    }

    async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
        let mut inner = self.inner.write().await;
        let event = prepare_create(draft, inner.last_stamp, Utc::now())?;
        if inner.events.contains_key(&event.key) {
            return Err(StoreError::AlreadyExists(event.key));
        }
        inner.last_stamp = Some(event.last_updated_timestamp);
        inner.events.insert(event.key.clone(), event.clone());
        tracing::debug!(event_key = %event.key, "event created");
        Ok(event)
    }

    async fn update(&self, event: Event) -> StoreResult<Event> {
        let mut inner = self.inner.write().await;
        let last_stamp = inner.last_stamp;
        let Some(existing) = inner.events.get(&event.key) else {
            return Err(StoreError::NotFound(event.key));
        };
        let updated = prepare_update(existing, event, last_stamp, Utc::now())?;
        inner.last_stamp = Some(updated.last_updated_timestamp);
        inner.events.insert(updated.key.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let stamp = next_store_timestamp(inner.last_stamp, Utc::now());
        let Some(existing) = inner.events.get_mut(key) else {
            return Ok(false);
        };
        existing.status = EventStatus::Deleted;
        existing.last_updated_timestamp = stamp.max(existing.last_updated_timestamp);
        inner.last_stamp = Some(stamp);
        tracing::debug!(event_key = %key, "event deleted");
        Ok(true)
    }
}
