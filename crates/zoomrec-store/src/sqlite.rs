//! SQLite-backed `EventStore` implementation with durable persistence.

use crate::{prepare_create, prepare_update, EventStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zoomrec_types::{
    format_store_timestamp, next_store_timestamp, Event, EventDraft, EventField, EventStatus,
    EventType, FieldValue, Filter, Instruction,
};

const EVENT_COLUMNS: &str = "key, type, title, dtstart, timezone, duration, rrule, id, password, \
     url, instruction, user_key, status, assigned, assigned_timestamp, created_timestamp, \
     last_updated_timestamp";

/// Persistent SQLite store backend.
#[derive(Debug)]
pub struct SqliteEventStore {
    db_path: PathBuf,
}

impl SqliteEventStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                key TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                dtstart TEXT NOT NULL,
                timezone TEXT NOT NULL,
                duration INTEGER NOT NULL,
                rrule TEXT NOT NULL,
                id TEXT NOT NULL,
                password TEXT NOT NULL,
                url TEXT NOT NULL,
                instruction TEXT NOT NULL,
                user_key TEXT NOT NULL,
                status TEXT NOT NULL,
                assigned TEXT NOT NULL,
                assigned_timestamp TEXT NOT NULL,
                created_timestamp TEXT NOT NULL,
                last_updated_timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_last_updated
                ON events (last_updated_timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type_status ON events (type, status);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
        let connection = self.open_connection()?;
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(key) = key {
            conditions.push("key = ?".to_string());
            values.push(Value::Text(key.to_string()));
        }
        for filter in filters {
            conditions.push(format!("{} {} ?", filter.field.as_str(), filter.op.as_str()));
            values.push(filter_value_to_db(filter)?);
        }

        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_timestamp ASC, key ASC");

        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(params_from_iter(values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(event_from_row(row)?);
        }
        Ok(events)
    }

    async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let event = prepare_create(draft, latest_stamp(&transaction)?, Utc::now())?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM events WHERE key = ?1",
                params![event.key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists(event.key));
        }

        insert_event(&transaction, &event)?;
        transaction.commit()?;
        tracing::debug!(event_key = %event.key, "event created");
        Ok(event)
    }

    async fn update(&self, event: Event) -> StoreResult<Event> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = transaction
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE key = ?1"),
                params![event.key],
                |row| Ok(event_from_row(row)),
            )
            .optional()?
            .transpose()?;
        let Some(existing) = existing else {
            return Err(StoreError::NotFound(event.key));
        };

        let updated = prepare_update(&existing, event, latest_stamp(&transaction)?, Utc::now())?;
        transaction.execute(
            r#"
            UPDATE events SET
                type = ?2, title = ?3, dtstart = ?4, timezone = ?5, duration = ?6, rrule = ?7,
                id = ?8, password = ?9, url = ?10, instruction = ?11, status = ?12,
                assigned = ?13, assigned_timestamp = ?14, last_updated_timestamp = ?15
            WHERE key = ?1
            "#,
            params![
                updated.key,
                updated.event_type.as_str(),
                updated.title,
                updated.dtstart,
                updated.timezone,
                i64::from(updated.duration),
                updated.rrule,
                updated.id,
                updated.password,
                updated.url,
                updated.instruction.to_string(),
                updated.status.as_str(),
                updated.assigned,
                updated.assigned_timestamp,
                format_store_timestamp(updated.last_updated_timestamp),
            ],
        )?;
        transaction.commit()?;
        Ok(updated)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = next_store_timestamp(latest_stamp(&transaction)?, Utc::now());
        let changed = transaction.execute(
            "UPDATE events SET status = ?2, last_updated_timestamp = ?3 WHERE key = ?1",
            params![key, EventStatus::Deleted.as_str(), format_store_timestamp(stamp)],
        )?;
        transaction.commit()?;
        if changed > 0 {
            tracing::debug!(event_key = %key, "event deleted");
        }
        Ok(changed > 0)
    }
}

fn latest_stamp(connection: &Connection) -> StoreResult<Option<DateTime<Utc>>> {
    let latest: Option<String> = connection.query_row(
        "SELECT MAX(last_updated_timestamp) FROM events",
        [],
        |row| row.get(0),
    )?;
    latest.as_deref().map(timestamp_from_db).transpose()
}

fn insert_event(connection: &Connection, event: &Event) -> StoreResult<()> {
    connection.execute(
        &format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            event.key,
            event.event_type.as_str(),
            event.title,
            event.dtstart,
            event.timezone,
            i64::from(event.duration),
            event.rrule,
            event.id,
            event.password,
            event.url,
            event.instruction.to_string(),
            event.user_key,
            event.status.as_str(),
            event.assigned,
            event.assigned_timestamp,
            format_store_timestamp(event.created_timestamp),
            format_store_timestamp(event.last_updated_timestamp),
        ],
    )?;
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> StoreResult<Event> {
    Ok(Event {
        key: row.get(0)?,
        event_type: event_type_from_db(&row.get::<_, String>(1)?)?,
        title: row.get(2)?,
        dtstart: row.get(3)?,
        timezone: row.get(4)?,
        duration: i64_to_u32("duration", row.get(5)?)?,
        rrule: row.get(6)?,
        id: row.get(7)?,
        password: row.get(8)?,
        url: row.get(9)?,
        instruction: Instruction::parse(&row.get::<_, String>(10)?),
        user_key: row.get(11)?,
        status: event_status_from_db(&row.get::<_, String>(12)?)?,
        assigned: row.get(13)?,
        assigned_timestamp: row.get(14)?,
        created_timestamp: timestamp_from_db(&row.get::<_, String>(15)?)?,
        last_updated_timestamp: timestamp_from_db(&row.get::<_, String>(16)?)?,
    })
}

fn filter_value_to_db(filter: &Filter) -> StoreResult<Value> {
    Ok(match (&filter.field, &filter.value) {
        (EventField::Duration, FieldValue::Text(text)) => text
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| StoreError::InvalidFilter(format!("duration {} {text}", filter.op)))?,
        (_, FieldValue::Integer(value)) => Value::Integer(*value),
        (_, FieldValue::Text(text)) => Value::Text(text.clone()),
        (_, FieldValue::Timestamp(value)) => Value::Text(format_store_timestamp(*value)),
    })
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "timestamp",
            value: value.to_string(),
        })
}

fn event_status_from_db(value: &str) -> StoreResult<EventStatus> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "status",
            value: value.to_string(),
        })
}

fn event_type_from_db(value: &str) -> StoreResult<EventType> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "type",
            value: value.to_string(),
        })
}

fn i64_to_u32(field: &'static str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}
