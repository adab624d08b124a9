use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use zoomrec_schedule::LeadOffsets;
use zoomrec_store::{EventStore, InMemoryEventStore, SqliteEventStore, StoreResult};
use zoomrec_types::{Event, EventDraft, EventStatus, Filter};
use zoomrec_worker::{
    claim, ActionExecutor, ActionOutcome, ClaimOutcome, CycleAction, EventWorker, ReleaseOutcome,
    WorkerConfig,
};

/// Counts performed actions and optionally blocks until released.
#[derive(Default)]
struct GatedExecutor {
    performed: Mutex<Vec<String>>,
    started: Notify,
    gate: Option<Notify>,
}

impl GatedExecutor {
    fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    fn performed(&self) -> Vec<String> {
        self.performed
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionExecutor for GatedExecutor {
    async fn perform(&self, event: &Event, _deadline: DateTime<Utc>) -> Result<ActionOutcome> {
        if let Ok(mut calls) = self.performed.lock() {
            calls.push(event.key.clone());
        }
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(ActionOutcome::for_event(event))
    }

    async fn postprocess(&self, _event: &Event, _action: &str) -> Result<()> {
        Ok(())
    }
}

/// Lets a rival worker's lease write land right after the first lease write
/// of `victim`, as if both had read the event while it was unassigned.
struct ContendedStore {
    inner: InMemoryEventStore,
    victim: String,
    rival: String,
    races_remaining: AtomicUsize,
}

#[async_trait]
impl EventStore for ContendedStore {
    async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
        self.inner.get(key, filters).await
    }

    async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
        self.inner.create(draft).await
    }

    async fn update(&self, event: Event) -> StoreResult<Event> {
        let stored = self.inner.update(event).await?;
        let claimed_by_victim = stored.is_assigned_to(&self.victim);
        if claimed_by_victim
            && self
                .races_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
        {
            let mut rival = stored.clone();
            rival.assigned = self.rival.clone();
            self.inner.update(rival).await?;
        }
        Ok(stored)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }
}

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0)
        .single()
        .expect("valid instant")
}

fn meeting(rrule: Option<&str>) -> EventDraft {
    EventDraft {
        title: Some("Team sync".to_string()),
        dtstart: Some("03/06/2024 12:00".to_string()),
        timezone: Some("Europe/Berlin".to_string()),
        duration: Some("30".to_string()),
        rrule: rrule.map(str::to_string),
        id: Some("987654321".to_string()),
        user_key: Some("owner-1".to_string()),
        ..EventDraft::default()
    }
}

fn config(worker_id: &str) -> WorkerConfig {
    WorkerConfig {
        worker_id: worker_id.to_string(),
        poll_interval: Duration::from_millis(20),
        transient_error_backoff_initial: Duration::from_millis(5),
        transient_error_backoff_max: Duration::from_millis(10),
        ..WorkerConfig::default()
    }
}

async fn current(store: &dyn EventStore, key: &str) -> Event {
    store
        .get_event(key)
        .await
        .expect("store read")
        .expect("event should exist")
}

#[tokio::test]
async fn integration_second_worker_stays_away_while_first_is_recording() {
    let store = Arc::new(InMemoryEventStore::new());
    let event = store.create(meeting(None)).await.expect("create");
    let first_executor = Arc::new(GatedExecutor::gated());
    let second_executor = Arc::new(GatedExecutor::default());
    let mut first = EventWorker::new(store.clone(), first_executor.clone(), config("rec-1"))
        .expect("first worker");
    let mut second = EventWorker::new(store.clone(), second_executor.clone(), config("rec-2"))
        .expect("second worker");

    // 12:00 Berlin is 10:00 UTC.
    let recording = tokio::spawn(async move {
        let report = first.run_cycle(at(3, 10, 0)).await;
        (first, report)
    });
    first_executor.started.notified().await;
    assert_eq!(
        current(store.as_ref(), &event.key).await.status,
        EventStatus::Processing
    );

    let report = second.run_cycle(at(3, 10, 5)).await.expect("second cycle");
    assert_eq!(report.action, CycleAction::Idle);
    assert!(second.session().mirror().get(&event.key).is_none());
    assert!(second_executor.performed().is_empty());

    first_executor.open_gate();
    let (_first, report) = tokio::time::timeout(Duration::from_secs(5), recording)
        .await
        .expect("first worker finishes")
        .expect("join");
    let report = report.expect("first cycle");
    assert!(matches!(
        report.action,
        CycleAction::Released(ReleaseOutcome::Retired(_))
    ));
    assert_eq!(first_executor.performed(), vec![event.key.clone()]);
    assert_eq!(
        current(store.as_ref(), &event.key).await.status,
        EventStatus::Deleted
    );
}

#[tokio::test]
async fn integration_crashed_worker_lease_is_recovered_next_occurrence() {
    let store = Arc::new(InMemoryEventStore::new());
    let event = store
        .create(meeting(Some("FREQ=DAILY")))
        .await
        .expect("create");

    // rec-1 claims the first occurrence and dies before acting on it.
    let outcome = claim(
        store.as_ref(),
        &event.key,
        "rec-1",
        LeadOffsets::default(),
        at(3, 10, 0),
    )
    .await
    .expect("claim");
    assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));

    let executor = Arc::new(GatedExecutor::default());
    let mut survivor = EventWorker::new(store.clone(), executor.clone(), config("rec-2"))
        .expect("survivor");

    // Still inside the first window: the lease is live and must be respected.
    let report = survivor.run_cycle(at(3, 10, 10)).await.expect("cycle");
    assert_eq!(report.adopted, 0);
    assert_eq!(report.action, CycleAction::Idle);

    let report = survivor.run_cycle(at(4, 10, 0)).await.expect("next day");
    assert_eq!(report.adopted, 1);
    assert!(matches!(
        report.action,
        CycleAction::Released(ReleaseOutcome::Rescheduled(_))
    ));
    assert_eq!(executor.performed(), vec![event.key.clone()]);

    let released = current(store.as_ref(), &event.key).await;
    assert_eq!(released.status, EventStatus::Scheduled);
    assert!(!released.is_assigned());
}

#[tokio::test]
async fn integration_losing_a_claim_race_yields_before_acting() {
    let store = Arc::new(ContendedStore {
        inner: InMemoryEventStore::new(),
        victim: "rec-1".to_string(),
        rival: "rec-2".to_string(),
        races_remaining: AtomicUsize::new(1),
    });
    let event = store.create(meeting(None)).await.expect("create");
    let executor = Arc::new(GatedExecutor::default());
    let mut worker =
        EventWorker::new(store.clone(), executor.clone(), config("rec-1")).expect("worker");

    let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
    assert_eq!(
        report.action,
        CycleAction::Yielded {
            key: event.key.clone()
        }
    );
    assert!(executor.performed().is_empty());
    let winner = current(store.as_ref(), &event.key).await;
    assert_eq!(winner.assigned, "rec-2");
    assert_eq!(winner.status, EventStatus::Scheduled);
}

#[tokio::test]
async fn integration_workers_share_a_bounded_series_over_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteEventStore::new(dir.path().join("events.sqlite3")).expect("db"));
    let event = store
        .create(meeting(Some("FREQ=DAILY;COUNT=2")))
        .await
        .expect("create");
    let first_executor = Arc::new(GatedExecutor::default());
    let second_executor = Arc::new(GatedExecutor::default());
    let mut first = EventWorker::new(store.clone(), first_executor.clone(), config("rec-1"))
        .expect("first worker");
    let mut second = EventWorker::new(store.clone(), second_executor.clone(), config("rec-2"))
        .expect("second worker");

    let report = first.run_cycle(at(3, 10, 0)).await.expect("day one");
    assert!(matches!(
        report.action,
        CycleAction::Released(ReleaseOutcome::Rescheduled(_))
    ));
    let mark_after_day_one = first.session().mirror().high_water_mark();

    let report = second.run_cycle(at(4, 10, 0)).await.expect("day two");
    assert!(matches!(
        report.action,
        CycleAction::Released(ReleaseOutcome::Retired(_))
    ));

    let report = first.run_cycle(at(4, 10, 10)).await.expect("catch up");
    assert_eq!(report.merged.removed, 1);
    assert_eq!(report.action, CycleAction::Idle);
    assert!(first.session().mirror().high_water_mark() > mark_after_day_one);
    assert!(first.session().mirror().is_empty());

    assert_eq!(first_executor.performed(), vec![event.key.clone()]);
    assert_eq!(second_executor.performed(), vec![event.key.clone()]);
    assert_eq!(
        current(store.as_ref(), &event.key).await.status,
        EventStatus::Deleted
    );
}
