use crate::claim::{
    claim, confirm_lease, evaluate_claim, ClaimDecision, ClaimOutcome, ClaimRejection,
};
use crate::config::{compute_poll_retry_delay, WorkerConfig};
use crate::executor::ActionExecutor;
use crate::lifecycle::{begin_processing, enter_postprocessing, release, ReleaseOutcome};
use crate::sync::{MergeReport, SyncMirror};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use zoomrec_schedule::{
    event_is_past, lease_is_stale, leased_window, select_next, LeadOffsets, OccurrenceSchedule,
    Window,
};
use zoomrec_store::{EventStore, StoreError, StoreResult};
use zoomrec_types::{Event, EventStatus, EventType, ScheduleError};

#[derive(Debug, Clone)]
struct PendingRelease {
    key: String,
    window: Window,
}

/// State one worker carries from cycle to cycle.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    worker_id: String,
    mirror: SyncMirror,
    /// Release that failed to reach the store; retried first thing next cycle.
    pending_release: Option<PendingRelease>,
    /// Last occurrence this worker acted on, per event key.
    processed: HashMap<String, DateTime<Utc>>,
}

impl WorkerSession {
    pub fn new(worker_id: impl Into<String>, event_type: EventType) -> Self {
        let worker_id = worker_id.into();
        Self {
            mirror: SyncMirror::new(worker_id.clone(), event_type),
            worker_id,
            pending_release: None,
            processed: HashMap::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn mirror(&self) -> &SyncMirror {
        &self.mirror
    }

    pub fn has_pending_release(&self) -> bool {
        self.pending_release.is_some()
    }

    fn already_processed(&self, key: &str, window: &Window) -> bool {
        self.processed.get(key) == Some(&window.occurrence.with_timezone(&Utc))
    }

    fn mark_processed(&mut self, key: &str, window: &Window) {
        self.processed
            .insert(key.to_string(), window.occurrence.with_timezone(&Utc));
    }
}

/// What a cycle did with the event it selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleAction {
    /// Nothing claimable right now.
    Idle,
    /// The claim was refused at the store.
    Skipped { key: String, reason: ClaimRejection },
    /// Another worker's lease was found on re-read; nothing was written.
    Yielded { key: String },
    Released(ReleaseOutcome),
}

/// Summary of one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub merged: MergeReport,
    pub adopted: usize,
    pub purged: usize,
    /// Releases left over from earlier cycles or an earlier run.
    pub settled: Vec<ReleaseOutcome>,
    pub action: CycleAction,
}

/// Polling worker that claims, performs and releases events.
pub struct EventWorker {
    store: Arc<dyn EventStore>,
    executor: Arc<dyn ActionExecutor>,
    config: WorkerConfig,
    session: WorkerSession,
}

impl EventWorker {
    pub fn new(
        store: Arc<dyn EventStore>,
        executor: Arc<dyn ActionExecutor>,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let session = WorkerSession::new(config.worker_id.clone(), config.event_type);
        Ok(Self {
            store,
            executor,
            config,
            session,
        })
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    fn offsets(&self) -> LeadOffsets {
        self.config.offsets()
    }

    /// Runs the polling loop until `shutdown` flips to true.
    ///
    /// A failed cycle is retried with exponential backoff, never slower than
    /// the regular poll interval.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut poll_failure_count = 0u32;
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(worker_id = %self.session.worker_id, "worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) => {
                            poll_failure_count = 0;
                            tracing::debug!(
                                worker_id = %self.session.worker_id,
                                upserted = report.merged.upserted,
                                removed = report.merged.removed,
                                adopted = report.adopted,
                                purged = report.purged,
                                action = ?report.action,
                                "cycle finished"
                            );
                        }
                        Err(error) => {
                            poll_failure_count = poll_failure_count.saturating_add(1);
                            let delay = compute_poll_retry_delay(
                                poll_failure_count,
                                self.config.transient_error_backoff_initial,
                                self.config.transient_error_backoff_max,
                            )
                            .min(self.config.poll_interval);
                            tracing::warn!(
                                worker_id = %self.session.worker_id,
                                %error,
                                failures = poll_failure_count,
                                retry_in_ms = delay.as_millis() as u64,
                                "cycle failed"
                            );
                            poll.reset_after(delay);
                        }
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.session.worker_id, "worker stopped");
        Ok(())
    }

    /// One poll, merge, evaluate, claim, act and release pass evaluated at `now`.
    ///
    /// Returns an error only when the store could not be reached; per-event
    /// problems are logged and skipped.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> StoreResult<CycleReport> {
        let store = Arc::clone(&self.store);
        let offsets = self.offsets();

        let mut settled = Vec::new();
        if let Some(outcome) = self.retry_pending_release(store.as_ref()).await? {
            settled.push(outcome);
        }

        let merged = self.session.mirror.refresh(store.as_ref()).await?;
        let adopted = self
            .session
            .mirror
            .adopt_stale_leases(store.as_ref(), offsets, now)
            .await?;
        settled.extend(self.settle_postprocessing(store.as_ref()).await?);
        let purged = self.purge_expired(store.as_ref(), now).await?;
        let mirror = &self.session.mirror;
        self.session.processed.retain(|key, _| mirror.get(key).is_some());

        let action = match self.pick_candidate(now) {
            Some(key) => match self.handle_candidate(store.as_ref(), &key, now).await {
                Ok(action) => action,
                Err(error) if error.is_transient() => return Err(error),
                Err(error) => {
                    self.drop_event(&key, &error, "dropping event after failed transition");
                    CycleAction::Idle
                }
            },
            None => CycleAction::Idle,
        };

        Ok(CycleReport {
            merged,
            adopted,
            purged,
            settled,
            action,
        })
    }

    async fn retry_pending_release(
        &mut self,
        store: &dyn EventStore,
    ) -> StoreResult<Option<ReleaseOutcome>> {
        let Some(pending) = self.session.pending_release.clone() else {
            return Ok(None);
        };
        let released = match confirm_lease(store, &pending.key, &self.session.worker_id).await {
            Ok(Some(event)) => release(store, event, &pending.window).await.map(Some),
            Ok(None) => {
                tracing::warn!(event_key = %pending.key, "lease gone before pending release");
                Ok(None)
            }
            Err(error) => Err(error),
        };
        match released {
            Ok(outcome) => {
                self.session.pending_release = None;
                if let Some(outcome) = &outcome {
                    self.session.mirror.record_local(outcome.event().clone());
                }
                Ok(outcome)
            }
            Err(error) if error.is_transient() => Err(error),
            Err(error) => {
                self.drop_event(&pending.key, &error, "dropping pending release");
                Ok(None)
            }
        }
    }

    /// Releases events this worker left in `Postprocessing`, e.g. across a
    /// restart. Nothing is in flight at the start of a cycle.
    async fn settle_postprocessing(
        &mut self,
        store: &dyn EventStore,
    ) -> StoreResult<Vec<ReleaseOutcome>> {
        let leftovers: Vec<Event> = self
            .session
            .mirror
            .snapshot()
            .into_iter()
            .filter(|event| {
                event.status == EventStatus::Postprocessing
                    && event.is_assigned_to(&self.session.worker_id)
            })
            .collect();

        let offsets = self.offsets();
        let mut settled = Vec::new();
        for event in leftovers {
            let window = match OccurrenceSchedule::resolve(&event)
                .and_then(|schedule| leased_window(&schedule, &event, offsets))
            {
                Ok(Some(window)) => window,
                Ok(None) => {
                    tracing::warn!(event_key = %event.key, "no window for leftover lease");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(event_key = %event.key, %error, "cannot settle leftover lease");
                    continue;
                }
            };
            let key = event.key.clone();
            match release(store, event, &window).await {
                Ok(outcome) => {
                    self.session.mirror.record_local(outcome.event().clone());
                    settled.push(outcome);
                }
                Err(error) if error.is_transient() => return Err(error),
                Err(error) => self.drop_event(&key, &error, "dropping unsettled leftover lease"),
            }
        }
        Ok(settled)
    }

    /// Soft-deletes mirrored events with no occurrence left to act on.
    async fn purge_expired(
        &mut self,
        store: &dyn EventStore,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let offsets = self.offsets();
        let mut purged = 0;
        for event in self.session.mirror.snapshot() {
            if event.status == EventStatus::Postprocessing {
                continue;
            }
            match is_purgeable(&event, offsets, now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) => {
                    tracing::warn!(event_key = %event.key, %error, "skipping malformed event");
                    continue;
                }
            }
            match store.delete(&event.key).await {
                Ok(_) => {
                    tracing::info!(event_key = %event.key, "purged expired event");
                    self.session.mirror.remove(&event.key);
                    purged += 1;
                }
                Err(error) if error.is_transient() => return Err(error),
                Err(error) => {
                    tracing::warn!(event_key = %event.key, %error, "failed to purge expired event");
                }
            }
        }
        Ok(purged)
    }

    fn pick_candidate(&self, now: DateTime<Utc>) -> Option<String> {
        let offsets = self.offsets();
        let snapshot = self.session.mirror.snapshot();
        let candidates = snapshot.iter().filter(|event| {
            match evaluate_claim(event, &self.session.worker_id, offsets, now) {
                ClaimDecision::Claim { window }
                | ClaimDecision::TakeOver { window, .. }
                | ClaimDecision::AlreadyHeld { window } => {
                    !self.session.already_processed(&event.key, &window)
                }
                ClaimDecision::Reject(_) => false,
            }
        });
        select_next(candidates, offsets, now).map(|selection| selection.event.key.clone())
    }

    async fn handle_candidate(
        &mut self,
        store: &dyn EventStore,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<CycleAction> {
        let worker_id = self.session.worker_id.clone();
        let (claimed, window) = match claim(store, key, &worker_id, self.offsets(), now).await? {
            ClaimOutcome::Claimed { event, window }
            | ClaimOutcome::AlreadyHeld { event, window } => (event, window),
            ClaimOutcome::Rejected(reason) => {
                tracing::debug!(event_key = %key, ?reason, "claim rejected");
                if matches!(
                    reason,
                    ClaimRejection::Missing
                        | ClaimRejection::Deleted
                        | ClaimRejection::HeldByOther { .. }
                ) {
                    self.session.mirror.remove(key);
                }
                return Ok(CycleAction::Skipped {
                    key: key.to_string(),
                    reason,
                });
            }
        };
        self.session.mirror.record_local(claimed);

        let Some(confirmed) = confirm_lease(store, key, &worker_id).await? else {
            return Ok(self.yield_event(key, "lease overwritten before acting"));
        };
        let processing = begin_processing(store, confirmed).await?;
        self.session.mirror.record_local(processing.clone());

        let deadline = window.end.with_timezone(&Utc);
        let outcome = match self.executor.perform(&processing, deadline).await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::warn!(
                    event_key = %key,
                    error = %format!("{error:#}"),
                    "action failed; releasing"
                );
                None
            }
        };
        self.session.mark_processed(key, &window);
        self.session.pending_release = Some(PendingRelease {
            key: key.to_string(),
            window,
        });

        let Some(mut current) = confirm_lease(store, key, &worker_id).await? else {
            self.session.pending_release = None;
            return Ok(self.yield_event(key, "lease overwritten during action"));
        };

        if let Some(action) = outcome.and_then(|outcome| outcome.postprocess) {
            current = enter_postprocessing(store, current).await?;
            self.session.mirror.record_local(current.clone());
            if let Err(error) = self.executor.postprocess(&current, &action).await {
                tracing::warn!(
                    event_key = %key,
                    action = %action,
                    error = %format!("{error:#}"),
                    "postprocess failed"
                );
            }
        }

        let released = release(store, current, &window).await?;
        self.session.pending_release = None;
        self.session.mirror.record_local(released.event().clone());
        Ok(CycleAction::Released(released))
    }

    /// Forgets `key` after a store rejection that retrying will not cure. The
    /// record comes back through the delta poll once someone changes it.
    fn drop_event(&mut self, key: &str, error: &StoreError, message: &'static str) {
        tracing::warn!(event_key = %key, %error, "{message}");
        if self
            .session
            .pending_release
            .as_ref()
            .is_some_and(|pending| pending.key == key)
        {
            self.session.pending_release = None;
        }
        self.session.mirror.remove(key);
    }

    fn yield_event(&mut self, key: &str, reason: &'static str) -> CycleAction {
        tracing::warn!(
            event_key = %key,
            worker_id = %self.session.worker_id,
            reason,
            "yielding event"
        );
        self.session.mirror.remove(key);
        CycleAction::Yielded {
            key: key.to_string(),
        }
    }
}

/// Past events are purged unless a live lease still covers them.
fn is_purgeable(
    event: &Event,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
) -> Result<bool, ScheduleError> {
    if !event_is_past(event, offsets, now)? {
        return Ok(false);
    }
    Ok(!event.is_assigned() || lease_is_stale(event, offsets, now)?)
}

impl std::fmt::Debug for EventWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWorker")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleAction, EventWorker};
    use crate::config::WorkerConfig;
    use crate::executor::{ActionExecutor, ActionOutcome};
    use crate::lifecycle::ReleaseOutcome;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;
    use zoomrec_store::{EventStore, InMemoryEventStore, StoreError, StoreResult};
    use zoomrec_types::{Event, EventDraft, EventStatus, Filter};

    #[derive(Default)]
    struct RecordingExecutor {
        performed: Mutex<Vec<String>>,
        postprocessed: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn performed(&self) -> Vec<String> {
            self.performed.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn postprocessed(&self) -> Vec<String> {
            self.postprocessed
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn perform(&self, event: &Event, _deadline: DateTime<Utc>) -> Result<ActionOutcome> {
            if let Ok(mut calls) = self.performed.lock() {
                calls.push(event.key.clone());
            }
            if self.fail {
                anyhow::bail!("meeting client crashed");
            }
            Ok(ActionOutcome::for_event(event))
        }

        async fn postprocess(&self, event: &Event, action: &str) -> Result<()> {
            if let Ok(mut calls) = self.postprocessed.lock() {
                calls.push(format!("{action}:{}", event.key));
            }
            Ok(())
        }
    }

    /// Overwrites the lease with another worker's while the action runs.
    struct HijackedExecutor {
        store: Arc<InMemoryEventStore>,
    }

    #[async_trait]
    impl ActionExecutor for HijackedExecutor {
        async fn perform(&self, event: &Event, _deadline: DateTime<Utc>) -> Result<ActionOutcome> {
            let mut stolen = self
                .store
                .get_event(&event.key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("event vanished"))?;
            stolen.assign("w2", Utc::now().fixed_offset());
            self.store.update(stolen).await?;
            Ok(ActionOutcome::default())
        }

        async fn postprocess(&self, _event: &Event, _action: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Fails updates that clear a lease with the scripted errors, in order.
    struct FlakyReleaseStore {
        inner: InMemoryEventStore,
        failures: Mutex<VecDeque<StoreError>>,
    }

    impl FlakyReleaseStore {
        fn new(failures: Vec<StoreError>) -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                failures: Mutex::new(failures.into()),
            }
        }
    }

    #[async_trait]
    impl EventStore for FlakyReleaseStore {
        async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
            self.inner.get(key, filters).await
        }

        async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
            self.inner.create(draft).await
        }

        async fn update(&self, event: Event) -> StoreResult<Event> {
            if !event.is_assigned() {
                let scripted = self
                    .failures
                    .lock()
                    .ok()
                    .and_then(|mut failures| failures.pop_front());
                if let Some(error) = scripted {
                    return Err(error);
                }
            }
            self.inner.update(event).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
    }

    /// Refuses every update of one key with a permanent error.
    struct RejectingStore {
        inner: InMemoryEventStore,
        rejected_key: String,
        rejection: fn(String) -> StoreError,
    }

    #[async_trait]
    impl EventStore for RejectingStore {
        async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
            self.inner.get(key, filters).await
        }

        async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
            self.inner.create(draft).await
        }

        async fn update(&self, event: Event) -> StoreResult<Event> {
            if event.key == self.rejected_key {
                return Err((self.rejection)(event.key));
            }
            self.inner.update(event).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
    }

    fn outage() -> StoreError {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "simulated transient update failure",
        ))
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0)
            .single()
            .expect("instant")
    }

    fn draft(dtstart: &str, rrule: Option<&str>, instruction: Option<&str>) -> EventDraft {
        EventDraft {
            title: Some("Standup".to_string()),
            dtstart: Some(dtstart.to_string()),
            timezone: Some("UTC".to_string()),
            duration: Some("30".to_string()),
            rrule: rrule.map(str::to_string),
            id: Some("123456789".to_string()),
            instruction: instruction.map(str::to_string),
            user_key: Some("user-1".to_string()),
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

    async fn stored(store: &dyn EventStore, key: &str) -> Event {
        store
            .get_event(key)
            .await
            .expect("get")
            .expect("event present")
    }

    #[tokio::test]
    async fn functional_cycle_claims_performs_and_releases_recurring_event() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = store
            .create(draft("03/06/2024 10:00", Some("FREQ=WEEKLY"), None))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert_eq!(report.merged.upserted, 1);
        let CycleAction::Released(ReleaseOutcome::Rescheduled(released)) = report.action else {
            panic!("expected reschedule, got {:?}", report.action);
        };
        assert_eq!(released.key, event.key);
        assert_eq!(executor.performed(), vec![event.key.clone()]);

        let current = stored(store.as_ref(), &event.key).await;
        assert_eq!(current.status, EventStatus::Scheduled);
        assert!(!current.is_assigned());

        // The same occurrence is not recorded twice while its window is open.
        let report = worker.run_cycle(at(3, 10, 5)).await.expect("cycle");
        assert_eq!(report.action, CycleAction::Idle);
        assert_eq!(executor.performed().len(), 1);

        let report = worker.run_cycle(at(10, 10, 0)).await.expect("next week");
        assert!(matches!(report.action, CycleAction::Released(_)));
        assert_eq!(executor.performed().len(), 2);
    }

    #[tokio::test]
    async fn functional_postprocess_instruction_runs_before_retirement() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = store
            .create(draft(
                "03/06/2024 10:00",
                None,
                Some("process=record,postprocess=transcribe"),
            ))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert!(matches!(
            report.action,
            CycleAction::Released(ReleaseOutcome::Retired(_))
        ));
        assert_eq!(executor.postprocessed(), vec![format!("transcribe:{}", event.key)]);
        assert_eq!(
            stored(store.as_ref(), &event.key).await.status,
            EventStatus::Deleted
        );
        assert!(worker.session().mirror().get(&event.key).is_none());
    }

    #[tokio::test]
    async fn regression_failed_action_still_releases_without_postprocessing() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = store
            .create(draft(
                "03/06/2024 10:00",
                Some("FREQ=DAILY"),
                Some("postprocess=transcribe"),
            ))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::failing());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert!(matches!(report.action, CycleAction::Released(_)));
        assert!(executor.postprocessed().is_empty());
        assert!(!stored(store.as_ref(), &event.key).await.is_assigned());
    }

    #[tokio::test]
    async fn regression_lease_lost_during_action_is_yielded() {
        let store = Arc::new(InMemoryEventStore::new());
        let event = store
            .create(draft("03/06/2024 10:00", None, None))
            .await
            .expect("create");
        let executor = Arc::new(HijackedExecutor {
            store: store.clone(),
        });
        let mut worker = EventWorker::new(store.clone(), executor, config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert_eq!(
            report.action,
            CycleAction::Yielded {
                key: event.key.clone()
            }
        );
        let current = stored(store.as_ref(), &event.key).await;
        assert_eq!(current.assigned, "w2");
        assert_eq!(current.status, EventStatus::Processing);
        assert!(!worker.session().has_pending_release());
    }

    #[tokio::test]
    async fn regression_failed_release_is_retried_next_cycle() {
        let store = Arc::new(FlakyReleaseStore::new(vec![outage()]));
        let event = store
            .create(draft("03/06/2024 10:00", Some("FREQ=WEEKLY"), None))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let error = worker
            .run_cycle(at(3, 10, 0))
            .await
            .expect_err("release hits the store outage");
        assert!(error.is_transient());
        assert!(worker.session().has_pending_release());
        assert_eq!(
            stored(store.as_ref(), &event.key).await.status,
            EventStatus::Processing
        );

        let report = worker.run_cycle(at(3, 10, 1)).await.expect("retry");
        assert_eq!(report.settled.len(), 1);
        assert_eq!(report.action, CycleAction::Idle);
        assert!(!worker.session().has_pending_release());
        assert_eq!(executor.performed().len(), 1);
        assert!(!stored(store.as_ref(), &event.key).await.is_assigned());
    }

    #[tokio::test]
    async fn regression_rejected_pending_release_is_dropped_instead_of_retried_forever() {
        let store = Arc::new(FlakyReleaseStore::new(vec![
            outage(),
            StoreError::Http {
                status: 409,
                body: "conflict".to_string(),
            },
        ]));
        store
            .create(draft("03/06/2024 10:00", Some("FREQ=WEEKLY"), None))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        worker
            .run_cycle(at(3, 10, 0))
            .await
            .expect_err("release hits the store outage");
        assert!(worker.session().has_pending_release());

        let report = worker.run_cycle(at(3, 10, 1)).await.expect("cycle");
        assert!(report.settled.is_empty());
        assert!(!worker.session().has_pending_release());

        worker.run_cycle(at(3, 10, 2)).await.expect("later cycle");
        assert_eq!(executor.performed().len(), 1);
    }

    #[tokio::test]
    async fn regression_unsettleable_leftover_lease_does_not_block_other_events() {
        let inner = InMemoryEventStore::new();
        let mut leftover = inner
            .create(draft("02/06/2024 10:00", Some("FREQ=DAILY"), None))
            .await
            .expect("create leftover");
        leftover.assign("w1", at(2, 10, 0).fixed_offset());
        leftover.status = EventStatus::Processing;
        let mut leftover = inner.update(leftover).await.expect("processing");
        leftover.status = EventStatus::Postprocessing;
        let leftover = inner.update(leftover).await.expect("postprocessing");
        let healthy = inner
            .create(draft("03/06/2024 10:00", None, None))
            .await
            .expect("create healthy");

        let store = Arc::new(RejectingStore {
            inner,
            rejected_key: leftover.key.clone(),
            rejection: StoreError::NotFound,
        });
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert!(report.settled.is_empty());
        assert!(matches!(
            report.action,
            CycleAction::Released(ReleaseOutcome::Retired(_))
        ));
        assert_eq!(executor.performed(), vec![healthy.key.clone()]);
        assert!(worker.session().mirror().get(&leftover.key).is_none());

        let report = worker.run_cycle(at(3, 10, 5)).await.expect("next cycle");
        assert_eq!(report.action, CycleAction::Idle);
    }

    #[tokio::test]
    async fn regression_rejected_claim_skips_to_the_next_event() {
        let inner = InMemoryEventStore::new();
        let refused = inner
            .create(draft("03/06/2024 10:00", None, None))
            .await
            .expect("create refused");
        let accepted = inner
            .create(draft("03/06/2024 10:00", None, None))
            .await
            .expect("create accepted");
        let store = Arc::new(RejectingStore {
            inner,
            rejected_key: refused.key.clone(),
            rejection: |_| StoreError::Http {
                status: 422,
                body: "invalid record".to_string(),
            },
        });
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("first cycle");
        assert_eq!(report.action, CycleAction::Idle);
        assert!(worker.session().mirror().get(&refused.key).is_none());
        assert!(executor.performed().is_empty());

        let report = worker.run_cycle(at(3, 10, 1)).await.expect("second cycle");
        assert!(matches!(report.action, CycleAction::Released(_)));
        assert_eq!(executor.performed(), vec![accepted.key.clone()]);
    }

    #[tokio::test]
    async fn unit_expired_unassigned_events_are_purged() {
        let store = Arc::new(InMemoryEventStore::new());
        let old = store
            .create(draft("01/06/2024 10:00", None, None))
            .await
            .expect("create");
        let upcoming = store
            .create(draft("05/06/2024 10:00", None, None))
            .await
            .expect("create");
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker =
            EventWorker::new(store.clone(), executor.clone(), config("w1")).expect("worker");

        let report = worker.run_cycle(at(3, 10, 0)).await.expect("cycle");
        assert_eq!(report.purged, 1);
        assert_eq!(report.action, CycleAction::Idle);
        assert_eq!(stored(store.as_ref(), &old.key).await.status, EventStatus::Deleted);
        assert_eq!(
            stored(store.as_ref(), &upcoming.key).await.status,
            EventStatus::Scheduled
        );
        assert!(executor.performed().is_empty());
    }

    #[tokio::test]
    async fn integration_run_loop_stops_on_shutdown() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::default());
        let mut worker = EventWorker::new(store, executor, config("w1")).expect("worker");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).expect("send shutdown");

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker stops")
            .expect("join")
            .expect("run result");
    }

    #[test]
    fn unit_invalid_config_is_rejected() {
        let store = Arc::new(InMemoryEventStore::new());
        let executor = Arc::new(RecordingExecutor::default());
        let error = EventWorker::new(store, executor, config(" ")).expect_err("empty id");
        assert!(error.to_string().contains("worker_id"));
    }
}
