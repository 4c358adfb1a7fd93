//! In-memory fakes of every port, for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde_json::json;
use shipyard_types::error::{RepositoryError, ShipyardError};
use shipyard_types::event::{EventKind, KeptnEvent};
use shipyard_types::scope::EventScope;
use shipyard_types::sequence::{LatestEvent, LedgerUpdate, SequenceExecution, SequenceState, TaskEvent};
use shipyard_types::shipyard::{Shipyard, parse_shipyard};
use uuid::Uuid;

use crate::dispatch::event_dispatcher::{DispatchError, DispatcherEvent, EventDispatcher};
use crate::dispatch::sequence_dispatcher::{
    DispatchOutcome, SequenceDispatchError, SequenceDispatcher, SequenceStarter,
};
use crate::hooks::{SequenceAbortedHook, SequenceFinishedHook, SequenceTimeoutHook};
use crate::repository::event::{EventFilter, EventRepository};
use crate::repository::event_queue::{EventQueueRepository, QueuedEvent};
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::repository::sequence_queue::{QueueFilter, QueueItem, SequenceQueueRepository};
use crate::shipyard::ShipyardRetriever;

pub const LATEST_COMMIT_ID: &str = "latest-commit-id";

pub const SHIPYARD: &str = r#"
apiVersion: spec.keptn.sh/0.2.0
kind: Shipyard
metadata:
  name: shipyard-sockshop
spec:
  stages:
    - name: dev
      sequences:
        - name: artifact-delivery
          tasks:
            - name: deployment
              properties:
                deploymentstrategy: direct
            - name: test
              properties:
                teststrategy: functional
            - name: evaluation
            - name: release
        - name: rollback
          triggeredOn:
            - event: dev.artifact-delivery.finished
              selector:
                match:
                  result: fail
          tasks:
            - name: rollback
    - name: hardening
      sequences:
        - name: artifact-delivery
          triggeredOn:
            - event: dev.artifact-delivery.finished
          tasks:
            - name: deployment
            - name: release
    - name: production
      sequences:
        - name: artifact-delivery
          triggeredOn:
            - event: hardening.artifact-delivery.finished
          tasks:
            - name: deployment
            - name: release
"#;

// ---------------------------------------------------------------------------
// Event store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: Mutex<Vec<(String, EventKind, KeptnEvent)>>,
}

impl InMemoryEventRepository {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

impl EventRepository for InMemoryEventRepository {
    async fn insert_event(
        &self,
        project: &str,
        event: &KeptnEvent,
        kind: EventKind,
    ) -> Result<(), RepositoryError> {
        self.events
            .lock()
            .unwrap()
            .push((project.to_string(), kind, event.clone()));
        Ok(())
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> Result<Vec<KeptnEvent>, RepositoryError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, k, e)| *p == filter.project && *k == kind && filter.matches(e))
            .map(|(_, _, e)| e.clone())
            .collect())
    }

    async fn delete_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> Result<u64, RepositoryError> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|(p, k, e)| !(*p == filter.project && *k == kind && filter.matches(e)));
        Ok((before - events.len()) as u64)
    }

    async fn delete_event_collections(&self, project: &str) -> Result<(), RepositoryError> {
        self.events.lock().unwrap().retain(|(p, _, _)| p != project);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sequence execution store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySequenceExecutionRepository {
    records: Mutex<Vec<SequenceExecution>>,
    fail_updates: AtomicBool,
    stall: AtomicBool,
}

impl InMemorySequenceExecutionRepository {
    pub fn all(&self) -> Vec<SequenceExecution> {
        self.records.lock().unwrap().clone()
    }

    /// Make every `update` fail with a connection error.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make every `get` and `clear` hang forever.
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Overwrite a record without a version check.
    pub fn force(&self, execution: SequenceExecution) {
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.id != execution.id);
        records.push(execution);
    }
}

impl SequenceExecutionRepository for InMemorySequenceExecutionRepository {
    async fn get(
        &self,
        filter: &SequenceExecutionFilter,
    ) -> Result<Vec<SequenceExecution>, RepositoryError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut found: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.triggered_at);
        Ok(found)
    }

    async fn insert(&self, execution: &SequenceExecution) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let occupied = records
            .iter()
            .any(|r| r.state().is_active() && r.scope.same_slot(&execution.scope));
        if occupied {
            return Err(RepositoryError::Conflict(format!(
                "active sequence for {}/{}/{}",
                execution.scope.project, execution.scope.stage, execution.scope.service
            )));
        }
        records.push(execution.clone());
        Ok(())
    }

    async fn append_task_event(
        &self,
        triggered_id: &str,
        event: &TaskEvent,
        latest_event: &LatestEvent,
    ) -> Result<Option<SequenceExecution>, RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| {
            r.state() == SequenceState::Started && r.current_triggered_id() == Some(triggered_id)
        }) else {
            return Ok(None);
        };
        let mut updated = record.clone();
        match updated.apply_task_event(triggered_id, event) {
            LedgerUpdate::NotCurrent => return Ok(None),
            LedgerUpdate::Unchanged => return Ok(Some(updated)),
            LedgerUpdate::Recorded => {}
        }
        updated.latest_event = Some(latest_event.clone());
        updated.version += 1;
        *record = updated.clone();
        Ok(Some(updated))
    }

    async fn update(&self, execution: &SequenceExecution) -> Result<bool, RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.id == execution.id) else {
            return Err(RepositoryError::NotFound);
        };
        if record.version != execution.version {
            return Ok(false);
        }
        *record = execution.clone();
        record.version += 1;
        Ok(true)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != *id);
        Ok(records.len() != before)
    }

    async fn clear(&self, project: &str) -> Result<u64, RepositoryError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.scope.project != project);
        Ok((before - records.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Sequence queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySequenceQueue {
    items: Mutex<Vec<QueueItem>>,
}

impl InMemorySequenceQueue {
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

impl SequenceQueueRepository for InMemorySequenceQueue {
    async fn queue_sequence(&self, item: &QueueItem) -> Result<(), RepositoryError> {
        self.items.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn get_queued_sequences(&self) -> Result<Vec<QueueItem>, RepositoryError> {
        let mut items = self.items.lock().unwrap().clone();
        items.sort_by_key(|i| i.queued_at);
        Ok(items)
    }

    async fn delete_queue_items(&self, filter: &QueueFilter) -> Result<u64, RepositoryError> {
        filter.ensure_narrowed()?;
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|i| !filter.matches(i));
        Ok((before - items.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Event queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryEventQueue {
    events: Mutex<Vec<QueuedEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryEventQueue {
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Make every `queue_event` fail with a connection error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl EventQueueRepository for InMemoryEventQueue {
    async fn queue_event(&self, event: &QueuedEvent) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut events = self.events.lock().unwrap();
        if events.iter().any(|e| e.event.id == event.event.id) {
            return Err(RepositoryError::Conflict(format!(
                "event {} is already queued",
                event.event.id
            )));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn get_due_events(&self, now: DateTime<Utc>) -> Result<Vec<QueuedEvent>, RepositoryError> {
        let mut due: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.dispatch_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.dispatch_at);
        Ok(due)
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.event.id != event_id);
        Ok(events.len() != before)
    }

    async fn count_events(&self) -> Result<u64, RepositoryError> {
        Ok(self.events.lock().unwrap().len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Shipyard retriever
// ---------------------------------------------------------------------------

pub struct StaticShipyardRetriever {
    shipyards: Mutex<HashMap<String, Result<Shipyard, ShipyardError>>>,
}

impl StaticShipyardRetriever {
    pub fn new() -> Self {
        Self {
            shipyards: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_yaml(self, project: &str, yaml: &str) -> Self {
        self.shipyards
            .lock()
            .unwrap()
            .insert(project.to_string(), parse_shipyard(yaml));
        self
    }

    fn lookup(&self, project: &str) -> Result<Shipyard, ShipyardError> {
        self.shipyards
            .lock()
            .unwrap()
            .get(project)
            .cloned()
            .unwrap_or_else(|| Err(ShipyardError::NotFound(project.to_string())))
    }
}

impl ShipyardRetriever for StaticShipyardRetriever {
    async fn get_shipyard(&self, project: &str) -> Result<Shipyard, ShipyardError> {
        self.lookup(project)
    }

    async fn get_cached_shipyard(&self, project: &str) -> Result<Shipyard, ShipyardError> {
        self.lookup(project)
    }

    async fn get_latest_commit_id(
        &self,
        _project: &str,
        _stage: &str,
    ) -> Result<String, ShipyardError> {
        Ok(LATEST_COMMIT_ID.to_string())
    }
}

// ---------------------------------------------------------------------------
// Event dispatcher
// ---------------------------------------------------------------------------

/// Records every emitted event; can be switched to fail.
#[derive(Default)]
pub struct RecordingEventDispatcher {
    events: Mutex<Vec<(DispatcherEvent, bool)>>,
    fail: AtomicBool,
}

impl RecordingEventDispatcher {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<KeptnEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.event.clone())
            .collect()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }

    pub fn skipped_queue(&self, index: usize) -> bool {
        self.events.lock().unwrap()[index].1
    }

    pub fn last_of_type(&self, event_type: &str) -> Option<KeptnEvent> {
        self.events()
            .into_iter()
            .rev()
            .find(|e| e.event_type == event_type)
    }
}

impl EventDispatcher for RecordingEventDispatcher {
    async fn add(&self, event: DispatcherEvent, skip_queue: bool) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Failed("dispatcher unavailable".to_string()));
        }
        self.events.lock().unwrap().push((event, skip_queue));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sequence dispatcher
// ---------------------------------------------------------------------------

/// Sequence dispatcher whose `remove` always fails and which never starts
/// anything.
#[derive(Default)]
pub struct FailingRemoveSequenceDispatcher {
    pub added: Mutex<Vec<QueueItem>>,
}

impl SequenceDispatcher for FailingRemoveSequenceDispatcher {
    async fn add(&self, item: QueueItem) -> Result<(), SequenceDispatchError> {
        self.added.lock().unwrap().push(item);
        Ok(())
    }

    async fn remove(&self, _filter: &QueueFilter) -> Result<u64, SequenceDispatchError> {
        Err(SequenceDispatchError::Store(RepositoryError::Connection))
    }

    async fn dispatch_pending<S: SequenceStarter>(
        &self,
        _starter: &S,
    ) -> Result<DispatchOutcome, SequenceDispatchError> {
        Ok(DispatchOutcome::default())
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingHook {
    pub finished: Mutex<Vec<KeptnEvent>>,
    pub aborted: Mutex<Vec<EventScope>>,
    pub timed_out: Mutex<Vec<KeptnEvent>>,
}

impl SequenceFinishedHook for RecordingHook {
    fn on_sequence_finished(&self, event: &KeptnEvent) {
        self.finished.lock().unwrap().push(event.clone());
    }
}

impl SequenceAbortedHook for RecordingHook {
    fn on_sequence_aborted(&self, scope: &EventScope) {
        self.aborted.lock().unwrap().push(scope.clone());
    }
}

impl SequenceTimeoutHook for RecordingHook {
    fn on_sequence_timeout(&self, event: &KeptnEvent) {
        self.timed_out.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn sequence_triggered(
    stage: &str,
    sequence: &str,
    service: &str,
    keptn_context: &str,
) -> KeptnEvent {
    KeptnEvent::new(
        format!("sh.keptn.event.{stage}.{sequence}.triggered"),
        json!({
            "project": "sockshop",
            "stage": stage,
            "service": service,
            "configurationChange": {"values": {"image": "carts:0.12.1"}},
            "deployment": {
                "deploymentURIsPublic": ["http://carts.sockshop-dev.svc"],
                "deploymentstrategy": "direct"
            }
        }),
    )
    .with_context(keptn_context)
    .with_git_commit_id("c1")
    .with_source("test-source")
}

pub fn task_started(task: &str, triggered: &KeptnEvent, source: &str) -> KeptnEvent {
    let data = triggered.event_data();
    KeptnEvent::new(
        format!("sh.keptn.event.{task}.started"),
        json!({"project": data.project, "stage": data.stage, "service": data.service}),
    )
    .with_context(triggered.shkeptncontext.clone())
    .with_triggered_id(triggered.id.clone())
    .with_source(source)
}

pub fn task_finished(
    task: &str,
    triggered: &KeptnEvent,
    source: &str,
    result: &str,
    status: &str,
    extra: serde_json::Value,
) -> KeptnEvent {
    let data = triggered.event_data();
    let mut payload = json!({
        "project": data.project,
        "stage": data.stage,
        "service": data.service,
        "result": result,
        "status": status,
    });
    shipyard_types::payload::merge(&mut payload, &extra);
    KeptnEvent::new(format!("sh.keptn.event.{task}.finished"), payload)
        .with_context(triggered.shkeptncontext.clone())
        .with_triggered_id(triggered.id.clone())
        .with_source(source)
}
