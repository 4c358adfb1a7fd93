//! The shipyard controller: event correlation and the sequence state machine.
//!
//! Every inbound lifecycle event enters through [`ShipyardController::handle_incoming_event`]:
//!
//! - `<stage>.<sequence>.triggered` opens a new sequence execution and hands
//!   it to the sequence dispatcher (admission control).
//! - `<task>.started` / `<task>.finished` are correlated by `triggeredid` to
//!   the execution whose current task they report on. Once every started
//!   source has finished, the task resolves and the state machine decides
//!   the next step: trigger the next task, or finish the sequence and fan
//!   out to the sequences whose `triggeredOn` rules match.
//!
//! Timeout and cancellation are separate operator/watchdog entry points
//! (see `control`). Record mutations rely on the store's atomic append and
//! compare-and-swap update; there is no in-process lock per execution.

mod control;
mod error;
mod progression;
mod task;
mod trigger;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use shipyard_types::error::RepositoryError;
use shipyard_types::event::{EventKind, EventType, KeptnEvent, ResultType, StatusType, sequence_event_type};
use shipyard_types::sequence::SequenceExecution;

pub use control::{SequenceCancellation, SequenceTimeout};
pub use error::ControllerError;

use crate::dispatch::event_dispatcher::{DispatcherEvent, EventDispatcher};
use crate::dispatch::sequence_dispatcher::SequenceDispatcher;
use crate::hooks::SequenceHooks;
use crate::repository::event::{EventFilter, EventRepository};
use crate::repository::sequence_execution::SequenceExecutionRepository;
use crate::repository::with_timeout;
use crate::shipyard::ShipyardRetriever;

/// Sequence execution engine.
///
/// Generic over every port so the core never depends on infrastructure.
pub struct ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    events: Arc<E>,
    executions: Arc<X>,
    shipyards: Arc<S>,
    dispatcher: Arc<D>,
    sequences: Arc<Q>,
    hooks: SequenceHooks,
    store_timeout: Duration,
}

impl<E, X, S, D, Q> ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    pub fn new(
        events: Arc<E>,
        executions: Arc<X>,
        shipyards: Arc<S>,
        dispatcher: Arc<D>,
        sequences: Arc<Q>,
        hooks: SequenceHooks,
    ) -> Self {
        Self {
            events,
            executions,
            shipyards,
            dispatcher,
            sequences,
            hooks,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Bound every store call by `store_timeout`.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Single entry point for inbound lifecycle events.
    ///
    /// Task `.triggered` events and sequence-level `.started`/`.finished`
    /// events are emitted by the controller itself and are ignored here.
    #[tracing::instrument(
        name = "handle_event",
        skip(self, event),
        fields(event_type = %event.event_type, keptn_context = %event.shkeptncontext)
    )]
    pub async fn handle_incoming_event(&self, event: KeptnEvent) -> Result<(), ControllerError> {
        match event.parsed_type()? {
            EventType::Sequence {
                stage,
                sequence,
                kind: EventKind::Triggered,
            } => self.handle_sequence_triggered(event, &stage, &sequence).await,
            EventType::Task {
                task,
                kind: EventKind::Started,
            } => self.handle_task_started(event, &task).await,
            EventType::Task {
                task,
                kind: EventKind::Finished,
            } => self.handle_task_finished(event, &task).await,
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring event");
                Ok(())
            }
        }
    }

    async fn store<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, ControllerError> {
        Ok(with_timeout(self.store_timeout, call).await?)
    }

    /// Compare-and-swap the record. Returns `false` when another writer won.
    async fn save(&self, execution: &mut SequenceExecution) -> Result<bool, ControllerError> {
        execution.updated_at = Utc::now();
        let saved = self.store(self.executions.update(execution)).await?;
        if saved {
            execution.version += 1;
        } else {
            tracing::debug!(
                execution_id = %execution.id,
                "execution changed concurrently, skipping transition"
            );
        }
        Ok(saved)
    }

    /// Restore `original` after `saved` was persisted but the event
    /// announcing it could not be sent. Failures are logged only.
    async fn roll_back(&self, saved: &SequenceExecution, original: &SequenceExecution) {
        let mut restored = original.clone();
        restored.version = saved.version;
        match self.save(&mut restored).await {
            Ok(true) => tracing::warn!(
                execution_id = %original.id,
                state = %original.state(),
                "event not sent, transition rolled back"
            ),
            Ok(false) => tracing::error!(
                execution_id = %original.id,
                "event not sent and execution changed before rollback"
            ),
            Err(err) => tracing::error!(
                execution_id = %original.id,
                error = %err,
                "event not sent and rollback failed"
            ),
        }
    }

    /// Start queued sequences whose slot is free. Errors are logged only;
    /// the periodic dispatch tick retries.
    async fn dispatch_queued(&self) {
        match self.sequences.dispatch_pending(self).await {
            Ok(outcome) => {
                for (execution_id, err) in outcome.failed {
                    tracing::warn!(%execution_id, error = %err, "queued sequence did not start");
                }
            }
            Err(err) => tracing::warn!(error = %err, "sequence dispatch failed, leaving it to the next tick"),
        }
    }

    /// Record an event in the audit trail. Failures are logged only.
    async fn audit(&self, project: &str, event: &KeptnEvent, kind: EventKind) {
        if let Err(err) = self.store(self.events.insert_event(project, event, kind)).await {
            tracing::warn!(event_id = %event.id, error = %err, "failed to record event");
        }
    }

    /// Drop the triggered and started entries of a resolved task.
    async fn forget_task_events(&self, project: &str, triggered_id: &str) {
        let triggered = EventFilter {
            id: Some(triggered_id.to_string()),
            ..EventFilter::for_project(project)
        };
        let started = EventFilter {
            triggered_id: Some(triggered_id.to_string()),
            ..EventFilter::for_project(project)
        };
        let result = async {
            self.store(self.events.delete_events(&triggered, EventKind::Triggered))
                .await?;
            self.store(self.events.delete_events(&started, EventKind::Started))
                .await
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(triggered_id, error = %err, "failed to clean up task events");
        }
    }

    async fn emit(&self, event: DispatcherEvent, skip_queue: bool) -> Result<(), ControllerError> {
        tracing::debug!(
            event_type = %event.event.event_type,
            event_id = %event.event.id,
            skip_queue,
            "emitting event"
        );
        Ok(self.dispatcher.add(event, skip_queue).await?)
    }
}

/// Build `<stage>.<sequence>.finished` for an execution.
fn sequence_finished_event(
    execution: &SequenceExecution,
    result: ResultType,
    status: StatusType,
    message: Option<&str>,
) -> KeptnEvent {
    let scope = &execution.scope;
    let mut data = json!({
        "project": scope.project,
        "stage": scope.stage,
        "service": scope.service,
        "result": result,
        "status": status,
    });
    if let (Some(message), Some(map)) = (message, data.as_object_mut()) {
        map.insert("message".to_string(), json!(message));
    }

    KeptnEvent::new(
        sequence_event_type(&scope.stage, &execution.sequence.name, EventKind::Finished),
        data,
    )
    .with_context(scope.keptn_context.clone())
    .with_triggered_id(scope.triggered_id.clone())
    .with_git_commit_id(scope.git_commit_id.clone())
}

#[cfg(test)]
mod tests;
