//! Opening events and sequence starts.

use serde_json::json;
use shipyard_types::error::RepositoryError;
use shipyard_types::event::{EventKind, KeptnEvent, ResultType, StatusType, sequence_event_type};
use shipyard_types::scope::EventScope;
use shipyard_types::sequence::{SequenceExecution, SequenceState};
use shipyard_types::shipyard::Sequence;

use super::{ControllerError, ShipyardController};
use crate::dispatch::event_dispatcher::{DispatcherEvent, EventDispatcher};
use crate::dispatch::sequence_dispatcher::{SequenceDispatchError, SequenceDispatcher, SequenceStarter};
use crate::repository::event::EventRepository;
use crate::repository::sequence_execution::SequenceExecutionRepository;
use crate::repository::sequence_queue::{QueueFilter, QueueItem};
use crate::shipyard::ShipyardRetriever;

impl<E, X, S, D, Q> ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    /// Open a new execution for `<stage>.<sequence>.triggered` and try to
    /// start it right away.
    ///
    /// An unusable shipyard or unknown sequence is answered with an errored
    /// `<stage>.<sequence>.finished` event; nothing is persisted. If the
    /// new execution is eligible but cannot be started, it is withdrawn and
    /// the cause returned.
    pub(super) async fn handle_sequence_triggered(
        &self,
        event: KeptnEvent,
        stage: &str,
        sequence_name: &str,
    ) -> Result<(), ControllerError> {
        let scope = opening_scope(&event, stage)?;

        let shipyard = match self.shipyards.get_shipyard(&scope.project).await {
            Ok(shipyard) => shipyard,
            Err(err) => {
                return self
                    .reject_opening(&scope, sequence_name, &err.to_string())
                    .await;
            }
        };
        let Some(sequence) = shipyard.sequence(stage, sequence_name) else {
            let reason = format!("no sequence '{sequence_name}' defined for stage '{stage}'");
            return self.reject_opening(&scope, sequence_name, &reason).await;
        };

        let execution = self.open_sequence(sequence, scope.clone(), &event).await?;

        match self.sequences.dispatch_pending(self).await {
            Ok(mut outcome) => {
                for (execution_id, err) in &outcome.failed {
                    if *execution_id != execution.id {
                        tracing::warn!(%execution_id, error = %err, "queued sequence did not start");
                    }
                }
                if let Some(err) = outcome.take_failure(execution.id) {
                    self.withdraw(&execution).await;
                    return Err(err.into());
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "immediate sequence dispatch failed, leaving it to the next tick");
            }
        }

        self.audit(&scope.project, &event, EventKind::Triggered).await;
        Ok(())
    }

    /// Persist a queued execution of `sequence` and hand it to the
    /// sequence dispatcher. Nothing is started here.
    pub(super) async fn open_sequence(
        &self,
        sequence: &Sequence,
        scope: EventScope,
        event: &KeptnEvent,
    ) -> Result<SequenceExecution, ControllerError> {
        let mut execution =
            SequenceExecution::new(sequence.clone(), scope.clone(), event.data.clone());
        execution.record_event(event);

        match self.store(self.executions.insert(&execution)).await {
            Ok(()) => {}
            Err(ControllerError::Store(RepositoryError::Conflict(_))) => {
                return Err(ControllerError::ScopeCollision {
                    project: scope.project,
                    stage: scope.stage,
                    service: scope.service,
                });
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self
            .sequences
            .add(QueueItem::new(execution.id, scope.clone()))
            .await
        {
            self.store(self.executions.delete(&execution.id)).await?;
            return Err(err.into());
        }

        tracing::info!(
            execution_id = %execution.id,
            project = %scope.project,
            stage = %scope.stage,
            service = %scope.service,
            sequence = %sequence.name,
            "sequence opened"
        );
        Ok(execution)
    }

    /// Remove a just-opened execution that could not be started, together
    /// with its queue item. Failures are logged only.
    async fn withdraw(&self, execution: &SequenceExecution) {
        if let Err(err) = self
            .sequences
            .remove(&QueueFilter::by_execution(execution.id))
            .await
        {
            tracing::error!(execution_id = %execution.id, error = %err, "could not withdraw queue item");
        }
        match self.store(self.executions.delete(&execution.id)).await {
            Ok(_) => tracing::warn!(execution_id = %execution.id, "sequence withdrawn"),
            Err(err) => {
                tracing::error!(execution_id = %execution.id, error = %err, "could not withdraw sequence")
            }
        }
    }

    async fn reject_opening(
        &self,
        scope: &EventScope,
        sequence_name: &str,
        reason: &str,
    ) -> Result<(), ControllerError> {
        tracing::warn!(
            project = %scope.project,
            stage = %scope.stage,
            sequence = sequence_name,
            reason,
            "cannot open sequence"
        );

        let finished = KeptnEvent::new(
            sequence_event_type(&scope.stage, sequence_name, EventKind::Finished),
            json!({
                "project": scope.project,
                "stage": scope.stage,
                "service": scope.service,
                "status": StatusType::Errored,
                "result": ResultType::Failed,
                "message": reason,
            }),
        )
        .with_context(scope.keptn_context.clone())
        .with_triggered_id(scope.triggered_id.clone())
        .with_git_commit_id(scope.git_commit_id.clone());

        self.emit(DispatcherEvent::now(finished), true).await
    }

    /// Move a queued execution to started by triggering its first task.
    async fn start_execution(&self, mut execution: SequenceExecution) -> Result<bool, ControllerError> {
        if execution.state() != SequenceState::Queued {
            return Ok(false);
        }
        tracing::info!(
            execution_id = %execution.id,
            keptn_context = %execution.scope.keptn_context,
            stage = %execution.scope.stage,
            sequence = %execution.sequence.name,
            "starting sequence"
        );

        let original = execution.clone();
        match execution.next_task().cloned() {
            Some(task) => self.trigger_task(&mut execution, &original, &task).await,
            None => {
                let (result, status) = execution.aggregated_outcome();
                self.complete_sequence(&mut execution, &original, result, status, None)
                    .await
            }
        }
    }
}

impl<E, X, S, D, Q> SequenceStarter for ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    async fn start_sequence(&self, execution: SequenceExecution) -> Result<bool, SequenceDispatchError> {
        self.start_execution(execution).await.map_err(|e| match e {
            ControllerError::Store(err) => SequenceDispatchError::Store(err),
            ControllerError::Dispatch(err) => SequenceDispatchError::Dispatch(err),
            other => SequenceDispatchError::Start(other.to_string()),
        })
    }
}

/// Scope of a `<stage>.<sequence>.triggered` event, keyed by the event's
/// own id.
pub(super) fn opening_scope(event: &KeptnEvent, stage: &str) -> Result<EventScope, ControllerError> {
    let mut scope = EventScope::from_event(event)?;
    if scope.service.is_empty() {
        return Err(ControllerError::Validation(
            "service must not be empty".to_string(),
        ));
    }
    if scope.stage != stage {
        return Err(ControllerError::Validation(format!(
            "stage '{}' in event data does not match event type stage '{stage}'",
            scope.stage
        )));
    }
    scope.triggered_id = event.id.clone();
    Ok(scope)
}
