//! Task `.started` / `.finished` correlation.

use shipyard_types::event::{EventKind, KeptnEvent};
use shipyard_types::scope::EventScope;
use shipyard_types::sequence::{LatestEvent, SequenceExecution, TaskEvent, TaskOutcome};

use super::{ControllerError, ShipyardController};
use crate::dispatch::event_dispatcher::EventDispatcher;
use crate::dispatch::sequence_dispatcher::SequenceDispatcher;
use crate::repository::event::EventRepository;
use crate::repository::sequence_execution::SequenceExecutionRepository;
use crate::shipyard::ShipyardRetriever;

impl<E, X, S, D, Q> ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    pub(super) async fn handle_task_started(
        &self,
        event: KeptnEvent,
        task: &str,
    ) -> Result<(), ControllerError> {
        let scope = EventScope::from_event(&event)?;
        let report = TaskEvent::Started {
            source: event.source.clone(),
        };
        let execution = self.record_task_event(&event, task, &report).await?;

        self.audit(&scope.project, &event, EventKind::Started).await;
        tracing::debug!(
            execution_id = %execution.id,
            task,
            source = %event.source,
            "task started"
        );
        Ok(())
    }

    pub(super) async fn handle_task_finished(
        &self,
        event: KeptnEvent,
        task: &str,
    ) -> Result<(), ControllerError> {
        let scope = EventScope::from_event(&event)?;
        let data = event.event_data();
        let report = TaskEvent::Finished {
            source: event.source.clone(),
            outcome: TaskOutcome {
                result: data.result.unwrap_or_default(),
                status: data.status.unwrap_or_default(),
                properties: event.data.clone(),
            },
        };
        let execution = self.record_task_event(&event, task, &report).await?;
        self.audit(&scope.project, &event, EventKind::Finished).await;

        if !execution.is_current_task_resolved() {
            tracing::info!(
                execution_id = %execution.id,
                task,
                source = %event.source,
                "task finished by one source, waiting for the others"
            );
            return Ok(());
        }
        self.on_task_resolved(execution).await?;
        // A finished sequence frees its slot and may have queued follow-ups.
        self.dispatch_queued().await;
        Ok(())
    }

    /// Append a task report to the execution awaiting `event.triggeredid`.
    async fn record_task_event(
        &self,
        event: &KeptnEvent,
        task: &str,
        report: &TaskEvent,
    ) -> Result<SequenceExecution, ControllerError> {
        if event.triggeredid.is_empty() {
            return Err(ControllerError::Validation(
                "triggeredid must not be empty".to_string(),
            ));
        }

        let updated = self
            .store(self.executions.append_task_event(
                &event.triggeredid,
                report,
                &LatestEvent::from(event),
            ))
            .await?;
        let Some(execution) = updated else {
            tracing::debug!(triggered_id = %event.triggeredid, task, "no execution awaits this task");
            return Err(ControllerError::SequenceNotFound);
        };

        let current = execution.status.current_task.as_ref();
        if let Some(current) = current.filter(|c| c.name != task) {
            tracing::warn!(
                execution_id = %execution.id,
                expected = %current.name,
                received = task,
                "task event name does not match the current task"
            );
        }
        Ok(execution)
    }
}
