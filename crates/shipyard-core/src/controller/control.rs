//! Timeout and cancellation.
//!
//! Both paths may race with an in-flight `.finished` event. Losing that
//! race (the record no longer matches) is a no-op, not an error.

use serde::{Deserialize, Serialize};
use shipyard_types::event::{KeptnEvent, ResultType, StatusType};
use shipyard_types::scope::EventScope;
use shipyard_types::sequence::SequenceState;

use super::{ControllerError, ShipyardController, sequence_finished_event};
use crate::dispatch::event_dispatcher::{DispatcherEvent, EventDispatcher};
use crate::dispatch::sequence_dispatcher::SequenceDispatcher;
use crate::repository::event::EventRepository;
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::repository::sequence_queue::QueueFilter;
use crate::shipyard::ShipyardRetriever;

/// Reported by a watcher when no progress was seen for `last_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceTimeout {
    pub keptn_context: String,
    pub last_event: KeptnEvent,
}

/// Operator request to abort the sequences of a keptn context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceCancellation {
    pub keptn_context: String,
    pub project: String,
    /// Restrict to one stage; all stages when absent.
    #[serde(default)]
    pub stage: Option<String>,
}

impl<E, X, S, D, Q> ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    /// Time out the execution whose current task was triggered by
    /// `timeout.last_event`.
    ///
    /// The timeout hook fires even if the finished event cannot be sent;
    /// the send error is still returned.
    #[tracing::instrument(name = "timeout_sequence", skip(self, timeout), fields(keptn_context = %timeout.keptn_context))]
    pub async fn timeout_sequence(&self, timeout: SequenceTimeout) -> Result<(), ControllerError> {
        let filter = SequenceExecutionFilter {
            keptn_context: Some(timeout.keptn_context.clone()),
            current_triggered_id: Some(timeout.last_event.id.clone()),
            states: vec![SequenceState::Started],
            ..Default::default()
        };
        let Some(mut execution) = self
            .store(self.executions.get(&filter))
            .await?
            .into_iter()
            .next()
        else {
            tracing::info!(
                last_event_id = %timeout.last_event.id,
                "no running sequence waits for the timed-out event"
            );
            return Ok(());
        };

        let finished = sequence_finished_event(
            &execution,
            ResultType::Failed,
            StatusType::Errored,
            Some("sequence timed out"),
        );
        execution.finish(SequenceState::TimedOut);
        execution.record_event(&finished);
        if !self.save(&mut execution).await? {
            return Ok(());
        }

        tracing::warn!(
            execution_id = %execution.id,
            stage = %execution.scope.stage,
            sequence = %execution.sequence.name,
            "sequence timed out"
        );
        let emitted = self.emit(DispatcherEvent::now(finished), true).await;
        self.hooks.sequence_timed_out(&timeout.last_event);
        self.dispatch_queued().await;
        emitted
    }

    /// Abort the queued or started executions of a keptn context.
    ///
    /// Queued executions are withdrawn from the dispatcher; started ones
    /// get an `aborted` finished event. The aborted hook fires once per
    /// execution, or once for the request when nothing matched.
    #[tracing::instrument(name = "cancel_sequence", skip(self, cancel), fields(keptn_context = %cancel.keptn_context))]
    pub async fn cancel_sequence(&self, cancel: SequenceCancellation) -> Result<(), ControllerError> {
        let filter = SequenceExecutionFilter {
            project: Some(cancel.project.clone()),
            stage: cancel.stage.clone(),
            keptn_context: Some(cancel.keptn_context.clone()),
            states: vec![SequenceState::Queued, SequenceState::Started],
            ..Default::default()
        };
        let executions = self.store(self.executions.get(&filter)).await?;

        if executions.is_empty() {
            tracing::info!(project = %cancel.project, "no active sequence to cancel");
            self.hooks.sequence_aborted(&EventScope {
                project: cancel.project,
                stage: cancel.stage.unwrap_or_default(),
                keptn_context: cancel.keptn_context,
                ..Default::default()
            });
            return Ok(());
        }

        let mut first_error = None;
        for mut execution in executions {
            let was_started = execution.state() == SequenceState::Started;
            if !was_started {
                if let Err(err) = self
                    .sequences
                    .remove(&QueueFilter::by_execution(execution.id))
                    .await
                {
                    tracing::warn!(
                        execution_id = %execution.id,
                        error = %err,
                        "could not remove sequence from the queue"
                    );
                }
            }

            let finished = sequence_finished_event(
                &execution,
                ResultType::Failed,
                StatusType::Aborted,
                Some("sequence aborted"),
            );
            execution.finish(SequenceState::Aborted);
            if was_started {
                execution.record_event(&finished);
            }
            if !self.save(&mut execution).await? {
                continue;
            }

            tracing::info!(
                execution_id = %execution.id,
                stage = %execution.scope.stage,
                sequence = %execution.sequence.name,
                "sequence aborted"
            );
            if was_started {
                if let Err(err) = self.emit(DispatcherEvent::now(finished), true).await {
                    first_error.get_or_insert(err);
                }
            }
            self.hooks.sequence_aborted(&execution.scope);
        }
        self.dispatch_queued().await;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
