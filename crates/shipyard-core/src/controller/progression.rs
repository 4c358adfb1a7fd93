//! Task progression: what happens once the current task has resolved.

use shipyard_types::error::RepositoryError;
use shipyard_types::event::{EventKind, KeptnEvent, ResultType, StatusType, sequence_event_type, triggered_event_type};
use shipyard_types::payload;
use shipyard_types::sequence::{SequenceExecution, SequenceState};
use shipyard_types::shipyard::Task;

use super::trigger::opening_scope;
use super::{ControllerError, ShipyardController, sequence_finished_event};
use crate::dispatch::event_dispatcher::{DispatcherEvent, EventDispatcher};
use crate::dispatch::sequence_dispatcher::SequenceDispatcher;
use crate::repository::event::EventRepository;
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::shipyard::ShipyardRetriever;

impl<E, X, S, D, Q> ShipyardController<E, X, S, D, Q>
where
    E: EventRepository,
    X: SequenceExecutionRepository,
    S: ShipyardRetriever,
    D: EventDispatcher,
    Q: SequenceDispatcher,
{
    /// Fold the resolved task into the log and take the next step.
    ///
    /// - errored status: finish the sequence as `errored`/`fail`
    /// - failed result: skip remaining tasks, finish as `succeeded`/`fail`
    /// - otherwise: trigger the next task, or finish with the aggregate
    ///
    /// When the record changed between resolution and the write, it is
    /// re-read and the step retried while the same task is still current
    /// and resolved.
    pub(super) async fn on_task_resolved(
        &self,
        mut execution: SequenceExecution,
    ) -> Result<(), ControllerError> {
        let Some(triggered_id) = execution.current_triggered_id().map(str::to_string) else {
            return Ok(());
        };

        for attempt in 1..=PROGRESSION_ATTEMPTS {
            if self.advance(execution.clone()).await? {
                return Ok(());
            }

            let fresh = self
                .store(self.executions.get(&SequenceExecutionFilter::by_id(execution.id)))
                .await?
                .into_iter()
                .next();
            let Some(fresh) = fresh.filter(|e| {
                e.state() == SequenceState::Started
                    && e.current_triggered_id() == Some(triggered_id.as_str())
                    && e.is_current_task_resolved()
            }) else {
                tracing::debug!(
                    execution_id = %execution.id,
                    %triggered_id,
                    "resolved task already handled elsewhere"
                );
                return Ok(());
            };
            tracing::debug!(execution_id = %execution.id, attempt, "retrying task progression");
            execution = fresh;
        }

        Err(ControllerError::Store(RepositoryError::Conflict(format!(
            "execution {} kept changing while progressing task {triggered_id}",
            execution.id
        ))))
    }

    /// One progression attempt. Returns `false` if the record changed
    /// underneath.
    async fn advance(&self, resolved: SequenceExecution) -> Result<bool, ControllerError> {
        let mut execution = resolved.clone();
        let Some(completed) = execution.complete_current_task() else {
            return Ok(true);
        };
        tracing::info!(
            execution_id = %execution.id,
            task = %completed.name,
            result = %completed.result,
            status = %completed.status,
            "task resolved"
        );

        let progressed = if completed.status == StatusType::Errored {
            self.complete_sequence(
                &mut execution,
                &resolved,
                ResultType::Failed,
                StatusType::Errored,
                Some(&format!("task '{}' errored", completed.name)),
            )
            .await?
        } else if completed.result == ResultType::Failed {
            self.complete_sequence(
                &mut execution,
                &resolved,
                ResultType::Failed,
                StatusType::Succeeded,
                None,
            )
            .await?
        } else if let Some(next) = execution.next_task().cloned() {
            self.trigger_task(&mut execution, &resolved, &next).await?
        } else {
            let (result, status) = execution.aggregated_outcome();
            self.complete_sequence(&mut execution, &resolved, result, status, None)
                .await?
        };

        if progressed {
            self.forget_task_events(&execution.scope.project, &completed.triggered_id)
                .await;
        }
        Ok(progressed)
    }

    /// Persist `task` as the current task and emit its `.triggered` event.
    ///
    /// The record is saved before the event leaves so that an immediate
    /// `.started` finds it; if the event cannot be sent the record is put
    /// back to `original`. Returns `false` if the record changed underneath.
    pub(super) async fn trigger_task(
        &self,
        execution: &mut SequenceExecution,
        original: &SequenceExecution,
        task: &Task,
    ) -> Result<bool, ControllerError> {
        let triggered = KeptnEvent::new(
            triggered_event_type(&task.name),
            execution.next_task_payload(task),
        )
        .with_context(execution.scope.keptn_context.clone())
        .with_git_commit_id(execution.scope.git_commit_id.clone());

        execution.start_task(&task.name, &triggered.id);
        execution.record_event(&triggered);
        if !self.save(execution).await? {
            return Ok(false);
        }

        if let Err(err) = self
            .emit(DispatcherEvent::delayed(triggered.clone(), task.delay()), false)
            .await
        {
            self.roll_back(execution, original).await;
            return Err(err);
        }
        self.audit(&execution.scope.project, &triggered, EventKind::Triggered)
            .await;
        tracing::info!(
            execution_id = %execution.id,
            task = %task.name,
            triggered_id = %triggered.id,
            "task triggered"
        );
        Ok(true)
    }

    /// Finish the sequence, notify hooks and open follow-up sequences.
    ///
    /// If the finished event cannot be sent the record is put back to
    /// `original`.
    pub(super) async fn complete_sequence(
        &self,
        execution: &mut SequenceExecution,
        original: &SequenceExecution,
        result: ResultType,
        status: StatusType,
        message: Option<&str>,
    ) -> Result<bool, ControllerError> {
        let finished = sequence_finished_event(execution, result, status, message);
        execution.finish(SequenceState::Finished);
        execution.record_event(&finished);
        if !self.save(execution).await? {
            return Ok(false);
        }

        tracing::info!(
            execution_id = %execution.id,
            keptn_context = %execution.scope.keptn_context,
            stage = %execution.scope.stage,
            sequence = %execution.sequence.name,
            result = %result,
            status = %status,
            "sequence finished"
        );
        if let Err(err) = self.emit(DispatcherEvent::now(finished.clone()), true).await {
            self.roll_back(execution, original).await;
            return Err(err);
        }
        self.hooks.sequence_finished(&finished);

        self.trigger_follow_up_sequences(execution, &finished).await;
        Ok(true)
    }

    /// Open every sequence whose `triggeredOn` rules match the finished
    /// event and announce it with `<stage>.<sequence>.triggered`.
    ///
    /// Opened sequences are queued; the caller's dispatch pass or the
    /// periodic tick starts them. Failures are logged per follow-up.
    async fn trigger_follow_up_sequences(&self, execution: &SequenceExecution, finished: &KeptnEvent) {
        let scope = &execution.scope;
        let shipyard = match self.shipyards.get_cached_shipyard(&scope.project).await {
            Ok(shipyard) => shipyard,
            Err(err) => {
                tracing::error!(
                    project = %scope.project,
                    error = %err,
                    "cannot read shipyard, no follow-up sequences opened"
                );
                return;
            }
        };
        let targets =
            shipyard.sequences_triggered_by(&scope.stage, &execution.sequence.name, &finished.data);

        for target in targets {
            let Some(sequence) = shipyard.sequence(&target.stage, &target.sequence) else {
                continue;
            };
            let commit_id = if target.stage == scope.stage {
                scope.git_commit_id.clone()
            } else {
                match self
                    .shipyards
                    .get_latest_commit_id(&scope.project, &target.stage)
                    .await
                {
                    Ok(commit_id) => commit_id,
                    Err(err) => {
                        tracing::warn!(
                            stage = %target.stage,
                            error = %err,
                            "could not resolve latest commit id, keeping the current one"
                        );
                        scope.git_commit_id.clone()
                    }
                }
            };

            let mut data = execution.accumulated_properties();
            payload::set_str(&mut data, "project", &scope.project);
            payload::set_str(&mut data, "stage", &target.stage);
            payload::set_str(&mut data, "service", &scope.service);

            let triggered = KeptnEvent::new(
                sequence_event_type(&target.stage, &target.sequence, EventKind::Triggered),
                data,
            )
            .with_context(scope.keptn_context.clone())
            .with_git_commit_id(commit_id);

            let opened = match opening_scope(&triggered, &target.stage) {
                Ok(follow_up) => self.open_sequence(sequence, follow_up, &triggered).await,
                Err(err) => Err(err),
            };
            if let Err(err) = opened {
                tracing::warn!(
                    keptn_context = %scope.keptn_context,
                    stage = %target.stage,
                    sequence = %target.sequence,
                    error = %err,
                    "could not open follow-up sequence"
                );
                continue;
            }
            self.audit(&scope.project, &triggered, EventKind::Triggered).await;
            tracing::info!(
                keptn_context = %scope.keptn_context,
                stage = %target.stage,
                sequence = %target.sequence,
                "follow-up sequence opened"
            );

            if let Err(err) = self.emit(DispatcherEvent::now(triggered), true).await {
                tracing::warn!(
                    stage = %target.stage,
                    sequence = %target.sequence,
                    error = %err,
                    "could not announce follow-up sequence"
                );
            }
        }
    }
}

/// Progression attempts before a contended record is reported as a conflict.
const PROGRESSION_ATTEMPTS: usize = 3;
