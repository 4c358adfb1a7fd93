//! Admission control for sequence starts.
//!
//! Newly opened sequences are queued here; a periodic tick (and an
//! immediate pass after every `add`) starts queued executions whose
//! `(project, stage, service)` slot is free. Dispatching only happens while
//! the process holds write leadership.

use std::sync::Arc;
use std::time::Duration;

use shipyard_types::error::RepositoryError;
use shipyard_types::sequence::{SequenceExecution, SequenceState};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::event_dispatcher::DispatchError;
use crate::dispatch::leadership::LeadershipQuery;
use crate::repository::sequence_execution::{SequenceExecutionFilter, SequenceExecutionRepository};
use crate::repository::sequence_queue::{QueueFilter, QueueItem, SequenceQueueRepository};
use crate::repository::with_timeout;

#[derive(Debug, Error)]
pub enum SequenceDispatchError {
    #[error("another sequence is already active for project '{project}', stage '{stage}', service '{service}'")]
    ScopeCollision {
        project: String,
        stage: String,
        service: String,
    },

    #[error("sequence store error: {0}")]
    Store(#[from] RepositoryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("could not start sequence: {0}")]
    Start(String),
}

/// Result of one dispatch pass.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub started: usize,
    /// Executions whose start failed. Their queue items are kept.
    pub failed: Vec<(Uuid, SequenceDispatchError)>,
}

impl DispatchOutcome {
    /// Take the start failure of `execution_id`, if any.
    pub fn take_failure(&mut self, execution_id: Uuid) -> Option<SequenceDispatchError> {
        let index = self.failed.iter().position(|(id, _)| *id == execution_id)?;
        Some(self.failed.swap_remove(index).1)
    }
}

/// Starts a queued execution: persists it as started and emits its first task.
pub trait SequenceStarter: Send + Sync {
    /// Returns `false` when the execution was no longer startable.
    fn start_sequence(
        &self,
        execution: SequenceExecution,
    ) -> impl std::future::Future<Output = Result<bool, SequenceDispatchError>> + Send;
}

pub trait SequenceDispatcher: Send + Sync {
    /// Queue a newly opened sequence.
    ///
    /// Fails with [`SequenceDispatchError::ScopeCollision`] when another
    /// active execution occupies the same slot.
    fn add(
        &self,
        item: QueueItem,
    ) -> impl std::future::Future<Output = Result<(), SequenceDispatchError>> + Send;

    /// Withdraw queued, not yet dispatched items.
    fn remove(
        &self,
        filter: &QueueFilter,
    ) -> impl std::future::Future<Output = Result<u64, SequenceDispatchError>> + Send;

    /// Start every eligible queued sequence.
    ///
    /// A failed start leaves the item queued for the next pass and is
    /// reported in [`DispatchOutcome::failed`].
    fn dispatch_pending<S: SequenceStarter>(
        &self,
        starter: &S,
    ) -> impl std::future::Future<Output = Result<DispatchOutcome, SequenceDispatchError>> + Send;
}

/// Sequence dispatcher backed by a persistent queue.
pub struct QueueSequenceDispatcher<X: SequenceExecutionRepository, Q: SequenceQueueRepository> {
    executions: Arc<X>,
    queue: Arc<Q>,
    leadership: Arc<dyn LeadershipQuery>,
    store_timeout: Duration,
    dispatch_lock: Mutex<()>,
}

impl<X: SequenceExecutionRepository, Q: SequenceQueueRepository> QueueSequenceDispatcher<X, Q> {
    pub fn new(executions: Arc<X>, queue: Arc<Q>, leadership: Arc<dyn LeadershipQuery>) -> Self {
        Self {
            executions,
            queue,
            leadership,
            store_timeout: Duration::from_secs(5),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Tick loop dispatching queued sequences until `cancel` fires.
    pub async fn run<S: SequenceStarter>(
        self: Arc<Self>,
        starter: Arc<S>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("sequence dispatcher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.dispatch_pending(starter.as_ref()).await {
                        Ok(outcome) if outcome.started > 0 => {
                            tracing::info!(started = outcome.started, "dispatched queued sequences")
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "sequence dispatch tick failed"),
                    }
                }
            }
        }
    }

    async fn dequeue(&self, item: &QueueItem) -> Result<(), SequenceDispatchError> {
        with_timeout(
            self.store_timeout,
            self.queue
                .delete_queue_items(&QueueFilter::by_execution(item.execution_id)),
        )
        .await?;
        Ok(())
    }

    /// Whether a started execution other than `execution` holds its slot.
    async fn is_blocked(&self, execution: &SequenceExecution) -> Result<bool, SequenceDispatchError> {
        let filter = SequenceExecutionFilter {
            project: Some(execution.scope.project.clone()),
            stage: Some(execution.scope.stage.clone()),
            service: Some(execution.scope.service.clone()),
            states: vec![SequenceState::Started],
            ..Default::default()
        };
        let started = with_timeout(self.store_timeout, self.executions.get(&filter)).await?;
        Ok(started.iter().any(|e| e.id != execution.id))
    }
}

impl<X: SequenceExecutionRepository, Q: SequenceQueueRepository> SequenceDispatcher
    for QueueSequenceDispatcher<X, Q>
{
    async fn add(&self, item: QueueItem) -> Result<(), SequenceDispatchError> {
        let filter = SequenceExecutionFilter {
            project: Some(item.scope.project.clone()),
            stage: Some(item.scope.stage.clone()),
            service: Some(item.scope.service.clone()),
            states: vec![SequenceState::Queued, SequenceState::Started],
            ..Default::default()
        };
        let active = with_timeout(self.store_timeout, self.executions.get(&filter)).await?;
        if active.iter().any(|e| e.id != item.execution_id) {
            return Err(SequenceDispatchError::ScopeCollision {
                project: item.scope.project.clone(),
                stage: item.scope.stage.clone(),
                service: item.scope.service.clone(),
            });
        }

        with_timeout(self.store_timeout, self.queue.queue_sequence(&item)).await?;
        tracing::info!(
            execution_id = %item.execution_id,
            keptn_context = %item.scope.keptn_context,
            project = %item.scope.project,
            stage = %item.scope.stage,
            service = %item.scope.service,
            "sequence queued"
        );
        Ok(())
    }

    async fn remove(&self, filter: &QueueFilter) -> Result<u64, SequenceDispatchError> {
        let removed = with_timeout(self.store_timeout, self.queue.delete_queue_items(filter)).await?;
        tracing::debug!(removed, "removed queued sequences");
        Ok(removed)
    }

    async fn dispatch_pending<S: SequenceStarter>(
        &self,
        starter: &S,
    ) -> Result<DispatchOutcome, SequenceDispatchError> {
        let mut outcome = DispatchOutcome::default();
        if !self.leadership.is_leader() {
            tracing::debug!("not the leader, skipping sequence dispatch");
            return Ok(outcome);
        }
        let _guard = self.dispatch_lock.lock().await;

        let items = with_timeout(self.store_timeout, self.queue.get_queued_sequences()).await?;

        for item in items {
            let execution = with_timeout(
                self.store_timeout,
                self.executions
                    .get(&SequenceExecutionFilter::by_id(item.execution_id)),
            )
            .await?
            .into_iter()
            .next();

            let Some(execution) = execution.filter(|e| e.state() == SequenceState::Queued) else {
                tracing::debug!(execution_id = %item.execution_id, "dropping stale queue item");
                self.dequeue(&item).await?;
                continue;
            };

            if self.is_blocked(&execution).await? {
                tracing::debug!(
                    execution_id = %execution.id,
                    stage = %execution.scope.stage,
                    service = %execution.scope.service,
                    "sequence blocked by an active execution"
                );
                continue;
            }

            match starter.start_sequence(execution).await {
                Ok(started) => {
                    if started {
                        outcome.started += 1;
                    }
                    // A leftover item is stale and dropped by a later pass.
                    if let Err(err) = self.dequeue(&item).await {
                        tracing::warn!(
                            execution_id = %item.execution_id,
                            error = %err,
                            "could not dequeue started sequence"
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(
                        execution_id = %item.execution_id,
                        error = %err,
                        "failed to start sequence, keeping it queued"
                    );
                    outcome.failed.push((item.execution_id, err));
                }
            }
        }

        Ok(outcome)
    }
}
