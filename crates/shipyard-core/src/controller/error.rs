use shipyard_types::error::{EventTypeError, RepositoryError, ScopeError, ShipyardError};
use thiserror::Error;

use crate::dispatch::event_dispatcher::DispatchError;
use crate::dispatch::sequence_dispatcher::SequenceDispatchError;

/// Errors surfaced by the controller to its callers.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    InvalidEventType(#[from] EventTypeError),

    #[error(transparent)]
    InvalidScope(#[from] ScopeError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no matching sequence found for event")]
    SequenceNotFound,

    #[error("another sequence is already active for project '{project}', stage '{stage}', service '{service}'")]
    ScopeCollision {
        project: String,
        stage: String,
        service: String,
    },

    #[error(transparent)]
    Shipyard(#[from] ShipyardError),

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    SequenceDispatch(SequenceDispatchError),
}

impl From<SequenceDispatchError> for ControllerError {
    fn from(err: SequenceDispatchError) -> Self {
        match err {
            SequenceDispatchError::ScopeCollision {
                project,
                stage,
                service,
            } => ControllerError::ScopeCollision {
                project,
                stage,
                service,
            },
            SequenceDispatchError::Store(err) => ControllerError::Store(err),
            SequenceDispatchError::Dispatch(err) => ControllerError::Dispatch(err),
            other => ControllerError::SequenceDispatch(other),
        }
    }
}
