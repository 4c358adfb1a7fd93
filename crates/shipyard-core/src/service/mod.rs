//! Read-side and maintenance services.
//!
//! The controller owns every state transition; these services only query
//! the stores or purge whole projects. They depend on the repository
//! traits, never on a concrete store.

pub mod project;
pub mod sequence_execution;
pub mod sequence_state;

use shipyard_types::error::{RepositoryError, SequenceExecutionsError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error(transparent)]
    Executions(#[from] SequenceExecutionsError),

    #[error("validation error: {0}")]
    Validation(String),
}
