//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (shipyard-infra) implements. The core crate never depends on any
//! specific storage technology.

use std::future::Future;
use std::time::Duration;

use shipyard_types::error::RepositoryError;

pub mod event;
pub mod event_queue;
pub mod sequence_execution;
pub mod sequence_queue;

/// Run a store call with an upper bound on its duration.
///
/// Elapsed calls surface as [`RepositoryError::Timeout`]; nothing is retried.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RepositoryError>>,
) -> Result<T, RepositoryError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RepositoryError::Timeout(limit.as_millis() as u64)),
    }
}
