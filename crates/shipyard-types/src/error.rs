use thiserror::Error;

/// Errors from repository operations (used by trait definitions in shipyard-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store call timed out after {0} ms")]
    Timeout(u64),
}

/// Errors raised while deriving an [`crate::scope::EventScope`] from an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("invalid event scope: {0} must not be empty")]
    Missing(&'static str),

    #[error("invalid event scope: event data is not an object")]
    MalformedData,
}

/// Errors raised while parsing an event type string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventTypeError {
    #[error("event type '{0}' does not start with the keptn event prefix")]
    MissingPrefix(String),

    #[error("event type '{0}' has no valid kind suffix")]
    UnknownKind(String),

    #[error("event type '{0}' is malformed")]
    Malformed(String),
}

/// Errors related to pipeline definitions (shipyards).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShipyardError {
    #[error("no shipyard resource found for project '{0}'")]
    NotFound(String),

    #[error("could not parse shipyard: {0}")]
    Parse(String),

    #[error("invalid shipyard: {0}")]
    Invalid(String),

    #[error("shipyard retrieval failed: {0}")]
    Retrieval(String),
}

/// Errors raised when mapping sequence executions onto the query model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceExecutionsError {
    #[error("provided list of sequence executions is empty")]
    Empty,

    #[error("sequence executions do not belong to the same scope")]
    ScopeMismatch,
}
