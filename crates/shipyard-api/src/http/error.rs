//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use shipyard_core::controller::ControllerError;
use shipyard_core::dispatch::event_dispatcher::DispatchError;
use shipyard_core::service::QueryError;
use shipyard_types::error::{RepositoryError, SequenceExecutionsError, ShipyardError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Controller(ControllerError),
    Query(QueryError),
    Validation(String),
}

impl From<ControllerError> for AppError {
    fn from(e: ControllerError) -> Self {
        AppError::Controller(e)
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        AppError::Query(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Query(QueryError::Store(e))
    }
}

fn store_status(err: &RepositoryError) -> (StatusCode, &'static str) {
    match err {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        RepositoryError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "STORE_TIMEOUT"),
        RepositoryError::Connection | RepositoryError::Query(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
        }
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Controller(err) => match err {
                ControllerError::InvalidEventType(_)
                | ControllerError::InvalidScope(_)
                | ControllerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                ControllerError::SequenceNotFound => (StatusCode::NOT_FOUND, "SEQUENCE_NOT_FOUND"),
                ControllerError::ScopeCollision { .. } => (StatusCode::CONFLICT, "SCOPE_COLLISION"),
                ControllerError::Shipyard(ShipyardError::NotFound(_)) => {
                    (StatusCode::NOT_FOUND, "SHIPYARD_NOT_FOUND")
                }
                ControllerError::Shipyard(ShipyardError::Parse(_) | ShipyardError::Invalid(_)) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_SHIPYARD")
                }
                ControllerError::Shipyard(ShipyardError::Retrieval(_)) => {
                    (StatusCode::BAD_GATEWAY, "SHIPYARD_UNAVAILABLE")
                }
                ControllerError::Store(store)
                | ControllerError::Dispatch(DispatchError::Store(store)) => store_status(store),
                ControllerError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "DISPATCH_ERROR"),
                ControllerError::SequenceDispatch(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "SEQUENCE_DISPATCH_ERROR")
                }
            },
            AppError::Query(err) => match err {
                QueryError::Store(store) => store_status(store),
                QueryError::Executions(SequenceExecutionsError::Empty) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                QueryError::Executions(SequenceExecutionsError::ScopeMismatch) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
                QueryError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Controller(err) => err.to_string(),
            AppError::Query(err) => err.to_string(),
            AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
