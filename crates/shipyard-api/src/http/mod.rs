//! HTTP/REST API layer.
//!
//! Axum-based REST API under `/v1/` with envelope responses and CORS.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
