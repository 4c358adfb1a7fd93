//! Shared domain types for the shipyard controller.
//!
//! Lifecycle events, event scopes, the shipyard (pipeline definition)
//! model, sequence execution records and their query views.
//!
//! Zero infrastructure dependencies -- only serde, serde_yaml_ng, uuid, chrono, semver, thiserror.

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod payload;
pub mod scope;
pub mod sequence;
pub mod shipyard;
pub mod state;
