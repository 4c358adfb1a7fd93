//! Sequence execution engine and repository trait definitions.
//!
//! This crate defines the "ports" (repository and retriever traits) that the
//! infrastructure layer implements, plus the controller driving sequences
//! through their lifecycle. It depends only on `shipyard-types` -- never on
//! `shipyard-infra` or any database/IO crate.

pub mod controller;
pub mod dispatch;
pub mod hooks;
pub mod repository;
pub mod service;
pub mod shipyard;

#[cfg(test)]
pub(crate) mod test_support;
