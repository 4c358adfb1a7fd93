//! Infrastructure layer for the shipyard controller.
//!
//! Contains implementations of the ports defined in `shipyard-core`:
//! SQLite storage for events, sequence executions, the start queue and the
//! outbound event queue, the filesystem shipyard retriever, and the
//! `config.toml` loader.

pub mod config;
pub mod shipyard;
pub mod sqlite;
