//! Logging and trace export setup for the shipyard controller.

pub mod tracing_setup;
