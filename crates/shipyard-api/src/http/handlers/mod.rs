//! Route handlers, one module per resource.

pub mod dispatcher;
pub mod event;
pub mod project;
pub mod sequence;
pub mod state;
