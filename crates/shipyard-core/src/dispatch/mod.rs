//! Outbound event delivery and sequence admission.

pub mod bus;
pub mod event_dispatcher;
pub mod leadership;
pub mod sequence_dispatcher;
