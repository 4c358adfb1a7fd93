//! Observers notified when a sequence ends.
//!
//! Hooks are a side channel: they see immutable event/scope values, are
//! called in registration order and cannot influence the controller.

use std::sync::Arc;

use shipyard_types::event::KeptnEvent;
use shipyard_types::scope::EventScope;

pub trait SequenceFinishedHook: Send + Sync {
    /// Called with the emitted `<stage>.<sequence>.finished` event.
    fn on_sequence_finished(&self, event: &KeptnEvent);
}

pub trait SequenceAbortedHook: Send + Sync {
    fn on_sequence_aborted(&self, scope: &EventScope);
}

pub trait SequenceTimeoutHook: Send + Sync {
    /// Called with the last event seen before the sequence timed out.
    fn on_sequence_timeout(&self, event: &KeptnEvent);
}

/// Ordered hook registry.
#[derive(Clone, Default)]
pub struct SequenceHooks {
    finished: Vec<Arc<dyn SequenceFinishedHook>>,
    aborted: Vec<Arc<dyn SequenceAbortedHook>>,
    timed_out: Vec<Arc<dyn SequenceTimeoutHook>>,
}

impl SequenceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_finished(mut self, hook: Arc<dyn SequenceFinishedHook>) -> Self {
        self.finished.push(hook);
        self
    }

    pub fn on_aborted(mut self, hook: Arc<dyn SequenceAbortedHook>) -> Self {
        self.aborted.push(hook);
        self
    }

    pub fn on_timeout(mut self, hook: Arc<dyn SequenceTimeoutHook>) -> Self {
        self.timed_out.push(hook);
        self
    }

    /// Register one observer for all three notifications.
    pub fn observe<H>(self, hook: Arc<H>) -> Self
    where
        H: SequenceFinishedHook + SequenceAbortedHook + SequenceTimeoutHook + 'static,
    {
        self.on_finished(hook.clone())
            .on_aborted(hook.clone())
            .on_timeout(hook)
    }

    pub(crate) fn sequence_finished(&self, event: &KeptnEvent) {
        for hook in &self.finished {
            hook.on_sequence_finished(event);
        }
    }

    pub(crate) fn sequence_aborted(&self, scope: &EventScope) {
        for hook in &self.aborted {
            hook.on_sequence_aborted(scope);
        }
    }

    pub(crate) fn sequence_timed_out(&self, event: &KeptnEvent) {
        for hook in &self.timed_out {
            hook.on_sequence_timeout(event);
        }
    }
}

impl std::fmt::Debug for SequenceHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceHooks")
            .field("finished", &self.finished.len())
            .field("aborted", &self.aborted.len())
            .field("timed_out", &self.timed_out.len())
            .finish()
    }
}

/// Logs every sequence end through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

impl SequenceFinishedHook for LoggingHook {
    fn on_sequence_finished(&self, event: &KeptnEvent) {
        let data = event.event_data();
        tracing::info!(
            keptn_context = %event.shkeptncontext,
            event_type = %event.event_type,
            project = %data.project,
            stage = %data.stage,
            service = %data.service,
            result = ?data.result,
            status = ?data.status,
            "sequence finished"
        );
    }
}

impl SequenceAbortedHook for LoggingHook {
    fn on_sequence_aborted(&self, scope: &EventScope) {
        tracing::info!(
            keptn_context = %scope.keptn_context,
            project = %scope.project,
            stage = %scope.stage,
            "sequence aborted"
        );
    }
}

impl SequenceTimeoutHook for LoggingHook {
    fn on_sequence_timeout(&self, event: &KeptnEvent) {
        tracing::warn!(
            keptn_context = %event.shkeptncontext,
            last_event = %event.event_type,
            last_event_id = %event.id,
            "sequence timed out"
        );
    }
}
