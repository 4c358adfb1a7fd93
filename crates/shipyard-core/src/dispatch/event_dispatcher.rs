//! Outbound event delivery.
//!
//! Events are either sent immediately (`skip_queue`) or persisted in the
//! event queue with a dispatch time. A periodic tick releases queued events
//! whose time has passed, unless delivery is paused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use shipyard_types::error::RepositoryError;
use shipyard_types::event::KeptnEvent;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::dispatch::bus::EventBus;
use crate::repository::event_queue::{EventQueueRepository, QueuedEvent};
use crate::repository::with_timeout;

/// Errors raised while emitting an event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no subscriber received event '{0}'")]
    NoSubscribers(String),

    #[error("event dispatch failed: {0}")]
    Failed(String),

    #[error("event queue error: {0}")]
    Store(#[from] RepositoryError),
}

/// An outbound event and the earliest time it may be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherEvent {
    pub event: KeptnEvent,
    pub time: DateTime<Utc>,
}

impl DispatcherEvent {
    pub fn now(event: KeptnEvent) -> Self {
        Self {
            event,
            time: Utc::now(),
        }
    }

    /// Hold the event back for `delay`.
    pub fn delayed(event: KeptnEvent, delay: Option<Duration>) -> Self {
        let time = delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map_or_else(Utc::now, |d| Utc::now() + d);
        Self { event, time }
    }
}

impl From<DispatcherEvent> for QueuedEvent {
    fn from(event: DispatcherEvent) -> Self {
        Self {
            event: event.event,
            dispatch_at: event.time,
        }
    }
}

/// Sends events produced by the controller.
pub trait EventDispatcher: Send + Sync {
    /// Send now (`skip_queue`) or queue for the next tick.
    fn add(
        &self,
        event: DispatcherEvent,
        skip_queue: bool,
    ) -> impl std::future::Future<Output = Result<(), DispatchError>> + Send;
}

/// Event dispatcher publishing onto an [`EventBus`], with deferred events
/// kept in an [`EventQueueRepository`].
pub struct QueuedEventDispatcher<R: EventQueueRepository> {
    bus: EventBus,
    queue: Arc<R>,
    store_timeout: Duration,
    paused: AtomicBool,
    flush_lock: Mutex<()>,
}

impl<R: EventQueueRepository> QueuedEventDispatcher<R> {
    pub fn new(bus: EventBus, queue: Arc<R>) -> Self {
        Self {
            bus,
            queue,
            store_timeout: Duration::from_secs(5),
            paused: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("event dispatcher paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("event dispatcher resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn queued_len(&self) -> Result<u64, RepositoryError> {
        with_timeout(self.store_timeout, self.queue.count_events()).await
    }

    fn send(&self, event: KeptnEvent) -> Result<(), DispatchError> {
        let event_type = event.event_type.clone();
        let id = event.id.clone();
        if self.bus.publish(event) == 0 {
            return Err(DispatchError::NoSubscribers(event_type));
        }
        tracing::debug!(event_id = %id, event_type = %event_type, "event dispatched");
        Ok(())
    }

    /// Send every queued event whose dispatch time has passed, oldest first.
    ///
    /// Returns the number of events sent. Does nothing while paused. An
    /// event leaves the queue only after it was sent.
    pub async fn flush(&self) -> Result<usize, DispatchError> {
        if self.is_paused() {
            return Ok(0);
        }
        let _guard = self.flush_lock.lock().await;

        let due = with_timeout(self.store_timeout, self.queue.get_due_events(Utc::now())).await?;

        let mut sent = 0;
        let mut first_error = None;
        for queued in due {
            let event_id = queued.event.id.clone();
            if let Err(err) = self.send(queued.event) {
                first_error.get_or_insert(err);
                continue;
            }
            sent += 1;
            if let Err(err) = with_timeout(self.store_timeout, self.queue.delete_event(&event_id)).await {
                tracing::warn!(event_id = %event_id, error = %err, "sent event stays queued");
                first_error.get_or_insert(err.into());
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(sent),
        }
    }

    /// Tick loop releasing due events until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("event dispatcher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        tracing::warn!(error = %err, "failed to dispatch queued events");
                    }
                }
            }
        }
    }
}

impl<R: EventQueueRepository> EventDispatcher for QueuedEventDispatcher<R> {
    async fn add(&self, event: DispatcherEvent, skip_queue: bool) -> Result<(), DispatchError> {
        if skip_queue {
            return self.send(event.event);
        }
        tracing::debug!(
            event_id = %event.event.id,
            event_type = %event.event.event_type,
            dispatch_at = %event.time,
            "event queued"
        );
        let queued = QueuedEvent::from(event);
        with_timeout(self.store_timeout, self.queue.queue_event(&queued)).await?;
        Ok(())
    }
}
