//! Background loops: dispatcher ticks and the outbound event log.
//!
//! Every loop stops when the shared `CancellationToken` fires.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shipyard_types::event::KeptnEvent;

use crate::state::AppState;

/// Spawn every background loop. Subscriptions are taken before returning,
/// so no event emitted afterwards is missed.
pub fn spawn_background(state: &AppState, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let outbound = state.bus.subscribe();

    vec![
        tokio::spawn(state.sequence_dispatcher.clone().run(
            state.controller.clone(),
            state.config.sequence_dispatch_interval(),
            cancel.clone(),
        )),
        tokio::spawn(
            state
                .event_dispatcher
                .clone()
                .run(state.config.event_dispatch_interval(), cancel.clone()),
        ),
        tokio::spawn(run_outbound_log(outbound, cancel.clone())),
    ]
}

/// Log every outbound event at the delivery boundary.
async fn run_outbound_log(mut events: broadcast::Receiver<KeptnEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    keptn_context = %event.shkeptncontext,
                    triggered_id = %event.triggeredid,
                    "event sent"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "outbound log skipped events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
