//! Write-leadership signals for the sequence dispatcher.
//!
//! Only the replica holding write leadership may start sequences. The
//! dispatcher asks its [`LeadershipQuery`] on every tick.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Whether the process may mutate dispatch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatcherMode {
    ReadWrite,
    ReadOnly,
}

impl DispatcherMode {
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            DispatcherMode::ReadOnly
        } else {
            DispatcherMode::ReadWrite
        }
    }
}

pub trait LeadershipQuery: Send + Sync {
    fn mode(&self) -> DispatcherMode;

    fn is_leader(&self) -> bool {
        self.mode() == DispatcherMode::ReadWrite
    }
}

/// Single-replica deployments: always the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

impl LeadershipQuery for AlwaysLeader {
    fn mode(&self) -> DispatcherMode {
        DispatcherMode::ReadWrite
    }
}

/// Leadership flipped at runtime by an external elector.
#[derive(Debug, Clone)]
pub struct WatchLeadership {
    receiver: watch::Receiver<DispatcherMode>,
}

impl WatchLeadership {
    /// Returns the query and the sender the elector drives.
    pub fn new(initial: DispatcherMode) -> (Self, watch::Sender<DispatcherMode>) {
        let (sender, receiver) = watch::channel(initial);
        (Self { receiver }, sender)
    }
}

impl LeadershipQuery for WatchLeadership {
    fn mode(&self) -> DispatcherMode {
        *self.receiver.borrow()
    }
}
