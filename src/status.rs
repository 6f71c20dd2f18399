// SPDX-License-Identifier: MIT
//! Per-workspace connection status and the status board.
//!
//! The board is the single source of truth for every workspace's
//! [`ConnectionStatus`]: mutated only by that workspace's connection task
//! (plus the supervisor's explicit teardown paths), read by external
//! observers through [`StatusBoard::get`] and the status-event
//! subscription the host UI listens on.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::workspace::WorkspaceId;

/// Connection state of one workspace's channel to the companion process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Supervisor-level failure (fatal endpoint or setup error). Requires
    /// an explicit reconnect — ordinary connection refusals never land
    /// here.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Status-change notification delivered to host observers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub workspace: WorkspaceId,
    pub status: ConnectionStatus,
}

/// Thread-safe `workspace → status` map plus a broadcast of changes.
///
/// Unknown workspaces read as `Disconnected`. A `set` that does not change
/// the stored value publishes nothing.
pub struct StatusBoard {
    statuses: RwLock<HashMap<WorkspaceId, ConnectionStatus>>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            statuses: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Record a status and notify observers when it actually changed.
    pub fn set(&self, workspace: &WorkspaceId, status: ConnectionStatus) {
        {
            let mut map = self.statuses.write();
            if map.get(workspace) == Some(&status) {
                return;
            }
            map.insert(workspace.clone(), status);
        }
        info!(workspace = %workspace, status = %status, "connection status changed");
        // Ignore errors — no subscribers is fine.
        let _ = self.events.send(StatusEvent {
            workspace: workspace.clone(),
            status,
        });
    }

    /// Current status; `Disconnected` when the workspace is unknown.
    pub fn get(&self, workspace: &WorkspaceId) -> ConnectionStatus {
        self.statuses
            .read()
            .get(workspace)
            .copied()
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Forget a workspace entirely (post-deregistration). Subsequent reads
    /// default to `Disconnected`.
    pub fn remove(&self, workspace: &WorkspaceId) {
        self.statuses.write().remove(workspace);
    }

    /// Drop all recorded statuses.
    pub fn clear(&self) {
        self.statuses.write().clear();
    }

    /// Subscribe to status-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    #[test]
    fn unknown_workspace_reads_disconnected() {
        let board = StatusBoard::new();
        let ws = Workspace::new("/tmp/p");
        assert_eq!(board.get(ws.id()), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn set_publishes_only_on_change() {
        let board = StatusBoard::new();
        let ws = Workspace::new("/tmp/p");
        let mut rx = board.subscribe();

        board.set(ws.id(), ConnectionStatus::Connecting);
        board.set(ws.id(), ConnectionStatus::Connecting); // no-op
        board.set(ws.id(), ConnectionStatus::Connected);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, ConnectionStatus::Connecting);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, ConnectionStatus::Connected);
        assert!(rx.try_recv().is_err(), "duplicate set must not publish");
    }

    #[test]
    fn remove_resets_to_default() {
        let board = StatusBoard::new();
        let ws = Workspace::new("/tmp/p");
        board.set(ws.id(), ConnectionStatus::Connected);
        board.remove(ws.id());
        assert_eq!(board.get(ws.id()), ConnectionStatus::Disconnected);
    }
}
