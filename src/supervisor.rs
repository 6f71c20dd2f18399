// SPDX-License-Identifier: MIT
//! Connection registry / supervisor.
//!
//! Owns the set of active workspace connections: creates one connection
//! task per registered workspace, routes outbound messages to the right
//! connection by workspace identity, maintains the per-workspace open-file
//! set, and propagates status changes to observers.
//!
//! The registry itself never touches a live socket — each workspace's
//! transport state belongs to that workspace's background task, and the
//! maps here hold only handles. Registry bookkeeping is synchronous and
//! never held across an await.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::connection::{self, Connection, TaskContext};
use crate::paths::{self, WorkspaceScope};
use crate::protocol::FileMessage;
use crate::rename;
use crate::status::{ConnectionStatus, StatusBoard, StatusEvent};
use crate::transport::{TransportFactory, WsFactory};
use crate::workspace::{Workspace, WorkspaceId};

struct WorkspaceEntry {
    conn: Arc<Connection>,
    scope: Arc<WorkspaceScope>,
    /// Absolute paths of files currently open in the host editor,
    /// maintained from the intake calls. Filtered at snapshot time, not
    /// at insertion.
    open_files: Arc<RwLock<HashSet<PathBuf>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// The per-workspace connection supervisor.
///
/// The host registers a workspace when it opens, feeds file open/close and
/// rename notifications through the intake calls, and deregisters it when
/// it closes. Everything else — connecting, reconnecting, snapshotting,
/// filtering — happens here.
pub struct Supervisor {
    config: Arc<BridgeConfig>,
    factory: Arc<dyn TransportFactory>,
    status: Arc<StatusBoard>,
    running: Arc<AtomicBool>,
    runtime: RwLock<Option<tokio::runtime::Runtime>>,
    entries: RwLock<HashMap<WorkspaceId, WorkspaceEntry>>,
}

impl Supervisor {
    /// Supervisor speaking to the companion's well-known local endpoint.
    pub fn new(config: BridgeConfig) -> Self {
        let url = config.endpoint_url();
        Self::with_factory(config, Arc::new(WsFactory::new(url)))
    }

    /// Supervisor with a custom transport (in-memory transports, tests).
    pub fn with_factory(config: BridgeConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            status: Arc::new(StatusBoard::new()),
            running: Arc::new(AtomicBool::new(false)),
            runtime: RwLock::new(None),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Start the supervisor's background execution context. Idempotent.
    ///
    /// Must be called before any workspace registration; registrations
    /// while stopped are ignored with a warning. If the runtime cannot be
    /// allocated, later registrations surface `Error` status instead of
    /// connecting — an explicit reconnect retries after the condition is
    /// fixed.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("supervisor already started");
            return;
        }
        info!("starting workspace connection supervisor");
        let mut slot = self.runtime.write();
        if slot.is_none() {
            match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("deskbridge")
                .enable_all()
                .build()
            {
                Ok(rt) => *slot = Some(rt),
                Err(e) => {
                    error!(
                        error = %e,
                        "failed to allocate background runtime — workspaces will report error status"
                    );
                }
            }
        }
    }

    /// `true` between `start()` and `shutdown_all()`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Workspace lifecycle ───────────────────────────────────────────────

    /// Register a workspace and initiate its connection. Registering an
    /// already-registered workspace is a no-op (logged and ignored, never
    /// a replacement).
    pub fn register_workspace(&self, workspace: Workspace) {
        if !self.is_running() {
            warn!(
                workspace = %workspace.name(),
                "cannot register workspace — supervisor is not running"
            );
            return;
        }

        let id = workspace.id().clone();
        if self.entries.read().contains_key(&id) {
            info!(workspace = %workspace.name(), "workspace already registered — ignoring");
            return;
        }

        // Scope construction reads .gitignore from disk — do it before
        // taking the write lock.
        let workspace = Arc::new(workspace);
        let scope = Arc::new(WorkspaceScope::new(workspace.base_path()));
        let conn = Connection::new(Arc::clone(&workspace), Arc::clone(&self.status));
        let entry = WorkspaceEntry {
            conn: Arc::clone(&conn),
            scope,
            open_files: Arc::new(RwLock::new(HashSet::new())),
            task: Mutex::new(None),
        };

        {
            let mut entries = self.entries.write();
            if entries.contains_key(&id) {
                info!(workspace = %workspace.name(), "workspace already registered — ignoring");
                conn.mark_deregistered();
                return;
            }
            entries.insert(id.clone(), entry);
        }

        // Initial status before the connect attempt.
        self.status.set(&id, ConnectionStatus::Disconnected);
        info!(workspace = %workspace.name(), base = %workspace.base_path().display(), "workspace registered");
        self.spawn_connection(&id);
    }

    /// Tear down a workspace's connection and forget all its state.
    pub fn deregister_workspace(&self, id: &WorkspaceId) {
        let Some(entry) = self.entries.write().remove(id) else {
            debug!(workspace = %id, "deregister for unknown workspace — ignoring");
            return;
        };
        info!(workspace = %entry.conn.workspace().name(), "deregistering workspace");
        entry.conn.mark_deregistered();
        entry.conn.pause_connect();
        entry.conn.detach_writer();
        // Final status publication, then forget — later reads default to
        // Disconnected.
        self.status.set(id, ConnectionStatus::Disconnected);
        self.status.remove(id);
    }

    /// Explicitly disconnect a workspace. Its connection will not
    /// reconnect on its own afterward; use [`Supervisor::reconnect`].
    pub fn disconnect(&self, id: &WorkspaceId) {
        let entries = self.entries.read();
        let Some(entry) = entries.get(id) else {
            warn!(workspace = %id, "disconnect for unregistered workspace — ignoring");
            return;
        };
        info!(workspace = %entry.conn.workspace().name(), "explicit disconnect");
        entry.conn.pause_connect();
        entry.conn.detach_writer();
        self.status.set(id, ConnectionStatus::Disconnected);
    }

    /// Explicit disconnect followed by a fresh connect cycle — the
    /// user-triggered retry after `Error` or `Disconnected`.
    pub fn reconnect(&self, id: &WorkspaceId) {
        let respawn = {
            let entries = self.entries.read();
            let Some(entry) = entries.get(id) else {
                warn!(workspace = %id, "reconnect for unregistered workspace — ignoring");
                return;
            };
            info!(workspace = %entry.conn.workspace().name(), "explicit reconnect");
            entry.conn.request_restart();
            entry.conn.detach_writer();
            entry.conn.resume_connect();
            self.status.set(id, ConnectionStatus::Connecting);
            let finished = entry
                .task
                .lock()
                .as_ref()
                .map(|t| t.is_finished())
                .unwrap_or(true);
            finished
        };
        if respawn {
            self.spawn_connection(id);
        }
    }

    /// Current status; `Disconnected` for unregistered workspaces.
    pub fn status(&self, id: &WorkspaceId) -> ConnectionStatus {
        self.status.get(id)
    }

    /// Subscribe to status-change events (for the host's status widget).
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    // ── Event intake ──────────────────────────────────────────────────────

    /// A file was opened in the host editor.
    pub fn on_file_opened(&self, id: &WorkspaceId, abs_path: &Path) {
        if !self.is_running() {
            return;
        }
        let Some((scope, open_files)) = self.lookup(id) else {
            return;
        };
        open_files.write().insert(abs_path.to_path_buf());

        let Some(rel) = scope.admissible(abs_path) else {
            return;
        };
        self.route_file_message(FileMessage::add(
            rel,
            scope.base_dir(),
            self.config.source_type.clone(),
        ));
    }

    /// A file was closed in the host editor.
    pub fn on_file_closed(&self, id: &WorkspaceId, abs_path: &Path) {
        if !self.is_running() {
            return;
        }
        let Some((scope, open_files)) = self.lookup(id) else {
            return;
        };
        open_files.write().remove(abs_path);

        let Some(rel) = scope.admissible(abs_path) else {
            return;
        };
        self.route_file_message(FileMessage::drop(
            rel,
            scope.base_dir(),
            self.config.source_type.clone(),
        ));
    }

    /// A file was renamed or moved. Open files are re-tracked under their
    /// new path; the diff engine decides what (if anything) to emit.
    pub fn on_path_changed(&self, id: &WorkspaceId, old_abs: &Path, new_abs: &Path) {
        if !self.is_running() {
            return;
        }
        let Some((scope, open_files)) = self.lookup(id) else {
            return;
        };

        let file_open = {
            let mut set = open_files.write();
            if set.remove(old_abs) {
                set.insert(new_abs.to_path_buf());
                true
            } else {
                set.contains(new_abs)
            }
        };

        for msg in rename::plan_path_change(
            &scope,
            &self.config.source_type,
            file_open,
            old_abs,
            new_abs,
        ) {
            self.route_file_message(msg);
        }
    }

    /// Host-triggered context drop (context-menu action): force a
    /// `drop-file` for a file or directory regardless of open state.
    pub fn drop_context_path(&self, id: &WorkspaceId, abs_path: &Path) {
        if !self.is_running() {
            return;
        }
        let Some((scope, _)) = self.lookup(id) else {
            warn!(workspace = %id, "context drop for unregistered workspace — ignoring");
            return;
        };
        if !scope.contains(abs_path) {
            warn!(
                path = %abs_path.display(),
                base = %scope.base_dir(),
                "context drop outside workspace — skipping"
            );
            return;
        }
        let Some(rel) = scope.relative(abs_path) else {
            warn!(path = %abs_path.display(), "context drop could not be relativized — skipping");
            return;
        };
        self.route_file_message(FileMessage::drop(
            rel,
            scope.base_dir(),
            self.config.source_type.clone(),
        ));
    }

    /// Route a message to the workspace whose root equals the message's
    /// `baseDir`, normalizing separators for the wire on the way out.
    /// Unroutable messages are dropped with a warning.
    pub fn route_file_message(&self, message: FileMessage) {
        if !self.is_running() {
            debug!(action = %message.action, "supervisor not running — dropping message");
            return;
        }
        let conn = {
            let entries = self.entries.read();
            entries
                .values()
                .find(|e| e.scope.base_dir() == message.base_dir)
                .map(|e| Arc::clone(&e.conn))
        };
        let Some(conn) = conn else {
            warn!(
                base_dir = %message.base_dir,
                action = %message.action,
                "no workspace for baseDir — dropping message"
            );
            return;
        };
        let wire = message.for_wire(paths::host_separator());
        let what = wire.action.to_string();
        conn.send_payload(&wire, &what);
    }

    // ── Shutdown ──────────────────────────────────────────────────────────

    /// Disconnect every workspace, clear all state, and stop the
    /// background execution context. Safe to call repeatedly.
    pub fn shutdown_all(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("supervisor already stopped");
            return;
        }
        info!("stopping supervisor and disconnecting all workspaces");

        let drained: Vec<(WorkspaceId, WorkspaceEntry)> =
            self.entries.write().drain().collect();
        for (id, entry) in drained {
            entry.conn.mark_deregistered();
            entry.conn.pause_connect();
            entry.conn.detach_writer();
            self.status.set(&id, ConnectionStatus::Disconnected);
        }
        self.status.clear();

        if let Some(rt) = self.runtime.write().take() {
            rt.shutdown_background();
        }
        info!("supervisor stopped");
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn lookup(
        &self,
        id: &WorkspaceId,
    ) -> Option<(Arc<WorkspaceScope>, Arc<RwLock<HashSet<PathBuf>>>)> {
        let entries = self.entries.read();
        match entries.get(id) {
            Some(entry) => Some((Arc::clone(&entry.scope), Arc::clone(&entry.open_files))),
            None => {
                debug!(workspace = %id, "event for unregistered workspace — ignoring");
                None
            }
        }
    }

    fn spawn_connection(&self, id: &WorkspaceId) {
        let entries = self.entries.read();
        let Some(entry) = entries.get(id) else {
            return;
        };
        let ctx = TaskContext {
            conn: Arc::clone(&entry.conn),
            supervisor_running: Arc::clone(&self.running),
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            scope: Arc::clone(&entry.scope),
            open_files: Arc::clone(&entry.open_files),
        };
        let runtime = self.runtime.read();
        match runtime.as_ref() {
            Some(rt) => {
                let handle = rt.spawn(connection::run(ctx));
                *entry.task.lock() = Some(handle);
            }
            None => {
                error!(
                    workspace = %entry.conn.workspace().name(),
                    "no background runtime — marking workspace errored"
                );
                self.status.set(id, ConnectionStatus::Error);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // shutdown_background never blocks, so dropping a supervisor from
        // inside an async context is safe even without shutdown_all().
        if let Some(rt) = self.runtime.get_mut().take() {
            rt.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_disconnected_for_unregistered() {
        let supervisor = Supervisor::new(BridgeConfig::default());
        let ws = Workspace::new("/tmp/never-registered");
        assert_eq!(supervisor.status(ws.id()), ConnectionStatus::Disconnected);
    }

    #[test]
    fn register_before_start_is_ignored() {
        let supervisor = Supervisor::new(BridgeConfig::default());
        let ws = Workspace::new("/tmp/project");
        let id = ws.id().clone();
        supervisor.register_workspace(ws);
        assert!(supervisor.entries.read().is_empty());
        assert_eq!(supervisor.status(&id), ConnectionStatus::Disconnected);
    }

    #[test]
    fn shutdown_before_start_is_a_safe_noop() {
        let supervisor = Supervisor::new(BridgeConfig::default());
        supervisor.shutdown_all();
        supervisor.shutdown_all();
        assert!(!supervisor.is_running());
    }
}
