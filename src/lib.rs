// SPDX-License-Identifier: MIT
//! deskbridge — editor workspace context bridge.
//!
//! Keeps a local companion process informed about which files are being
//! worked on. The host editor registers each open workspace with the
//! [`Supervisor`], feeds it file open/close and rename notifications, and
//! observes per-workspace connection status; the supervisor owns one
//! auto-reconnecting channel per workspace to the companion's well-known
//! local endpoint and translates notifications into a two-message wire
//! protocol (`add-file` / `drop-file`, plus an `init` snapshot per
//! connect).
//!
//! ```rust,ignore
//! use deskbridge::{BridgeConfig, Supervisor, Workspace};
//!
//! let supervisor = Supervisor::new(BridgeConfig::default());
//! supervisor.start();
//!
//! let workspace = Workspace::new("/home/dev/project");
//! let id = workspace.id().clone();
//! supervisor.register_workspace(workspace);
//!
//! // Host editor callbacks:
//! supervisor.on_file_opened(&id, "/home/dev/project/src/main.rs".as_ref());
//!
//! // On editor shutdown:
//! supervisor.shutdown_all();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod rename;
pub mod status;
pub mod supervisor;
pub mod transport;
pub mod workspace;

pub use config::BridgeConfig;
pub use error::TransportError;
pub use protocol::{ContextFile, FileAction, FileMessage, InitMessage};
pub use status::{ConnectionStatus, StatusEvent};
pub use supervisor::Supervisor;
pub use workspace::{Workspace, WorkspaceId};
