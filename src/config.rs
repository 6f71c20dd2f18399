//! Bridge configuration.
//!
//! Everything has a sensible default: the companion process listens on a
//! well-known local port, and the reconnect policy (unbounded retries,
//! 1s initial delay capped at 5s, 10s connect timeout) matches what the
//! companion expects from its editor integrations. Values can come from a
//! TOML file and/or `DESKBRIDGE_*` environment variables; a missing or
//! malformed file degrades to defaults with a logged warning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 24337;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 5_000;
const DEFAULT_LIVENESS_POLL_MS: u64 = 1_000;
const DEFAULT_SOURCE_TYPE: &str = "deskbridge";

/// Connection supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Companion process host. Always local in practice.
    pub host: String,
    /// Companion process port.
    pub port: u16,
    /// Per-attempt connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Initial delay between reconnect attempts, milliseconds.
    pub reconnect_initial_ms: u64,
    /// Cap on the reconnect delay, milliseconds.
    pub reconnect_max_ms: u64,
    /// How often per-workspace tasks re-check registration liveness.
    pub liveness_poll_ms: u64,
    /// `sourceType` tag stamped on every outgoing message.
    pub source_type: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            liveness_poll_ms: DEFAULT_LIVENESS_POLL_MS,
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from a TOML file, falling back to defaults on any error.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable — using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file malformed — using defaults");
                Self::default()
            }
        }
    }

    /// Apply `DESKBRIDGE_HOST` / `DESKBRIDGE_PORT` / `DESKBRIDGE_SOURCE_TYPE`
    /// overrides. Unparsable values are warned about and skipped.
    pub fn apply_env(mut self) -> Self {
        if let Ok(host) = std::env::var("DESKBRIDGE_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("DESKBRIDGE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.port = p,
                Err(e) => warn!(value = %port, error = %e, "DESKBRIDGE_PORT is not a port — ignoring"),
            }
        }
        if let Ok(source_type) = std::env::var("DESKBRIDGE_SOURCE_TYPE") {
            if !source_type.is_empty() {
                self.source_type = source_type;
            }
        }
        self
    }

    /// WebSocket URL of the companion endpoint.
    pub fn endpoint_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }
}
