#![allow(dead_code)]
//! Shared test harness: an in-memory transport factory driving the
//! supervisor without a real companion process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use deskbridge::error::TransportError;
use deskbridge::transport::{Channel, ChannelDriver, TransportFactory};
use deskbridge::{BridgeConfig, ConnectionStatus, Supervisor, WorkspaceId};

/// How a [`MockFactory`] answers the next connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// Hand out a live in-memory channel.
    Accept,
    /// Transient failure (connection refused).
    Refuse,
    /// Fatal setup failure (invalid endpoint).
    Fatal,
}

/// In-memory transport factory. Each accepted connect produces a
/// [`ChannelDriver`] the test can pick up to play the companion process.
pub struct MockFactory {
    mode: Mutex<MockMode>,
    opens: AtomicUsize,
    drivers: Mutex<Vec<ChannelDriver>>,
}

impl MockFactory {
    pub fn new(mode: MockMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            opens: AtomicUsize::new(0),
            drivers: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock() = mode;
    }

    /// Total connect attempts seen so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection and return its driver.
    pub async fn wait_driver(&self) -> ChannelDriver {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(driver) = self.take_driver() {
                return driver;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for a connection"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn take_driver(&self) -> Option<ChannelDriver> {
        let mut drivers = self.drivers.lock();
        if drivers.is_empty() {
            None
        } else {
            Some(drivers.remove(0))
        }
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(&self) -> Result<Channel, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock() {
            MockMode::Refuse => Err(TransportError::Connect(anyhow::anyhow!(
                "connection refused"
            ))),
            MockMode::Fatal => Err(TransportError::Endpoint("bad endpoint".into())),
            MockMode::Accept => {
                let (channel, driver) = Channel::pair();
                self.drivers.lock().push(driver);
                Ok(channel)
            }
        }
    }
}

/// Short intervals so reconnect/teardown cycles settle in milliseconds.
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        liveness_poll_ms: 20,
        reconnect_initial_ms: 25,
        reconnect_max_ms: 60,
        connect_timeout_ms: 1_000,
        ..BridgeConfig::default()
    }
}

/// Receive the next wire frame from a driver and unwrap the
/// `{"event": "message", "data": ...}` envelope.
pub async fn recv_payload(driver: &mut ChannelDriver) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(3), driver.outbound.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("channel closed while waiting for a frame");
    let value: serde_json::Value = serde_json::from_str(&frame).expect("frame is not JSON");
    assert_eq!(value["event"], "message", "unexpected envelope: {value}");
    value["data"].clone()
}

/// Assert that no frame arrives within the given window.
pub async fn assert_no_frame(driver: &mut ChannelDriver, window: Duration) {
    tokio::time::sleep(window).await;
    match driver.outbound.try_recv() {
        Err(_) => {}
        Ok(frame) => panic!("expected no frame, got: {frame}"),
    }
}

/// Poll until the workspace reaches the wanted status.
pub async fn wait_status(supervisor: &Supervisor, id: &WorkspaceId, want: ConnectionStatus) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if supervisor.status(id) == want {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {want}; current status is {}",
            supervisor.status(id)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
