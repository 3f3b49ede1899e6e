//! Snapshot transport abstraction for the MarketView viewer.

use async_trait::async_trait;
use crate::types::{SessionId, WireFrame};
use std::time::Duration;

/// Abstraction for the long-lived connection delivering server snapshots.
///
/// The viewer only ever consumes frames; connection management, framing and
/// reconnection belong to the implementation.
///
/// # Implementations
///
/// - **Production**: Wraps a WebSocket or similar stream
/// - **Simulation**: Virtual-clock channel with configurable jitter/loss
///
/// # Frame Flow
///
/// ```text
/// Server                     Transport                    Viewer
///   |                           |                           |
///   |-- state_update ---------->|                           |
///   |                           |-- [latency/jitter] ------>|
///   |                           |                           |-- recv() -> frame
/// ```
#[async_trait]
pub trait SnapshotTransport: Send + Sync + 'static {
    /// Receives the next frame.
    ///
    /// # Returns
    /// * `Some(frame)` - A frame was delivered
    /// * `None` - The stream was closed (shutdown)
    async fn recv(&self) -> Option<WireFrame>;

    /// Returns the identifier of the session this transport belongs to.
    fn session_id(&self) -> SessionId;
}

/// Fault injection for simulated transports.
pub trait TransportController: Send + Sync {
    /// Sets the base one-way latency.
    fn set_latency(&self, latency: Duration);

    /// Sets the maximum additional random delay per frame.
    fn set_jitter(&self, jitter: Duration);

    /// Sets the frame loss probability (0.0 - 1.0).
    fn set_loss(&self, loss_rate: f64);

    /// Holds back every frame sent during the next `duration`, then releases
    /// them together.
    fn blackout(&self, duration: Duration);

    /// Restores a clean link.
    fn heal(&self);
}
