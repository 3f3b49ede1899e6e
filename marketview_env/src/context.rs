//! Core environment context trait for the MarketView viewer.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the host so that the render loop can run
/// both against a real display clock (tokio) and a virtual clock (simulation).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
///
/// # Determinism
///
/// For DST, all methods that would normally introduce non-determinism
/// (time, scheduling) are controlled by the implementation.
#[async_trait]
pub trait ViewContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Flash animations and frame-time smoothing are measured against this.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns a handle that can cancel it.
    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}

/// Handle to a task spawned through a [`ViewContext`].
///
/// Dropping the handle detaches the task; call [`TaskHandle::abort`] to
/// cancel it at its next suspension point.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Wraps a tokio join handle.
    pub fn new(name: &str, inner: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            inner,
        }
    }

    /// Returns the name the task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the task. Idempotent.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Returns true once the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}
