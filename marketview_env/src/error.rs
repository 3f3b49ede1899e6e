//! Error types for the MarketView environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The snapshot stream was closed by the producer
    #[error("Transport closed")]
    TransportClosed,

    /// Transport-level failure (socket error, buffer full, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    Context(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }
}
