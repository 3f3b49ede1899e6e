//! Error types for the simulation harness.

use marketview_core::{DecodeError, SurfaceError};
use marketview_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// A feed snapshot could not be encoded
    #[error("Encoding failed: {0}")]
    Encode(#[from] DecodeError),

    /// Export file could not be written
    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("Export serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The simulated link refused a frame
    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("Render failed: {0}")]
    Render(#[from] SurfaceError),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}
