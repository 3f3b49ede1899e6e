//! Common types for the MarketView environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one viewer session (one server connection).
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One framed message as delivered by the transport.
///
/// The payload is opaque text/bytes; decoding happens in the viewer core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    /// Raw message bytes (UTF-8 JSON in practice)
    pub payload: Vec<u8>,

    /// Producer's send time in milliseconds
    pub sent_ms: u64,

    /// Per-connection delivery sequence number
    pub sequence: u64,
}

impl WireFrame {
    /// Creates a new frame from payload bytes.
    pub fn new(payload: Vec<u8>, sent_ms: u64, sequence: u64) -> Self {
        Self {
            payload,
            sent_ms,
            sequence,
        }
    }

    /// Creates a frame from a text message.
    pub fn text(text: impl Into<String>, sent_ms: u64, sequence: u64) -> Self {
        Self::new(text.into().into_bytes(), sent_ms, sequence)
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_seed_is_deterministic() {
        assert_eq!(SessionId::from_seed(7), SessionId::from_seed(7));
        assert_ne!(SessionId::from_seed(7), SessionId::from_seed(8));
    }

    #[test]
    fn test_wire_frame_text() {
        let frame = WireFrame::text("{}", 10, 1);
        assert_eq!(frame.size(), 2);
        assert_eq!(frame.sequence, 1);
    }
}
