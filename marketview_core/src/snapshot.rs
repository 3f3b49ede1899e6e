//! Snapshot data model and wire decoding.
//!
//! The simulation server pushes JSON envelopes of the form
//!
//! ```text
//! { "type": "state_update",
//!   "payload": { "tick": 42, "agents": [...], "metrics": {...}, "bounds": [1000, 1000] } }
//! ```
//!
//! Envelopes are decoded into [`ServerMessage`]. Only `state_update` carries a
//! [`Snapshot`]; every other kind decodes to [`ServerMessage::Unknown`] and is
//! ignored by the viewer. Unknown fields are ignored everywhere so newer
//! servers stay readable.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::warn;

/// Message kind carrying a full snapshot.
pub const STATE_UPDATE: &str = "state_update";

// ============================================================================
// ERRORS
// ============================================================================

/// Reasons a server message is rejected before it reaches the buffer.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or required fields missing / mistyped
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// A snapshot-carrying kind arrived without a payload
    #[error("Message of kind '{0}' has no payload")]
    MissingPayload(String),

    /// Entity position is NaN or infinite
    #[error("Entity {id} has a non-finite coordinate")]
    NonFiniteCoordinate { id: u64 },

    /// Entity trust is NaN or infinite
    #[error("Entity {id} has a non-finite trust value")]
    NonFiniteTrust { id: u64 },

    /// The same id appears twice in one snapshot
    #[error("Entity {id} appears more than once in snapshot")]
    DuplicateEntity { id: u64 },
}

// ============================================================================
// ENTITY
// ============================================================================

/// One agent as reported by the server.
///
/// `id` is stable across snapshots; every other field may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: u64,

    /// Position in simulation space
    pub x: f64,
    pub y: f64,

    /// Trust score, nominally in [0, 1]
    pub trust: f64,

    /// Completed trades, monotonically non-decreasing per id
    pub trade_count: u64,

    #[serde(default)]
    pub group_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_quota: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_possessed: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_needed: Option<u8>,

    #[serde(default)]
    pub is_custom: bool,
}

impl Entity {
    /// Creates an entity in group 0 with no optional fields.
    pub fn new(id: u64, x: f64, y: f64, trust: f64, trade_count: u64) -> Self {
        Self {
            id,
            x,
            y,
            trust,
            trade_count,
            group_id: 0,
            vx: None,
            vy: None,
            trust_quota: None,
            skill_possessed: None,
            skill_needed: None,
            is_custom: false,
        }
    }

    /// Sets the group id.
    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = group_id;
        self
    }

    /// Position in simulation space.
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

// ============================================================================
// METRICS & GROUPS
// ============================================================================

/// Aggregate metrics across all agents. Passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSet {
    pub avg_trust: f64,
    pub gini_coefficient: f64,
    pub trade_success_rate: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_collisions: Option<u64>,
}

/// Per-group aggregate metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMetrics {
    pub avg_trust: f64,
    pub gini_coefficient: f64,
    pub agent_count: u64,
}

/// Per-group simulation parameters, as configured on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupConfig {
    pub trust_quota: f64,
    pub trust_decay: f64,
    pub global_alpha: f64,
    pub global_beta: f64,
    pub speed_multiplier: f64,
}

/// Metadata for one agent group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupSummary {
    pub group_id: i64,
    pub metrics: GroupMetrics,
    pub config: GroupConfig,
    pub agent_count: u64,
}

// ============================================================================
// BOUNDS
// ============================================================================

/// Logical extent of the simulation space, sent on the wire as `[w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl From<(f64, f64)> for Bounds {
    fn from((width, height): (f64, f64)) -> Self {
        Self { width, height }
    }
}

impl From<Bounds> for (f64, f64) {
    fn from(bounds: Bounds) -> Self {
        (bounds.width, bounds.height)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One immutable, server-produced description of every tracked agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: u64,

    #[serde(rename = "agents", alias = "entities")]
    pub entities: Vec<Entity>,

    pub metrics: MetricSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_group_id: Option<i64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<i64, GroupSummary>,
}

impl Snapshot {
    /// Creates a snapshot without bounds or group metadata.
    pub fn new(tick: u64, entities: Vec<Entity>, metrics: MetricSet) -> Self {
        Self {
            tick,
            entities,
            metrics,
            bounds: None,
            active_group_id: None,
            groups: BTreeMap::new(),
        }
    }

    /// Declares logical bounds.
    pub fn with_bounds(mut self, width: f64, height: f64) -> Self {
        self.bounds = Some(Bounds::new(width, height));
        self
    }

    /// Looks up an entity by id.
    pub fn entity(&self, id: u64) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Checks the invariants the viewer relies on.
    ///
    /// Unusable bounds are dropped (the snapshot is then drawn unscaled)
    /// instead of rejecting the whole snapshot.
    pub fn validate(&mut self) -> Result<(), DecodeError> {
        let mut seen = HashSet::with_capacity(self.entities.len());
        for entity in &self.entities {
            if !entity.x.is_finite() || !entity.y.is_finite() {
                return Err(DecodeError::NonFiniteCoordinate { id: entity.id });
            }
            if !entity.trust.is_finite() {
                return Err(DecodeError::NonFiniteTrust { id: entity.id });
            }
            if !seen.insert(entity.id) {
                return Err(DecodeError::DuplicateEntity { id: entity.id });
            }
        }

        if let Some(bounds) = self.bounds {
            if !bounds.is_valid() {
                warn!(
                    "Snapshot {} declares unusable bounds {}x{}, ignoring them",
                    self.tick, bounds.width, bounds.height
                );
                self.bounds = None;
            }
        }

        Ok(())
    }
}

// ============================================================================
// SERVER MESSAGE
// ============================================================================

/// Decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Full state snapshot
    StateUpdate(Snapshot),

    /// Any kind this viewer does not understand (no-op)
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl ServerMessage {
    /// Decodes a raw envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Self::from_envelope(envelope)
    }

    /// Decodes an envelope from text.
    pub fn decode_str(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        if envelope.kind != STATE_UPDATE {
            return Ok(ServerMessage::Unknown(envelope.kind));
        }
        let payload = envelope
            .payload
            .ok_or_else(|| DecodeError::MissingPayload(envelope.kind.clone()))?;
        Ok(ServerMessage::StateUpdate(serde_json::from_value(payload)?))
    }

    /// Encodes the message as an envelope (used by test producers).
    pub fn to_json(&self) -> Result<String, DecodeError> {
        let value = match self {
            ServerMessage::StateUpdate(snapshot) => serde_json::json!({
                "type": STATE_UPDATE,
                "payload": snapshot,
            }),
            ServerMessage::Unknown(kind) => serde_json::json!({ "type": kind }),
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// Returns the wire kind.
    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::StateUpdate(_) => STATE_UPDATE,
            ServerMessage::Unknown(kind) => kind,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_PUSH: &str = r#"{
        "type": "state_update",
        "payload": {
            "tick": 17,
            "activeGroupId": 0,
            "groups": {
                "0": {
                    "groupId": 0,
                    "metrics": {"avgTrust": 0.52, "giniCoefficient": 0.1, "agentCount": 2},
                    "config": {"trustQuota": 0.5, "trustDecay": 0.05, "globalAlpha": 0.1,
                               "globalBeta": 0.05, "speedMultiplier": 1.0},
                    "agentCount": 2
                }
            },
            "agents": [
                {"id": 0, "x": 10.0, "y": 20.0, "vx": 1.0, "vy": -1.0, "trust": 0.4,
                 "trustQuota": 0.5, "skillPossessed": 2, "skillNeeded": 5,
                 "tradeCount": 3, "isCustom": false, "groupId": 0},
                {"id": 1, "x": 500.0, "y": 600.0, "vx": 0.0, "vy": 0.0, "trust": 0.64,
                 "trustQuota": 0.5, "skillPossessed": 1, "skillNeeded": 2,
                 "tradeCount": 0, "isCustom": true, "groupId": 0}
            ],
            "metrics": {"avgTrust": 0.52, "giniCoefficient": 0.1, "tradeSuccessRate": 0.25,
                        "tradeCount": 4, "totalCollisions": 16},
            "bounds": [1000.0, 1000.0]
        }
    }"#;

    #[test]
    fn test_decode_server_push() {
        let message = ServerMessage::decode_str(SERVER_PUSH).unwrap();
        let ServerMessage::StateUpdate(snapshot) = message else {
            panic!("expected a state update");
        };

        assert_eq!(snapshot.tick, 17);
        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.bounds, Some(Bounds::new(1000.0, 1000.0)));
        assert_eq!(snapshot.active_group_id, Some(0));
        assert_eq!(snapshot.groups[&0].agent_count, 2);
        assert_eq!(snapshot.groups[&0].config.trust_quota, 0.5);
        assert_eq!(snapshot.metrics.total_collisions, Some(16));

        let first = &snapshot.entities[0];
        assert_eq!(first.trade_count, 3);
        assert_eq!(first.skill_needed, Some(5));
        assert!(snapshot.entities[1].is_custom);
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let message = ServerMessage::decode_str(r#"{"type": "report_ready", "payload": {"x": 1}}"#).unwrap();
        assert_eq!(message, ServerMessage::Unknown("report_ready".to_string()));
        assert_eq!(message.kind(), "report_ready");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let text = r#"{"type": "state_update", "futureField": true, "payload": {
            "tick": 1, "agents": [{"id": 1, "x": 10, "y": 10, "trust": 0.5, "tradeCount": 0, "mood": "ok"}],
            "metrics": {"avgTrust": 0.5, "giniCoefficient": 0.0, "tradeSuccessRate": 0.0, "extra": 3},
            "weather": "sunny"}}"#;
        let ServerMessage::StateUpdate(snapshot) = ServerMessage::decode_str(text).unwrap() else {
            panic!("expected a state update");
        };
        assert_eq!(snapshot.entities[0].group_id, 0);
        assert!(snapshot.bounds.is_none());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        // No tradeCount
        let text = r#"{"type": "state_update", "payload": {
            "tick": 1, "agents": [{"id": 1, "x": 10, "y": 10, "trust": 0.5}],
            "metrics": {"avgTrust": 0.5, "giniCoefficient": 0.0, "tradeSuccessRate": 0.0}}}"#;
        assert!(matches!(ServerMessage::decode_str(text), Err(DecodeError::Json(_))));

        let no_payload = r#"{"type": "state_update"}"#;
        assert!(matches!(
            ServerMessage::decode_str(no_payload),
            Err(DecodeError::MissingPayload(_))
        ));

        assert!(ServerMessage::decode(b"not json").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_nan() {
        let metrics = MetricSet::default();
        let mut dup = Snapshot::new(1, vec![Entity::new(3, 0.0, 0.0, 0.5, 0), Entity::new(3, 1.0, 1.0, 0.5, 0)], metrics.clone());
        assert!(matches!(dup.validate(), Err(DecodeError::DuplicateEntity { id: 3 })));

        let mut nan = Snapshot::new(1, vec![Entity::new(4, f64::NAN, 0.0, 0.5, 0)], metrics.clone());
        assert!(matches!(nan.validate(), Err(DecodeError::NonFiniteCoordinate { id: 4 })));

        let mut bad_trust = Snapshot::new(1, vec![Entity::new(5, 0.0, 0.0, f64::INFINITY, 0)], metrics);
        assert!(matches!(bad_trust.validate(), Err(DecodeError::NonFiniteTrust { id: 5 })));
    }

    #[test]
    fn test_validate_drops_degenerate_bounds() {
        let mut snapshot = Snapshot::new(1, vec![], MetricSet::default()).with_bounds(0.0, 100.0);
        snapshot.validate().unwrap();
        assert!(snapshot.bounds.is_none());
    }

    #[test]
    fn test_encoded_update_decodes_back() {
        let snapshot = Snapshot::new(9, vec![Entity::new(1, 1.0, 2.0, 0.3, 1).with_group(2)], MetricSet::default())
            .with_bounds(640.0, 480.0);
        let text = ServerMessage::StateUpdate(snapshot.clone()).to_json().unwrap();
        assert!(text.contains("\"agents\""));
        assert!(text.contains("\"tradeCount\":1"));
        assert_eq!(ServerMessage::decode_str(&text).unwrap(), ServerMessage::StateUpdate(snapshot));
    }
}
