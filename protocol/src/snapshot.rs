use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Attack,
    Defense,
}

/// One player inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player_id: String,
    /// Later snapshots frequently omit the display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
    pub is_alive: bool,
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_spike: Option<bool>,
}

/// Immutable, server-authored state sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Milliseconds from round start.
    pub timestamp: u64,
    pub phase: String,
    #[serde(default)]
    pub players: Vec<PlayerState>,
}

impl Snapshot {
    pub fn player(&self, player_id: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.player_id == player_id)
    }
}

/// Outcome of the simulated round. Only the winner is interpreted; the
/// remaining fields are forwarded to collaborators untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A simulation event (kill, plant, ability use...) as produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: String,
    pub name: String,
    pub side: Side,
}
