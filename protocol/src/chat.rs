use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::snapshot::FinalState;
use crate::snapshot::RosterEntry;
use crate::snapshot::SimulationEvent;
use crate::snapshot::Snapshot;

/// Replay state bundled with every chat request so the collaborator can
/// answer questions about "this moment".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationContext {
    pub snapshots: Vec<Snapshot>,
    pub final_state: FinalState,
    pub map_name: String,
    pub attack_team: String,
    pub defense_team: String,
    pub events: Vec<SimulationEvent>,
    pub player_roster: Vec<RosterEntry>,
    pub current_moment_index: Option<usize>,
    pub current_narration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_context: Option<Value>,
}

/// Body posted to the chat collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub map_context: Option<String>,
    pub team_context: Option<String>,
    pub use_tools: bool,
    /// Returned by the collaborator in a previous `done` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub simulation_context: SimulationContext,
}
