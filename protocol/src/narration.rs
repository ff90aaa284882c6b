use serde::Deserialize;
use serde::Serialize;

use crate::snapshot::FinalState;
use crate::snapshot::RosterEntry;
use crate::snapshot::Snapshot;

/// One unit of narration, conceptually tied to the snapshot at
/// `moment_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    pub moment_index: usize,
    /// Normalized map space, `0.0..=1.0` on both axes.
    pub focus_x: f64,
    pub focus_y: f64,
    pub zoom: f64,
    /// Markdown.
    pub narration: String,
    #[serde(default)]
    pub what_if_questions: Vec<String>,
}

/// Round metadata that accompanies a narration or chat request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundContext {
    pub map_name: String,
    pub attack_team: String,
    pub defense_team: String,
}

/// Body posted to the narration collaborator.
#[derive(Debug, Serialize)]
pub struct NarrationRequest<'a> {
    pub snapshots: &'a [Snapshot],
    pub final_state: &'a FinalState,
    pub map_name: &'a str,
    pub attack_team: &'a str,
    pub defense_team: &'a str,
    pub player_roster: &'a [RosterEntry],
}

impl<'a> NarrationRequest<'a> {
    pub fn new(
        snapshots: &'a [Snapshot],
        final_state: &'a FinalState,
        context: &'a RoundContext,
        player_roster: &'a [RosterEntry],
    ) -> Self {
        Self {
            snapshots,
            final_state,
            map_name: &context.map_name,
            attack_team: &context.attack_team,
            defense_team: &context.defense_team,
            player_roster,
        }
    }
}
