//! The context bundle attached to every chat request.

use std::ops::Range;
use std::sync::Arc;

use replaycast_protocol::ChatRequest;
use replaycast_protocol::FinalState;
use replaycast_protocol::RosterEntry;
use replaycast_protocol::RoundContext;
use replaycast_protocol::SimulationContext;
use replaycast_protocol::SimulationEvent;
use replaycast_protocol::Snapshot;
use serde_json::Value;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcerptLimits {
    pub snapshots: usize,
    pub events: usize,
}

impl From<&EngineConfig> for ExcerptLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            snapshots: config.snapshot_excerpt_limit,
            events: config.event_excerpt_limit,
        }
    }
}

/// Everything the chat collaborator may want to know about the replay.
/// Large collections are shared, and only an excerpt is serialized.
#[derive(Debug, Clone, Default)]
pub struct ChatContextBundle {
    pub round: RoundContext,
    pub snapshots: Arc<[Snapshot]>,
    pub events: Arc<[SimulationEvent]>,
    pub final_state: FinalState,
    pub roster: Vec<RosterEntry>,
    pub current_index: Option<usize>,
    pub current_narration: Option<String>,
    pub match_context: Option<Value>,
}

impl ChatContextBundle {
    pub fn new(round: RoundContext) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<[Snapshot]>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_events(mut self, events: Arc<[SimulationEvent]>) -> Self {
        self.events = events;
        self
    }

    pub fn with_final_state(mut self, final_state: FinalState) -> Self {
        self.final_state = final_state;
        self
    }

    pub fn with_roster(mut self, roster: Vec<RosterEntry>) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_current(mut self, index: usize, narration: Option<String>) -> Self {
        self.current_index = Some(index);
        self.current_narration = narration;
        self
    }

    pub fn with_match_context(mut self, match_context: Value) -> Self {
        self.match_context = Some(match_context);
        self
    }

    pub fn to_request(
        &self,
        message: &str,
        session_id: Option<String>,
        limits: ExcerptLimits,
    ) -> ChatRequest {
        let window = snapshot_window(self.snapshots.len(), self.current_index, limits.snapshots);
        let until = self
            .current_index
            .and_then(|i| self.snapshots.get(i))
            .map(|s| s.timestamp);

        let map_context = (!self.round.map_name.is_empty()).then(|| self.round.map_name.clone());
        let team_context = (!self.round.attack_team.is_empty() || !self.round.defense_team.is_empty())
            .then(|| {
                format!(
                    "{} (attack) vs {} (defense)",
                    self.round.attack_team, self.round.defense_team
                )
            });

        ChatRequest {
            message: message.to_string(),
            map_context,
            team_context,
            use_tools: true,
            session_id,
            simulation_context: SimulationContext {
                snapshots: self.snapshots[window].to_vec(),
                final_state: self.final_state.clone(),
                map_name: self.round.map_name.clone(),
                attack_team: self.round.attack_team.clone(),
                defense_team: self.round.defense_team.clone(),
                events: event_excerpt(&self.events, until, limits.events),
                player_roster: self.roster.clone(),
                current_moment_index: self.current_index,
                current_narration: self.current_narration.clone(),
                match_context: self.match_context.clone(),
            },
        }
    }
}

/// At most `limit` consecutive snapshot indices, centred on `center`
/// (the first snapshot when there is no active index).
pub fn snapshot_window(len: usize, center: Option<usize>, limit: usize) -> Range<usize> {
    if len <= limit {
        return 0..len;
    }
    let center = center.unwrap_or(0).min(len - 1);
    let start = center.saturating_sub(limit / 2).min(len - limit);
    start..start + limit
}

/// The last `limit` events at or before `until_ms` (all events when there
/// is no active snapshot).
pub fn event_excerpt(
    events: &[SimulationEvent],
    until_ms: Option<u64>,
    limit: usize,
) -> Vec<SimulationEvent> {
    let visible = match until_ms {
        Some(until) => events.partition_point(|e| e.timestamp <= until),
        None => events.len(),
    };
    events[visible.saturating_sub(limit)..visible].to_vec()
}
