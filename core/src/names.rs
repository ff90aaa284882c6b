//! Player identifier to display name substitution.
//!
//! Snapshots after the first frequently omit names, so the mapping is
//! accumulated in an explicitly owned [`NameCache`] (one per round or chat
//! session, dropped on reset) and then frozen into a read-only
//! [`NameResolver`].

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::Captures;
use regex_lite::Regex;
use replaycast_protocol::RosterEntry;
use replaycast_protocol::Side;
use replaycast_protocol::Snapshot;

#[derive(Debug, Clone, Default)]
pub struct NameCache {
    names: HashMap<String, String>,
    sides: HashMap<String, Side>,
    /// Player ids in first-seen order.
    order: Vec<String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: &[Snapshot]) -> Self {
        let mut cache = Self::new();
        cache.absorb(snapshots);
        cache
    }

    /// Record every named player in `snapshots`. The first name seen for an
    /// id wins; later conflicting names are ignored.
    pub fn absorb(&mut self, snapshots: &[Snapshot]) {
        for player in snapshots.iter().flat_map(|s| s.players.iter()) {
            if !self.sides.contains_key(&player.player_id) {
                self.sides.insert(player.player_id.clone(), player.side);
                self.order.push(player.player_id.clone());
            }
            if let Some(name) = player.name.as_deref() {
                self.insert(&player.player_id, name);
            }
        }
    }

    /// Returns `false` when the id already had a name.
    pub fn insert(&mut self, player_id: &str, name: &str) -> bool {
        if player_id.is_empty() || name.is_empty() || self.names.contains_key(player_id) {
            return false;
        }
        self.names.insert(player_id.to_string(), name.to_string());
        true
    }

    pub fn get(&self, player_id: &str) -> Option<&str> {
        self.names.get(player_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.sides.clear();
        self.order.clear();
    }

    /// Players in first-seen order. Unnamed players fall back to their id.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.order
            .iter()
            .filter_map(|id| {
                let side = *self.sides.get(id)?;
                Some(RosterEntry {
                    player_id: id.clone(),
                    name: self.get(id).unwrap_or(id).to_string(),
                    side,
                })
            })
            .collect()
    }

    pub fn resolver(&self) -> NameResolver {
        NameResolver::new(self.names.clone())
    }
}

/// Frozen id to name substitution. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    pattern: Option<Regex>,
    names: Arc<HashMap<String, String>>,
}

impl NameResolver {
    /// Longer ids are tried first at every position, so an id that is a
    /// prefix of another (`p1` / `p10`) never corrupts the longer one.
    ///
    /// Display names are matched too and left as they are, so a name that
    /// contains a known id (`Grace` / `ace`) survives a second pass.
    pub fn new(names: HashMap<String, String>) -> Self {
        let ids: Vec<&str> = names
            .iter()
            .filter(|(id, name)| !id.is_empty() && id != name)
            .map(|(id, _)| id.as_str())
            .collect();

        let pattern = if ids.is_empty() {
            None
        } else {
            let mut tokens: Vec<&str> = ids
                .iter()
                .copied()
                .chain(names.values().map(String::as_str))
                .filter(|t| !t.is_empty())
                .collect();
            tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            tokens.dedup();

            let alternation = tokens
                .iter()
                .map(|id| regex_lite::escape(id))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&alternation) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(error = %e, "name pattern rejected, names left unresolved");
                    None
                }
            }
        };

        Self {
            pattern,
            names: Arc::new(names),
        }
    }

    pub fn resolve(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let id = &caps[0];
                self.names.get(id).cloned().unwrap_or_else(|| id.to_string())
            })
            .into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
    }
}
