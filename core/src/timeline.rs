//! Reconciliation of the fixed snapshot sequence with streamed moments.

use std::sync::Arc;

use replaycast_protocol::Moment;
use replaycast_protocol::Snapshot;
use serde::Serialize;

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStatus {
    /// No build has been started.
    Idle,
    /// The narration stream is open; moments may still arrive.
    Loading,
    /// `done` arrived and the moment list was reconciled and frozen.
    Ready,
    /// The stream failed; the partial moment list is kept, unreconciled.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub received: usize,
    pub snapshots: usize,
    pub padded: usize,
    pub truncated: usize,
}

/// Align `moments` to exactly `snapshot_count` entries.
///
/// Excess trailing moments are dropped. A short list is padded with clones
/// of its last moment whose follow-up questions are cleared, since a padded
/// moment must not invite further exploration. An empty list stays empty.
pub fn reconcile(mut moments: Vec<Moment>, snapshot_count: usize) -> (Vec<Moment>, ReconcileReport) {
    let received = moments.len();
    let mut report = ReconcileReport {
        received,
        snapshots: snapshot_count,
        padded: 0,
        truncated: 0,
    };

    if received > snapshot_count {
        moments.truncate(snapshot_count);
        report.truncated = received - snapshot_count;
    } else if let Some(last) = moments.last() {
        let mut pad = last.clone();
        pad.what_if_questions.clear();
        report.padded = snapshot_count - received;
        moments.resize(snapshot_count, pad);
    }

    (moments, report)
}

/// Narration state for one view. The moment list is owned here and only
/// mutated by the narration stream handlers; callers get copies.
#[derive(Debug)]
pub struct Timeline {
    snapshots: Arc<[Snapshot]>,
    moments: Vec<Moment>,
    status: NarrationStatus,
    error: Option<String>,
}

impl Timeline {
    pub fn new(snapshots: Arc<[Snapshot]>) -> Self {
        Self {
            snapshots,
            moments: Vec::new(),
            status: NarrationStatus::Idle,
            error: None,
        }
    }

    pub fn snapshots(&self) -> &Arc<[Snapshot]> {
        &self.snapshots
    }

    pub fn snapshot_at(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn status(&self) -> NarrationStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Start accepting moments. A finished or failed timeline may be
    /// rebuilt; its previous moments are discarded.
    pub fn begin_loading(&mut self) -> Result<(), StateError> {
        if self.status == NarrationStatus::Loading {
            return Err(StateError::BuildInProgress);
        }
        self.moments.clear();
        self.error = None;
        self.status = NarrationStatus::Loading;
        Ok(())
    }

    /// Append in arrival order. Returns `false` once the list is frozen.
    pub fn push_moment(&mut self, moment: Moment) -> bool {
        if self.status != NarrationStatus::Loading {
            tracing::warn!(
                moment_index = moment.moment_index,
                "moment arrived after narration closed, ignoring"
            );
            return false;
        }
        self.moments.push(moment);
        true
    }

    pub fn complete(&mut self) -> Option<ReconcileReport> {
        if self.status != NarrationStatus::Loading {
            return None;
        }
        let (moments, report) = reconcile(std::mem::take(&mut self.moments), self.snapshots.len());
        tracing::debug!(
            received = report.received,
            snapshots = report.snapshots,
            padded = report.padded,
            truncated = report.truncated,
            "narration reconciled"
        );
        self.moments = moments;
        self.status = NarrationStatus::Ready;
        Some(report)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status != NarrationStatus::Loading {
            return false;
        }
        self.error = Some(message.into());
        self.status = NarrationStatus::Failed;
        true
    }

    /// Partial results are visible while loading.
    pub fn moment_at(&self, index: usize) -> Option<&Moment> {
        self.moments.get(index)
    }

    pub fn moments(&self) -> Vec<Moment> {
        self.moments.clone()
    }

    pub fn moment_count(&self) -> usize {
        self.moments.len()
    }

    pub fn has_narration(&self) -> bool {
        !self.moments.is_empty()
    }
}
