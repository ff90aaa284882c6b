//! Camera follow: derives where the viewport should look for the active
//! moment. Animation belongs to the renderer.

use replaycast_protocol::Moment;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraTarget {
    pub focus_x: f64,
    pub focus_y: f64,
    pub zoom: f64,
}

/// `None` means "no narration here": renderers reset to the identity view.
pub fn derive_target(moment: Option<&Moment>) -> Option<CameraTarget> {
    moment.map(|m| CameraTarget {
        focus_x: m.focus_x,
        focus_y: m.focus_y,
        zoom: m.zoom,
    })
}

/// Holds the last derived target plus a version that increases every time
/// a new target is set, so a renderer can tell a fresh target from a
/// re-read of the same one.
#[derive(Debug, Default)]
pub struct CameraFollow {
    target: Option<CameraTarget>,
    index: Option<usize>,
    focus_version: u64,
}

impl CameraFollow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive for the moment at `index`. Returns `true` when the version
    /// was bumped.
    pub fn follow(&mut self, index: usize, moment: Option<&Moment>) -> bool {
        let target = derive_target(moment);
        if self.index == Some(index) && self.target == target {
            return false;
        }
        self.index = Some(index);
        self.target = target;
        self.focus_version += 1;
        true
    }

    pub fn reset(&mut self) {
        if self.target.is_some() || self.index.is_some() {
            self.target = None;
            self.index = None;
            self.focus_version += 1;
        }
    }

    pub fn target(&self) -> Option<CameraTarget> {
        self.target
    }

    pub fn focus_version(&self) -> u64 {
        self.focus_version
    }
}
