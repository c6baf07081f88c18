use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    ScreenShare,
}

impl TrackKind {
    /// Whether tracks of this kind can be rendered onto a surface.
    pub fn is_renderable(self) -> bool {
        !matches!(self, TrackKind::Audio)
    }
}

/// A media track published by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub sid: String,
    pub kind: TrackKind,
    pub enabled: bool,
    pub name: Option<String>,
}

impl TrackInfo {
    pub fn new(sid: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            sid: sid.into(),
            kind,
            enabled: true,
            name: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Opaque handle of a platform-provided render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound(SurfaceId),
}

impl BindingState {
    pub fn is_bound(&self) -> bool {
        matches!(self, BindingState::Bound(_))
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        match self {
            BindingState::Bound(surface) => Some(*surface),
            BindingState::Unbound => None,
        }
    }
}
