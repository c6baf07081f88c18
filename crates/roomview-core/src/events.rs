use std::sync::{Arc, RwLock};

use crate::tracks::TrackInfo;

/// Events surfaced by a session, in the order the engine raised them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    ParticipantJoined(ParticipantInfo),
    ParticipantLeft(String), // participant SID
    TrackAdded { participant_sid: String, track: TrackInfo },
    TrackRemoved { participant_sid: String, track: TrackInfo },
    TrackEnabled { participant_sid: String, track_sid: String },
    TrackDisabled { participant_sid: String, track_sid: String },
    DominantSpeakerChanged(Option<String>), // participant SID
}

impl SessionEvent {
    /// Participant the event concerns, if any.
    pub fn participant_sid(&self) -> Option<&str> {
        match self {
            SessionEvent::ParticipantJoined(info) => Some(&info.sid),
            SessionEvent::ParticipantLeft(sid) => Some(sid),
            SessionEvent::TrackAdded { participant_sid, .. }
            | SessionEvent::TrackRemoved { participant_sid, .. }
            | SessionEvent::TrackEnabled { participant_sid, .. }
            | SessionEvent::TrackDisabled { participant_sid, .. } => Some(participant_sid),
            SessionEvent::ConnectionStateChanged(_) | SessionEvent::DominantSpeakerChanged(_) => {
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Disconnected` is reachable from anywhere; `Failed` only ends a live
    /// or connecting session.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Failed { .. }, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Connected) => true,
            (Connecting | Connected | Reconnecting { .. }, Failed { .. }) => true,
            _ => false,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Reconnecting { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
}

impl ParticipantInfo {
    pub fn new(sid: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            identity: identity.into(),
            name: None,
        }
    }
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from the event pump).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Dispatches applied session events to registered observers.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: &SessionEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
