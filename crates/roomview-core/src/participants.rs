use crate::events::ParticipantInfo;
use crate::tracks::{TrackInfo, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub info: ParticipantInfo,
    pub tracks: Vec<TrackInfo>,
    pub presence: Presence,
}

impl Participant {
    pub fn new(info: ParticipantInfo) -> Self {
        Self {
            info,
            tracks: Vec::new(),
            presence: Presence::Joined,
        }
    }

    pub fn sid(&self) -> &str {
        &self.info.sid
    }

    /// The track a view of `kind` should render: the first enabled one,
    /// else none.
    pub fn renderable_track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind && t.enabled)
    }

    pub fn track(&self, track_sid: &str) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.sid == track_sid)
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Ordered set of participants in a session.
///
/// Updated by the session event pump. Views query it by SID on every use
/// and never keep a `Participant` around.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    local: Option<Participant>,
    participants: Vec<Participant>,
    dominant_speaker: Option<String>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, info: ParticipantInfo) {
        self.local = Some(Participant::new(info));
    }

    pub fn local_sid(&self) -> Option<&str> {
        self.local.as_ref().map(Participant::sid)
    }

    pub fn local(&self) -> Option<&Participant> {
        self.local.as_ref()
    }

    /// Returns false if a participant with the same SID is already present.
    pub fn add_participant(&mut self, info: ParticipantInfo) -> bool {
        if self.lookup(&info.sid).is_some() {
            return false;
        }
        self.participants.push(Participant::new(info));
        true
    }

    /// Remove a remote participant, returning it marked as `Left`.
    pub fn remove_participant(&mut self, sid: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.sid() == sid)?;
        let mut gone = self.participants.remove(idx);
        gone.presence = Presence::Left;
        if self.dominant_speaker.as_deref() == Some(sid) {
            self.dominant_speaker = None;
        }
        Some(gone)
    }

    /// Remote participants in join order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Look up a participant (local or remote) by SID.
    pub fn lookup(&self, sid: &str) -> Option<&Participant> {
        match &self.local {
            Some(local) if local.sid() == sid => Some(local),
            _ => self.participants.iter().find(|p| p.sid() == sid),
        }
    }

    fn lookup_mut(&mut self, sid: &str) -> Option<&mut Participant> {
        match &mut self.local {
            Some(local) if local.info.sid == sid => Some(local),
            _ => self.participants.iter_mut().find(|p| p.info.sid == sid),
        }
    }

    /// Add or replace a track. Returns false for unknown participants.
    pub fn add_track(&mut self, participant_sid: &str, track: TrackInfo) -> bool {
        let Some(p) = self.lookup_mut(participant_sid) else {
            return false;
        };
        match p.tracks.iter_mut().find(|t| t.sid == track.sid) {
            Some(existing) => *existing = track,
            None => p.tracks.push(track),
        }
        true
    }

    pub fn remove_track(&mut self, participant_sid: &str, track_sid: &str) -> Option<TrackInfo> {
        let p = self.lookup_mut(participant_sid)?;
        let idx = p.tracks.iter().position(|t| t.sid == track_sid)?;
        Some(p.tracks.remove(idx))
    }

    pub fn set_track_enabled(
        &mut self,
        participant_sid: &str,
        track_sid: &str,
        enabled: bool,
    ) -> Option<TrackInfo> {
        let p = self.lookup_mut(participant_sid)?;
        let track = p.tracks.iter_mut().find(|t| t.sid == track_sid)?;
        track.enabled = enabled;
        Some(track.clone())
    }

    pub fn set_dominant_speaker(&mut self, sid: Option<String>) {
        self.dominant_speaker = sid;
    }

    pub fn dominant_speaker(&self) -> Option<&str> {
        self.dominant_speaker.as_deref()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.local = None;
        self.participants.clear();
        self.dominant_speaker = None;
    }
}
