//! Seam to the native video engine.
//!
//! The engine owns capture, codecs, transport and signaling. The core only
//! asks it to connect/disconnect and receives its callbacks as an ordered
//! stream of [`SessionEvent`]s pushed into an [`EngineEventSink`].

pub mod loopback;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::RoomviewError;
use crate::events::{ParticipantInfo, SessionEvent};

/// Options forwarded to the engine on connect.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub video: bool,
    #[serde(default)]
    pub dominant_speaker: bool,
    #[serde(default)]
    pub network_quality: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            room_name: None,
            audio: true,
            video: true,
            dominant_speaker: false,
            network_quality: false,
        }
    }
}

/// Producer half of a session's event channel, handed to the engine.
///
/// Events pushed here are consumed by exactly one reader, in push order.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EngineEventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the session this sink belongs to is gone.
    pub fn push(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The native video engine as seen by the binding layer.
pub trait MediaEngine: Send + Sync {
    /// Process-wide SDK setup, run before the first session of the process
    /// (again after a teardown).
    fn initialize(&self) -> Result<(), RoomviewError>;

    /// Release process-wide SDK resources once the last session is gone.
    fn teardown(&self);

    /// Open a session. On success returns the local participant; further
    /// activity arrives through `sink` until [`MediaEngine::disconnect`].
    fn connect(
        &self,
        token: &str,
        options: &ConnectOptions,
        sink: EngineEventSink,
    ) -> Result<ParticipantInfo, RoomviewError>;

    /// Close the current session, if any. Must tolerate repeated calls and
    /// calls made while a `connect` is still in flight.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_options_use_serde_defaults() {
        let opts: ConnectOptions = serde_json::from_str(r#"{"dominant_speaker":true}"#).unwrap();
        assert!(opts.audio);
        assert!(opts.video);
        assert!(opts.dominant_speaker);
        assert_eq!(opts.room_name, None);
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (sink, rx) = EngineEventSink::channel();
        assert!(sink.push(SessionEvent::ParticipantLeft("p1".into())));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.push(SessionEvent::ParticipantLeft("p1".into())));
    }
}
