//! In-process engine and renderer that can be scripted from Rust.
//!
//! Used by the test suites and by hosts that want to exercise the view
//! layer without a native SDK linked in.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::binding::{SurfaceLosses, SurfaceRenderer};
use crate::engine::{ConnectOptions, EngineEventSink, MediaEngine};
use crate::errors::RoomviewError;
use crate::events::{ConnectionState, ParticipantInfo, SessionEvent};
use crate::tracks::{SurfaceId, TrackInfo};

type ConnectHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LoopbackState {
    sink: Option<EngineEventSink>,
    expired_tokens: HashSet<String>,
    unreachable: bool,
    connects: Vec<(String, ConnectOptions)>,
    disconnects: usize,
    sdk_inits: usize,
    sdk_teardowns: usize,
    fail_sdk_init: bool,
    on_connect: Option<ConnectHook>,
}

pub struct LoopbackEngine {
    local: ParticipantInfo,
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_local(ParticipantInfo::new("local", "me"))
    }

    pub fn with_local(local: ParticipantInfo) -> Self {
        Self {
            local,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject `token` with an auth error on connect.
    pub fn expire_token(&self, token: &str) {
        self.lock().expired_tokens.insert(token.to_string());
    }

    /// Fail every connect with a network error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make the next SDK init fail with a fatal engine error while set.
    pub fn fail_sdk_init(&self, fail: bool) {
        self.lock().fail_sdk_init = fail;
    }

    /// Run `hook` once, inside the next successful connect, after the sink
    /// is installed and before connect returns.
    pub fn on_next_connect(&self, hook: impl FnOnce() + Send + 'static) {
        self.lock().on_connect = Some(Box::new(hook));
    }

    pub fn sdk_inits(&self) -> usize {
        self.lock().sdk_inits
    }

    pub fn sdk_teardowns(&self) -> usize {
        self.lock().sdk_teardowns
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnects
    }

    pub fn local_sid(&self) -> &str {
        &self.local.sid
    }

    pub fn is_connected(&self) -> bool {
        self.lock().sink.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Tokens and options of every connect attempt, in order.
    pub fn connect_calls(&self) -> Vec<(String, ConnectOptions)> {
        self.lock().connects.clone()
    }

    /// Raise an engine callback. Returns false when no session is open.
    pub fn emit(&self, event: SessionEvent) -> bool {
        match &self.lock().sink {
            Some(sink) => sink.push(event),
            None => false,
        }
    }

    pub fn join(&self, sid: &str, identity: &str) -> bool {
        self.emit(SessionEvent::ParticipantJoined(ParticipantInfo::new(sid, identity)))
    }

    pub fn leave(&self, sid: &str) -> bool {
        self.emit(SessionEvent::ParticipantLeft(sid.to_string()))
    }

    pub fn add_track(&self, participant_sid: &str, track: TrackInfo) -> bool {
        self.emit(SessionEvent::TrackAdded {
            participant_sid: participant_sid.to_string(),
            track,
        })
    }

    pub fn remove_track(&self, participant_sid: &str, track: TrackInfo) -> bool {
        self.emit(SessionEvent::TrackRemoved {
            participant_sid: participant_sid.to_string(),
            track,
        })
    }

    pub fn set_state(&self, state: ConnectionState) -> bool {
        self.emit(SessionEvent::ConnectionStateChanged(state))
    }
}

impl MediaEngine for LoopbackEngine {
    fn initialize(&self) -> Result<(), RoomviewError> {
        let mut state = self.lock();
        if state.fail_sdk_init {
            return Err(RoomviewError::FatalEngine("loopback sdk init failed".into()));
        }
        state.sdk_inits += 1;
        Ok(())
    }

    fn teardown(&self) {
        self.lock().sdk_teardowns += 1;
    }

    fn connect(
        &self,
        token: &str,
        options: &ConnectOptions,
        sink: EngineEventSink,
    ) -> Result<ParticipantInfo, RoomviewError> {
        let hook = {
            let mut state = self.lock();
            state.connects.push((token.to_string(), options.clone()));
            if state.unreachable {
                return Err(RoomviewError::Network("loopback unreachable".into()));
            }
            if state.expired_tokens.contains(token) {
                return Err(RoomviewError::Auth("token expired".into()));
            }
            state.sink = Some(sink);
            state.on_connect.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(self.local.clone())
    }

    fn disconnect(&self) {
        let mut state = self.lock();
        state.sink = None;
        state.disconnects += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    Attach(String, SurfaceId),
    Detach(String, SurfaceId),
}

/// Renderer that records every attach/detach and can refuse surfaces.
#[derive(Default)]
pub struct LoopbackRenderer {
    calls: Mutex<Vec<RenderCall>>,
    rejected: Mutex<HashSet<SurfaceId>>,
    losses: Mutex<Vec<SurfaceLosses>>,
}

impl LoopbackRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_surface(&self, surface: SurfaceId) {
        self.rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(surface);
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Simulate the platform destroying `surface` on its own: whatever it
    /// shows is detached and every watcher is told.
    pub fn lose_surface(&self, surface: SurfaceId) {
        if let Some(track) = self.showing(surface) {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(RenderCall::Detach(track, surface));
        }
        for losses in self.losses.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).iter() {
            losses.report(surface);
        }
    }

    /// Track currently shown on `surface`, replayed from the call log.
    pub fn showing(&self, surface: SurfaceId) -> Option<String> {
        let mut current = None;
        for call in self.calls() {
            match call {
                RenderCall::Attach(track, s) if s == surface => current = Some(track),
                RenderCall::Detach(_, s) if s == surface => current = None,
                _ => {}
            }
        }
        current
    }
}

impl SurfaceRenderer for LoopbackRenderer {
    fn attach(&self, track_sid: &str, surface: SurfaceId) -> Result<(), RoomviewError> {
        if self
            .rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&surface)
        {
            return Err(RoomviewError::Bind(format!("{surface} rejected")));
        }
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RenderCall::Attach(track_sid.to_string(), surface));
        Ok(())
    }

    fn detach(&self, track_sid: &str, surface: SurfaceId) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RenderCall::Detach(track_sid.to_string(), surface));
    }

    fn watch_losses(&self, losses: SurfaceLosses) {
        self.losses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(losses);
    }
}
