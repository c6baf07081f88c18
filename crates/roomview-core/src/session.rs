use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::binding::{BindingTable, SurfaceLosses, SurfaceRenderer};
use crate::engine::{ConnectOptions, EngineEventSink, MediaEngine};
use crate::errors::RoomviewError;
use crate::events::{ConnectionState, EventEmitter, SessionEvent, SessionEventListener};
use crate::participants::{Participant, ParticipantRegistry};
use crate::sdk::{Sdk, SdkGuard};
use crate::tracks::TrackKind;
use crate::views::{self, LocalVideoView, ParticipantView, ScreenShareView, ViewSlot};

/// A connected session. Dropped on disconnect or terminal failure.
pub(crate) struct LiveSession {
    id: String,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    _sdk: SdkGuard,
}

/// Everything the controller, its sessions and its views share.
pub(crate) struct CoreState {
    pub(crate) connection: ConnectionState,
    pub(crate) registry: ParticipantRegistry,
    pub(crate) bindings: BindingTable,
    pub(crate) views: Vec<ViewSlot>,
    pub(crate) next_view_id: u64,
    session: Option<LiveSession>,
    /// Final state of the last session that ended, keyed by its id.
    last_ended: Option<(String, ConnectionState)>,
    reconnect_attempt: u32,
    /// Id of the connect call currently waiting on the engine. Cleared by
    /// disconnect, so a late engine answer can tell it lost.
    pending_connect: Option<u64>,
    connect_attempts: u64,
    losses: SurfaceLosses,
}

impl CoreState {
    fn is_current(&self, session_id: &str) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn end_session(&mut self, final_state: ConnectionState) {
        self.bindings.release_all();
        self.registry.clear();
        for slot in &mut self.views {
            slot.bound_track = None;
        }
        self.reconnect_attempt = 0;
        if let Some(session) = self.session.take() {
            tracing::info!(session_id = %session.id, state = ?final_state, "session ended");
            self.last_ended = Some((session.id, final_state));
        }
    }

    /// Forget bindings on surfaces the renderer reported lost. Views on a
    /// lost surface count as unmounted.
    fn absorb_surface_losses(&mut self) {
        for surface in self.losses.drain() {
            let Some(track_sid) = self.bindings.forget_surface(surface) else {
                continue;
            };
            tracing::warn!(%surface, %track_sid, "surface lost while bound");
            for slot in &mut self.views {
                if slot.surface == Some(surface) {
                    slot.surface = None;
                    slot.bound_track = None;
                }
            }
            views::rebind_freed(self, &track_sid);
        }
    }

    fn reconcile_participant(&mut self, participant_sid: &str, kind: Option<TrackKind>) {
        for idx in 0..self.views.len() {
            let slot = &self.views[idx];
            let targets = slot.target.participant_sid(&self.registry) == Some(participant_sid);
            let kind_matches = kind.is_none_or(|k| k == slot.kind);
            if targets && kind_matches {
                views::reconcile(self, idx);
            }
        }
    }

    fn reconcile_all(&mut self) {
        for idx in 0..self.views.len() {
            views::reconcile(self, idx);
        }
    }

    /// Apply one engine event to the model. Returns the event to surface,
    /// or `None` if it was dropped.
    fn apply(&mut self, event: SessionEvent) -> Option<SessionEvent> {
        match event {
            SessionEvent::ConnectionStateChanged(next) => {
                let next = match next {
                    ConnectionState::Reconnecting { .. } => ConnectionState::Reconnecting {
                        attempt: self.reconnect_attempt + 1,
                    },
                    other => other,
                };
                if !self.connection.can_transition_to(&next) {
                    tracing::warn!(from = ?self.connection, to = ?next, "ignoring illegal state transition");
                    return None;
                }
                match &next {
                    ConnectionState::Reconnecting { attempt } => self.reconnect_attempt = *attempt,
                    ConnectionState::Connected => self.reconnect_attempt = 0,
                    _ => {}
                }
                self.connection = next.clone();
                match &next {
                    ConnectionState::Disconnected => self.end_session(next.clone()),
                    ConnectionState::Failed { reason } => {
                        tracing::error!(%reason, "engine failure");
                        self.end_session(next.clone());
                    }
                    _ => {}
                }
                Some(SessionEvent::ConnectionStateChanged(next))
            }

            SessionEvent::ParticipantJoined(info) => {
                if !self.registry.add_participant(info.clone()) {
                    tracing::debug!(sid = %info.sid, "duplicate participant join ignored");
                    return None;
                }
                tracing::info!(sid = %info.sid, identity = %info.identity, "participant joined");
                let sid = info.sid.clone();
                self.reconcile_participant(&sid, None);
                Some(SessionEvent::ParticipantJoined(info))
            }

            SessionEvent::ParticipantLeft(sid) => {
                if self.registry.remove_participant(&sid).is_none() {
                    tracing::debug!(%sid, "leave for unknown participant ignored");
                    return None;
                }
                tracing::info!(%sid, "participant left");
                self.reconcile_participant(&sid, None);
                Some(SessionEvent::ParticipantLeft(sid))
            }

            SessionEvent::TrackAdded { participant_sid, track } => {
                let replaced_kind = self
                    .registry
                    .lookup(&participant_sid)
                    .and_then(|p| p.track(&track.sid))
                    .map(|t| t.kind);
                if !self.registry.add_track(&participant_sid, track.clone()) {
                    tracing::warn!(%participant_sid, track_sid = %track.sid, "track added for unknown participant");
                    return None;
                }
                tracing::debug!(%participant_sid, track_sid = %track.sid, kind = ?track.kind, "track added");
                match replaced_kind {
                    // Views of the old kind may still show this sid.
                    Some(old) if old != track.kind => self.reconcile_participant(&participant_sid, None),
                    _ => self.reconcile_participant(&participant_sid, Some(track.kind)),
                }
                Some(SessionEvent::TrackAdded { participant_sid, track })
            }

            SessionEvent::TrackRemoved { participant_sid, track } => {
                if self.registry.remove_track(&participant_sid, &track.sid).is_none() {
                    tracing::debug!(%participant_sid, track_sid = %track.sid, "removal of unknown track ignored");
                    return None;
                }
                tracing::debug!(%participant_sid, track_sid = %track.sid, "track removed");
                self.reconcile_participant(&participant_sid, Some(track.kind));
                Some(SessionEvent::TrackRemoved { participant_sid, track })
            }

            SessionEvent::TrackEnabled { participant_sid, track_sid } => {
                let track = self.registry.set_track_enabled(&participant_sid, &track_sid, true)?;
                self.reconcile_participant(&participant_sid, Some(track.kind));
                Some(SessionEvent::TrackEnabled { participant_sid, track_sid })
            }

            SessionEvent::TrackDisabled { participant_sid, track_sid } => {
                let track = self.registry.set_track_enabled(&participant_sid, &track_sid, false)?;
                self.reconcile_participant(&participant_sid, Some(track.kind));
                Some(SessionEvent::TrackDisabled { participant_sid, track_sid })
            }

            SessionEvent::DominantSpeakerChanged(sid) => {
                self.registry.set_dominant_speaker(sid.clone());
                Some(SessionEvent::DominantSpeakerChanged(sid))
            }
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<CoreState>,
    emitter: EventEmitter,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.absorb_surface_losses();
        state
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.lock().is_current(session_id)
    }

    /// Apply an event for `session_id`, then notify listeners.
    /// Events for a session that is no longer current are dropped.
    fn dispatch(&self, session_id: &str, event: SessionEvent) -> Option<SessionEvent> {
        let applied = {
            let mut state = self.lock();
            if !state.is_current(session_id) {
                return None;
            }
            state.apply(event)
        };
        if let Some(event) = &applied {
            self.emitter.emit(event);
        }
        applied
    }

    /// Resolve a failed connect attempt, unless a disconnect or a newer
    /// connect already took over.
    fn settle_failed_attempt(&self, attempt: u64, next: ConnectionState) {
        let changed = {
            let mut state = self.lock();
            if state.pending_connect != Some(attempt) {
                return;
            }
            state.pending_connect = None;
            let changed = state.connection != next;
            state.connection = next.clone();
            changed
        };
        if changed {
            self.emitter
                .emit(&SessionEvent::ConnectionStateChanged(next));
        }
    }

    fn set_connection(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.lock();
            let changed = state.connection != next;
            state.connection = next.clone();
            changed
        };
        if changed {
            self.emitter
                .emit(&SessionEvent::ConnectionStateChanged(next));
        }
    }
}

/// Owns the connection lifecycle and the views bound to it.
pub struct SessionController {
    engine: Arc<dyn MediaEngine>,
    sdk: Arc<Sdk>,
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn MediaEngine>, renderer: Arc<dyn SurfaceRenderer>) -> Self {
        Self::with_sdk(engine, renderer, Sdk::global())
    }

    /// Controller whose sessions hold `sdk` instead of the process-wide one.
    pub fn with_sdk(
        engine: Arc<dyn MediaEngine>,
        renderer: Arc<dyn SurfaceRenderer>,
        sdk: Arc<Sdk>,
    ) -> Self {
        let losses = SurfaceLosses::default();
        renderer.watch_losses(losses.clone());
        Self {
            engine,
            sdk,
            shared: Arc::new(Shared {
                state: Mutex::new(CoreState {
                    connection: ConnectionState::Disconnected,
                    registry: ParticipantRegistry::new(),
                    bindings: BindingTable::new(renderer),
                    views: Vec::new(),
                    next_view_id: 0,
                    session: None,
                    last_ended: None,
                    reconnect_attempt: 0,
                    pending_connect: None,
                    connect_attempts: 0,
                    losses,
                }),
                emitter: EventEmitter::new(),
            }),
        }
    }

    /// Register an observer for applied session events, including the
    /// connection transitions the controller makes itself.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection.clone()
    }

    /// Handle to the live session, if any.
    pub fn session(&self) -> Option<Session> {
        let state = self.shared.lock();
        state.session.as_ref().map(|s| Session {
            id: s.id.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Open a session with the engine.
    ///
    /// Fails with `Auth` for an empty, invalid or expired token and with
    /// `Network` when the engine cannot reach the service. No session exists
    /// after a failure.
    pub fn connect(&self, token: &str, options: &ConnectOptions) -> Result<Session, RoomviewError> {
        let attempt = {
            let mut state = self.shared.lock();
            if state.session.is_some() || state.pending_connect.is_some() {
                return Err(RoomviewError::InvalidState(format!(
                    "cannot connect while {:?}",
                    state.connection
                )));
            }
            state.connect_attempts += 1;
            let attempt = state.connect_attempts;
            state.pending_connect = Some(attempt);
            state.connection = ConnectionState::Connecting;
            attempt
        };
        self.shared
            .emitter
            .emit(&SessionEvent::ConnectionStateChanged(ConnectionState::Connecting));

        let opened = if token.trim().is_empty() {
            Err(RoomviewError::Auth("empty access token".into()))
        } else {
            self.sdk.acquire(&self.engine).and_then(|sdk| {
                let (sink, events) = EngineEventSink::channel();
                let local = self.engine.connect(token, options, sink)?;
                Ok((sdk, events, local))
            })
        };

        let (sdk, events, local) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!("connect failed: {e}");
                let next = match &e {
                    RoomviewError::FatalEngine(reason) => ConnectionState::Failed {
                        reason: reason.clone(),
                    },
                    _ => ConnectionState::Disconnected,
                };
                self.shared.settle_failed_attempt(attempt, next);
                return Err(e);
            }
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = self.shared.lock();
            if state.pending_connect != Some(attempt) {
                // disconnect() won while the engine was connecting. Close the
                // late engine session unless a newer connect already owns it.
                let superseded = state.pending_connect.is_some() || state.session.is_some();
                drop(state);
                if !superseded {
                    self.engine.disconnect();
                }
                return Err(RoomviewError::InvalidState(
                    "disconnected while connecting".into(),
                ));
            }
            state.pending_connect = None;
            state.registry.clear();
            state.registry.set_local(local.clone());
            state.session = Some(LiveSession {
                id: session_id.clone(),
                events: Some(events),
                _sdk: sdk,
            });
            state.reconnect_attempt = 0;
            state.connection = ConnectionState::Connected;
            state.reconcile_all();
        }
        tracing::info!(%session_id, local_sid = %local.sid, room = ?options.room_name, "connected");
        self.shared
            .emitter
            .emit(&SessionEvent::ConnectionStateChanged(ConnectionState::Connected));

        Ok(Session {
            id: session_id,
            shared: self.shared.clone(),
        })
    }

    /// Close the session and release every binding. Also cancels a connect
    /// still waiting on the engine. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let engine_busy = {
            let mut state = self.shared.lock();
            let engine_busy = state.session.is_some() || state.pending_connect.is_some();
            state.pending_connect = None;
            state.end_session(ConnectionState::Disconnected);
            engine_busy
        };
        if engine_busy {
            self.engine.disconnect();
        }
        self.shared.set_connection(ConnectionState::Disconnected);
    }

    /// Take the session's event stream. Only the first call per session
    /// returns it.
    pub fn take_events(&self) -> Option<SessionEvents> {
        self.session()?.events()
    }

    /// Apply every event the engine has queued so far, without an async
    /// runtime. Does nothing once the event stream has been taken.
    pub fn dispatch_pending(&self) -> Vec<SessionEvent> {
        let (session_id, mut rx) = {
            let mut state = self.shared.lock();
            let Some(session) = state.session.as_mut() else {
                return Vec::new();
            };
            let Some(rx) = session.events.take() else {
                return Vec::new();
            };
            (session.id.clone(), rx)
        };

        let mut applied = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(event) = self.shared.dispatch(&session_id, event) {
                applied.push(event);
            }
            if !self.shared.is_current(&session_id) {
                break;
            }
        }

        let mut state = self.shared.lock();
        if let Some(session) = state.session.as_mut().filter(|s| s.id == session_id) {
            session.events = Some(rx);
        }
        applied
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared.lock().registry.participants().to_vec()
    }

    pub fn local_view(&self) -> LocalVideoView {
        LocalVideoView::new(self.shared.clone())
    }

    pub fn participant_view(&self, participant_sid: &str) -> ParticipantView {
        ParticipantView::new(self.shared.clone(), participant_sid)
    }

    pub fn screen_share_view(&self, participant_sid: &str) -> ScreenShareView {
        ScreenShareView::new(self.shared.clone(), Some(participant_sid))
    }

    /// Screen-share view for the local user's own share.
    pub fn local_screen_share_view(&self) -> ScreenShareView {
        ScreenShareView::new(self.shared.clone(), None)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read handle on a session owned by a [`SessionController`].
#[derive(Clone)]
pub struct Session {
    id: String,
    shared: Arc<Shared>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// False once the session was disconnected or failed.
    pub fn is_live(&self) -> bool {
        self.shared.is_current(&self.id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        let state = self.shared.lock();
        if state.is_current(&self.id) {
            return state.connection.clone();
        }
        match &state.last_ended {
            Some((id, last)) if *id == self.id => last.clone(),
            _ => ConnectionState::Disconnected,
        }
    }

    /// Remote participants in join order. Empty once the session ended.
    pub fn participants(&self) -> Vec<Participant> {
        let state = self.shared.lock();
        if !state.is_current(&self.id) {
            return Vec::new();
        }
        state.registry.participants().to_vec()
    }

    pub fn participant(&self, sid: &str) -> Option<Participant> {
        let state = self.shared.lock();
        if !state.is_current(&self.id) {
            return None;
        }
        state.registry.lookup(sid).cloned()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        let state = self.shared.lock();
        if !state.is_current(&self.id) {
            return None;
        }
        state.registry.local().cloned()
    }

    pub fn dominant_speaker(&self) -> Option<String> {
        let state = self.shared.lock();
        if !state.is_current(&self.id) {
            return None;
        }
        state.registry.dominant_speaker().map(str::to_string)
    }

    /// Take the ordered event stream of this session. Returns `None` if it
    /// was already taken or the session ended.
    pub fn events(&self) -> Option<SessionEvents> {
        let mut state = self.shared.lock();
        let session = state.session.as_mut().filter(|s| s.id == self.id)?;
        let rx = session.events.take()?;
        Some(SessionEvents {
            session_id: self.id.clone(),
            rx,
            shared: self.shared.clone(),
        })
    }
}

/// Lazy stream of a session's events.
///
/// Each engine event is applied to the session and its views when it is
/// pulled, then yielded. The stream ends when the session does and cannot
/// be restarted.
pub struct SessionEvents {
    session_id: String,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    shared: Arc<Shared>,
}

impl SessionEvents {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SessionEvent>> {
        let this = self.get_mut();
        loop {
            if !this.shared.is_current(&this.session_id) {
                return Poll::Ready(None);
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(applied) = this.shared.dispatch(&this.session_id, event) {
                        return Poll::Ready(Some(applied));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loopback::{LoopbackEngine, LoopbackRenderer};
    use crate::tracks::{BindingState, SurfaceId, TrackInfo};
    use crate::views::VideoView;
    use futures_util::StreamExt;
    use std::sync::Mutex as StdMutex;

    fn setup() -> (SessionController, Arc<LoopbackEngine>, Arc<LoopbackRenderer>) {
        let engine = Arc::new(LoopbackEngine::new());
        let renderer = Arc::new(LoopbackRenderer::new());
        let controller = SessionController::new(engine.clone(), renderer.clone());
        (controller, engine, renderer)
    }

    struct StateCapture {
        states: Arc<StdMutex<Vec<ConnectionState>>>,
    }

    impl SessionEventListener for StateCapture {
        fn on_event(&self, event: SessionEvent) {
            if let SessionEvent::ConnectionStateChanged(state) = event {
                self.states.lock().unwrap().push(state);
            }
        }
    }

    #[test]
    fn connect_reports_connecting_then_connected() {
        let (controller, engine, _) = setup();
        let states = Arc::new(StdMutex::new(Vec::new()));
        controller.add_listener(Arc::new(StateCapture { states: states.clone() }));

        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();

        assert!(session.is_live());
        assert!(engine.is_connected());
        assert_eq!(controller.connection_state(), ConnectionState::Connected);
        assert_eq!(
            *states.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(session.local_participant().unwrap().sid(), "local");
    }

    #[test]
    fn expired_token_fails_with_auth_and_leaves_no_session() {
        let (controller, engine, _) = setup();
        engine.expire_token("old");

        let err = controller.connect("old", &ConnectOptions::default()).err().unwrap();

        assert!(matches!(err, RoomviewError::Auth(_)));
        assert!(controller.session().is_none());
        assert!(controller.take_events().is_none());
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn empty_token_is_rejected_before_reaching_engine() {
        let (controller, engine, _) = setup();
        let err = controller.connect("  ", &ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, RoomviewError::Auth(_)));
        assert!(engine.connect_calls().is_empty());
    }

    #[test]
    fn unreachable_engine_fails_with_network_error() {
        let (controller, engine, _) = setup();
        engine.set_unreachable(true);
        let err = controller.connect("tok", &ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, RoomviewError::Network(_)));
        assert!(controller.session().is_none());

        engine.set_unreachable(false);
        assert!(controller.connect("tok", &ConnectOptions::default()).is_ok());
    }

    #[test]
    fn second_connect_while_live_is_rejected() {
        let (controller, _, _) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let err = controller.connect("tok", &ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, RoomviewError::InvalidState(_)));
    }

    #[test]
    fn options_are_forwarded_to_engine() {
        let (controller, engine, _) = setup();
        let options = ConnectOptions {
            room_name: Some("standup".into()),
            dominant_speaker: true,
            ..Default::default()
        };
        controller.connect("tok", &options).unwrap();
        assert_eq!(engine.connect_calls(), vec![("tok".to_string(), options)]);
    }

    #[test]
    fn disconnect_is_idempotent_and_releases_bindings() {
        let (controller, engine, renderer) = setup();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));

        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(1)));

        controller.disconnect();
        controller.disconnect();

        assert_eq!(view.binding_state(), BindingState::Unbound);
        assert_eq!(renderer.showing(SurfaceId(1)), None);
        assert!(!session.is_live());
        assert!(!engine.is_connected());
        assert!(session.participants().is_empty());
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn remote_view_follows_track_added_and_removed() {
        let (controller, engine, renderer) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();

        let view = controller.participant_view("p1");
        view.mount(SurfaceId(7));
        engine.join("p1", "alice");
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Unbound);

        let track = TrackInfo::new("v1", TrackKind::Video);
        engine.add_track("p1", track.clone());
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(7)));
        assert_eq!(renderer.showing(SurfaceId(7)).as_deref(), Some("v1"));

        engine.remove_track("p1", track);
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Unbound);
        assert_eq!(renderer.showing(SurfaceId(7)), None);
    }

    #[test]
    fn participant_leaving_unbinds_its_view() {
        let (controller, engine, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));

        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        engine.leave("p1");
        let applied = controller.dispatch_pending();

        assert_eq!(applied.len(), 3);
        assert_eq!(view.binding_state(), BindingState::Unbound);
        assert!(session.participant("p1").is_none());
    }

    #[test]
    fn events_for_other_participants_do_not_touch_view() {
        let (controller, engine, renderer) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));

        engine.join("p2", "bob");
        engine.add_track("p2", TrackInfo::new("v2", TrackKind::Video));
        controller.dispatch_pending();

        assert_eq!(view.binding_state(), BindingState::Unbound);
        assert!(renderer.calls().is_empty());
    }

    #[test]
    fn disabled_track_is_not_bound_until_enabled() {
        let (controller, engine, _) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));

        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video).disabled());
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Unbound);

        engine.emit(SessionEvent::TrackEnabled {
            participant_sid: "p1".into(),
            track_sid: "v1".into(),
        });
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(1)));

        engine.emit(SessionEvent::TrackDisabled {
            participant_sid: "p1".into(),
            track_sid: "v1".into(),
        });
        controller.dispatch_pending();
        assert_eq!(view.binding_state(), BindingState::Unbound);
    }

    #[test]
    fn reconnecting_counts_attempts_and_keeps_bindings() {
        let (controller, engine, _) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));
        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        engine.set_state(ConnectionState::Reconnecting { attempt: 0 });
        engine.set_state(ConnectionState::Reconnecting { attempt: 0 });
        let applied = controller.dispatch_pending();

        assert_eq!(
            applied.last(),
            Some(&SessionEvent::ConnectionStateChanged(ConnectionState::Reconnecting {
                attempt: 2
            }))
        );
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(1)));

        engine.set_state(ConnectionState::Connected);
        controller.dispatch_pending();
        assert_eq!(controller.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn fatal_engine_error_fails_session_and_allows_fresh_connect() {
        let (controller, engine, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        let failed = ConnectionState::Failed {
            reason: "media server crashed".into(),
        };
        engine.set_state(failed.clone());
        controller.dispatch_pending();

        assert!(!session.is_live());
        assert_eq!(session.connection_state(), failed);
        assert_eq!(controller.connection_state(), failed);

        let fresh = controller.connect("tok", &ConnectOptions::default()).unwrap();
        assert_ne!(fresh.id(), session.id());
        assert!(fresh.is_live());
    }

    #[test]
    fn illegal_transition_is_dropped() {
        let (controller, engine, _) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        engine.set_state(ConnectionState::Connecting);
        assert!(controller.dispatch_pending().is_empty());
        assert_eq!(controller.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn dominant_speaker_is_tracked() {
        let (controller, engine, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        engine.join("p1", "alice");
        engine.emit(SessionEvent::DominantSpeakerChanged(Some("p1".into())));
        controller.dispatch_pending();
        assert_eq!(session.dominant_speaker().as_deref(), Some("p1"));
    }

    #[test]
    fn event_stream_can_only_be_taken_once() {
        let (controller, _, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        assert!(session.events().is_some());
        assert!(session.events().is_none());
        assert!(controller.take_events().is_none());
        assert!(controller.dispatch_pending().is_empty());
    }

    #[tokio::test]
    async fn event_stream_yields_in_engine_order_and_ends_with_session() {
        let (controller, engine, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        let mut events = session.events().unwrap();
        let view = controller.participant_view("p1");
        view.mount(SurfaceId(3));

        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        engine.set_state(ConnectionState::Disconnected);

        assert!(matches!(
            events.next().await,
            Some(SessionEvent::ParticipantJoined(ref p)) if p.sid == "p1"
        ));
        assert!(matches!(events.next().await, Some(SessionEvent::TrackAdded { .. })));
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(3)));
        assert_eq!(
            events.next().await,
            Some(SessionEvent::ConnectionStateChanged(ConnectionState::Disconnected))
        );
        assert_eq!(events.next().await, None);
        assert_eq!(view.binding_state(), BindingState::Unbound);
    }

    #[test]
    fn disconnect_during_connect_wins() {
        let engine = Arc::new(LoopbackEngine::new());
        let renderer = Arc::new(LoopbackRenderer::new());
        let controller = Arc::new(SessionController::new(engine.clone(), renderer));
        let states = Arc::new(StdMutex::new(Vec::new()));
        controller.add_listener(Arc::new(StateCapture { states: states.clone() }));

        let weak = Arc::downgrade(&controller);
        engine.on_next_connect(move || {
            if let Some(controller) = weak.upgrade() {
                controller.disconnect();
            }
        });

        let err = controller.connect("tok", &ConnectOptions::default()).err().unwrap();

        assert!(matches!(err, RoomviewError::InvalidState(_)));
        assert!(controller.session().is_none());
        assert!(!engine.is_connected());
        assert!(engine.disconnect_calls() >= 1);
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            states.lock().unwrap().last(),
            Some(&ConnectionState::Disconnected)
        );
        assert!(controller.connect("tok", &ConnectOptions::default()).is_ok());
    }

    #[test]
    fn late_connect_leaves_newer_session_alone() {
        let engine = Arc::new(LoopbackEngine::new());
        let renderer = Arc::new(LoopbackRenderer::new());
        let controller = Arc::new(SessionController::new(engine.clone(), renderer));

        let nested = Arc::new(StdMutex::new(None));
        let weak = Arc::downgrade(&controller);
        let slot = nested.clone();
        engine.on_next_connect(move || {
            if let Some(controller) = weak.upgrade() {
                controller.disconnect();
                let session = controller.connect("tok", &ConnectOptions::default());
                *slot.lock().unwrap() = Some(session);
            }
        });

        let err = controller.connect("tok", &ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, RoomviewError::InvalidState(_)));

        let newer = nested.lock().unwrap().take().unwrap().unwrap();
        assert!(newer.is_live());
        assert_eq!(controller.session().unwrap().id(), newer.id());
        assert_eq!(controller.connection_state(), ConnectionState::Connected);
        assert!(engine.is_connected());

        engine.join("p1", "alice");
        assert_eq!(controller.dispatch_pending().len(), 1);
        assert!(newer.participant("p1").is_some());
    }

    #[test]
    fn sdk_initializes_on_connect_and_tears_down_after_disconnect() {
        let engine = Arc::new(LoopbackEngine::new());
        let renderer = Arc::new(LoopbackRenderer::new());
        let sdk = Arc::new(Sdk::new());
        let controller = SessionController::with_sdk(engine.clone(), renderer, sdk.clone());

        controller.connect("tok", &ConnectOptions::default()).unwrap();
        assert!(sdk.is_initialized());
        assert_eq!(engine.sdk_inits(), 1);

        controller.disconnect();
        assert!(!sdk.is_initialized());
        assert_eq!(engine.sdk_teardowns(), 1);

        controller.connect("tok", &ConnectOptions::default()).unwrap();
        assert_eq!(engine.sdk_inits(), 2);
        assert_eq!(sdk.generation(), 2);
    }

    #[test]
    fn failed_sdk_init_fails_connect() {
        let engine = Arc::new(LoopbackEngine::new());
        let renderer = Arc::new(LoopbackRenderer::new());
        let sdk = Arc::new(Sdk::new());
        let controller = SessionController::with_sdk(engine.clone(), renderer, sdk.clone());
        engine.fail_sdk_init(true);

        let err = controller.connect("tok", &ConnectOptions::default()).err().unwrap();

        assert!(matches!(err, RoomviewError::FatalEngine(_)));
        assert!(engine.connect_calls().is_empty());
        assert!(!sdk.is_initialized());
        assert!(matches!(
            controller.connection_state(),
            ConnectionState::Failed { .. }
        ));
    }

    #[test]
    fn dropped_reconnect_does_not_consume_attempt_number() {
        let (controller, _, _) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let reconnecting = ConnectionState::Reconnecting { attempt: 0 };

        let mut state = controller.shared.lock();
        state.connection = ConnectionState::Connecting;
        assert_eq!(
            state.apply(SessionEvent::ConnectionStateChanged(reconnecting.clone())),
            None
        );
        state.connection = ConnectionState::Connected;
        assert_eq!(
            state.apply(SessionEvent::ConnectionStateChanged(reconnecting)),
            Some(SessionEvent::ConnectionStateChanged(ConnectionState::Reconnecting {
                attempt: 1
            }))
        );
    }

    #[test]
    fn track_readded_with_new_kind_moves_between_views() {
        let (controller, engine, renderer) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        let camera = controller.participant_view("p1");
        let screen = controller.screen_share_view("p1");
        camera.mount(SurfaceId(1));
        screen.mount(SurfaceId(2));

        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("t1", TrackKind::Video));
        controller.dispatch_pending();
        assert_eq!(camera.binding_state(), BindingState::Bound(SurfaceId(1)));

        engine.add_track("p1", TrackInfo::new("t1", TrackKind::ScreenShare));
        controller.dispatch_pending();

        assert_eq!(camera.binding_state(), BindingState::Unbound);
        assert_eq!(screen.binding_state(), BindingState::Bound(SurfaceId(2)));
        assert_eq!(renderer.showing(SurfaceId(1)), None);
        assert_eq!(renderer.showing(SurfaceId(2)).as_deref(), Some("t1"));
    }

    #[test]
    fn lost_surface_unbinds_view_and_frees_track() {
        let (controller, engine, renderer) = setup();
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        controller.dispatch_pending();

        let older = controller.participant_view("p1");
        let newer = controller.participant_view("p1");
        older.mount(SurfaceId(1));
        newer.mount(SurfaceId(2));
        assert_eq!(older.binding_state(), BindingState::Unbound);
        assert_eq!(newer.binding_state(), BindingState::Bound(SurfaceId(2)));

        renderer.lose_surface(SurfaceId(2));

        assert_eq!(newer.binding_state(), BindingState::Unbound);
        assert_eq!(older.binding_state(), BindingState::Bound(SurfaceId(1)));
        assert_eq!(renderer.showing(SurfaceId(1)).as_deref(), Some("v1"));
        assert_eq!(renderer.showing(SurfaceId(2)), None);
    }

    #[tokio::test]
    async fn stale_stream_ends_after_disconnect() {
        let (controller, engine, _) = setup();
        let session = controller.connect("tok", &ConnectOptions::default()).unwrap();
        let mut events = session.events().unwrap();
        engine.join("p1", "alice");
        controller.disconnect();
        assert_eq!(events.next().await, None);
    }
}
