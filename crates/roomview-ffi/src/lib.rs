//! UniFFI bindings for roomview-core.
//!
//! Provides a VideoClient object that wraps the session controller, the
//! tone player and the settings store into a single FFI-safe interface.
//! The native video engine and the audio device are implemented on the
//! foreign side and handed in as callback traits.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use futures_util::StreamExt;
use roomview_core::{
    self, BindingState as CoreBindingState, ConnectOptions as CoreConnectOptions,
    ConnectionState as CoreConnectionState, EngineEventSink, LocalVideoView as CoreLocalVideoView,
    MediaEngine, Participant as CoreParticipant, ParticipantInfo as CoreParticipantInfo,
    ParticipantView as CoreParticipantView, Presence, RoomviewError as CoreRoomviewError,
    ScreenShareView as CoreScreenShareView, Sdk, SessionController, SessionEvent as CoreSessionEvent,
    SurfaceId, SurfaceRenderer, ToneBuffer, ToneError, ToneKind as CoreToneKind, TonePlayer,
    ToneRequest, TrackInfo as CoreTrackInfo, TrackKind as CoreTrackKind, VideoView,
};

uniffi::setup_scaffolding!();

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using VideoClient.
#[uniffi::export]
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(
                "roomview_core=debug,roomview_ffi=debug,roomview_video=info",
            )
        });
        // A host may already have installed its own subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Disconnected => Self::Disconnected,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Reconnecting { attempt } => Self::Reconnecting { attempt },
            CoreConnectionState::Failed { reason } => Self::Failed { reason },
        }
    }
}

impl From<ConnectionState> for CoreConnectionState {
    fn from(s: ConnectionState) -> Self {
        match s {
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Reconnecting { attempt } => Self::Reconnecting { attempt },
            ConnectionState::Failed { reason } => Self::Failed { reason },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum TrackKind {
    Audio,
    Video,
    ScreenShare,
}

impl From<CoreTrackKind> for TrackKind {
    fn from(k: CoreTrackKind) -> Self {
        match k {
            CoreTrackKind::Audio => Self::Audio,
            CoreTrackKind::Video => Self::Video,
            CoreTrackKind::ScreenShare => Self::ScreenShare,
        }
    }
}

impl From<TrackKind> for CoreTrackKind {
    fn from(k: TrackKind) -> Self {
        match k {
            TrackKind::Audio => Self::Audio,
            TrackKind::Video => Self::Video,
            TrackKind::ScreenShare => Self::ScreenShare,
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct TrackInfo {
    pub sid: String,
    pub kind: TrackKind,
    pub enabled: bool,
    pub name: Option<String>,
}

impl From<CoreTrackInfo> for TrackInfo {
    fn from(t: CoreTrackInfo) -> Self {
        Self {
            sid: t.sid,
            kind: t.kind.into(),
            enabled: t.enabled,
            name: t.name,
        }
    }
}

impl From<TrackInfo> for CoreTrackInfo {
    fn from(t: TrackInfo) -> Self {
        Self {
            sid: t.sid,
            kind: t.kind.into(),
            enabled: t.enabled,
            name: t.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
}

impl From<CoreParticipantInfo> for ParticipantInfo {
    fn from(p: CoreParticipantInfo) -> Self {
        Self {
            sid: p.sid,
            identity: p.identity,
            name: p.name,
        }
    }
}

impl From<ParticipantInfo> for CoreParticipantInfo {
    fn from(p: ParticipantInfo) -> Self {
        Self {
            sid: p.sid,
            identity: p.identity,
            name: p.name,
        }
    }
}

/// Snapshot of a participant and the tracks it publishes.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct Participant {
    pub info: ParticipantInfo,
    pub tracks: Vec<TrackInfo>,
    pub present: bool,
}

impl From<CoreParticipant> for Participant {
    fn from(p: CoreParticipant) -> Self {
        Self {
            info: p.info.into(),
            tracks: p.tracks.into_iter().map(Into::into).collect(),
            present: p.presence == Presence::Joined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum SessionEvent {
    ConnectionStateChanged { state: ConnectionState },
    ParticipantJoined { participant: ParticipantInfo },
    ParticipantLeft { participant_sid: String },
    TrackAdded { participant_sid: String, track: TrackInfo },
    TrackRemoved { participant_sid: String, track: TrackInfo },
    TrackEnabled { participant_sid: String, track_sid: String },
    TrackDisabled { participant_sid: String, track_sid: String },
    DominantSpeakerChanged { participant_sid: Option<String> },
}

impl From<CoreSessionEvent> for SessionEvent {
    fn from(e: CoreSessionEvent) -> Self {
        match e {
            CoreSessionEvent::ConnectionStateChanged(s) => Self::ConnectionStateChanged { state: s.into() },
            CoreSessionEvent::ParticipantJoined(p) => Self::ParticipantJoined { participant: p.into() },
            CoreSessionEvent::ParticipantLeft(participant_sid) => Self::ParticipantLeft { participant_sid },
            CoreSessionEvent::TrackAdded { participant_sid, track } => Self::TrackAdded {
                participant_sid,
                track: track.into(),
            },
            CoreSessionEvent::TrackRemoved { participant_sid, track } => Self::TrackRemoved {
                participant_sid,
                track: track.into(),
            },
            CoreSessionEvent::TrackEnabled { participant_sid, track_sid } => {
                Self::TrackEnabled { participant_sid, track_sid }
            }
            CoreSessionEvent::TrackDisabled { participant_sid, track_sid } => {
                Self::TrackDisabled { participant_sid, track_sid }
            }
            CoreSessionEvent::DominantSpeakerChanged(participant_sid) => {
                Self::DominantSpeakerChanged { participant_sid }
            }
        }
    }
}

impl From<SessionEvent> for CoreSessionEvent {
    fn from(e: SessionEvent) -> Self {
        match e {
            SessionEvent::ConnectionStateChanged { state } => Self::ConnectionStateChanged(state.into()),
            SessionEvent::ParticipantJoined { participant } => Self::ParticipantJoined(participant.into()),
            SessionEvent::ParticipantLeft { participant_sid } => Self::ParticipantLeft(participant_sid),
            SessionEvent::TrackAdded { participant_sid, track } => Self::TrackAdded {
                participant_sid,
                track: track.into(),
            },
            SessionEvent::TrackRemoved { participant_sid, track } => Self::TrackRemoved {
                participant_sid,
                track: track.into(),
            },
            SessionEvent::TrackEnabled { participant_sid, track_sid } => {
                Self::TrackEnabled { participant_sid, track_sid }
            }
            SessionEvent::TrackDisabled { participant_sid, track_sid } => {
                Self::TrackDisabled { participant_sid, track_sid }
            }
            SessionEvent::DominantSpeakerChanged { participant_sid } => {
                Self::DominantSpeakerChanged(participant_sid)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum BindingState {
    Unbound,
    Bound { surface_id: u64 },
}

impl From<CoreBindingState> for BindingState {
    fn from(b: CoreBindingState) -> Self {
        match b {
            CoreBindingState::Unbound => Self::Unbound,
            CoreBindingState::Bound(surface) => Self::Bound { surface_id: surface.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ConnectOptions {
    pub room_name: Option<String>,
    pub audio: bool,
    pub video: bool,
    pub dominant_speaker: bool,
    pub network_quality: bool,
}

impl From<CoreConnectOptions> for ConnectOptions {
    fn from(o: CoreConnectOptions) -> Self {
        Self {
            room_name: o.room_name,
            audio: o.audio,
            video: o.video,
            dominant_speaker: o.dominant_speaker,
            network_quality: o.network_quality,
        }
    }
}

impl From<ConnectOptions> for CoreConnectOptions {
    fn from(o: ConnectOptions) -> Self {
        Self {
            room_name: o.room_name,
            audio: o.audio,
            video: o.video,
            dominant_speaker: o.dominant_speaker,
            network_quality: o.network_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ToneKind {
    Ringing,
    Busy,
    Disconnect,
}

impl From<ToneKind> for CoreToneKind {
    fn from(k: ToneKind) -> Self {
        match k {
            ToneKind::Ringing => Self::Ringing,
            ToneKind::Busy => Self::Busy,
            ToneKind::Disconnect => Self::Disconnect,
        }
    }
}

/// Interleaved 16-bit PCM handed to the audio device.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct PcmBuffer {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl From<&ToneBuffer> for PcmBuffer {
    fn from(b: &ToneBuffer) -> Self {
        Self {
            name: b.name().to_string(),
            sample_rate: b.sample_rate(),
            channels: b.channels(),
            samples: b.samples().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct Settings {
    pub audio_on_join: bool,
    pub video_on_join: bool,
    pub dominant_speaker: bool,
    pub network_quality: bool,
    pub tone_volume: f32,
    pub stereo_tones: bool,
    pub max_loadable_tones: u32,
}

impl From<roomview_core::Settings> for Settings {
    fn from(s: roomview_core::Settings) -> Self {
        Self {
            audio_on_join: s.audio_on_join,
            video_on_join: s.video_on_join,
            dominant_speaker: s.dominant_speaker,
            network_quality: s.network_quality,
            tone_volume: s.tone_volume,
            stereo_tones: s.stereo_tones,
            max_loadable_tones: u32::try_from(s.max_loadable_tones).unwrap_or(u32::MAX),
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum RoomviewError {
    #[error("Auth error: {msg}")]
    Auth { msg: String },
    #[error("Network error: {msg}")]
    Network { msg: String },
    #[error("Bind error: {msg}")]
    Bind { msg: String },
    #[error("Engine error: {msg}")]
    FatalEngine { msg: String },
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Tone error: {msg}")]
    Tone { msg: String },
    #[error("Internal error: {msg}")]
    Internal { msg: String },
}

impl From<CoreRoomviewError> for RoomviewError {
    fn from(e: CoreRoomviewError) -> Self {
        tracing::error!("RoomviewError: {e}");
        match e {
            CoreRoomviewError::Auth(msg) => Self::Auth { msg },
            CoreRoomviewError::Network(msg) => Self::Network { msg },
            CoreRoomviewError::Bind(msg) => Self::Bind { msg },
            CoreRoomviewError::FatalEngine(msg) => Self::FatalEngine { msg },
            CoreRoomviewError::InvalidState(msg) => Self::InvalidState { msg },
        }
    }
}

impl From<RoomviewError> for CoreRoomviewError {
    fn from(e: RoomviewError) -> Self {
        match e {
            RoomviewError::Auth { msg } => Self::Auth(msg),
            RoomviewError::Network { msg } => Self::Network(msg),
            RoomviewError::Bind { msg } => Self::Bind(msg),
            RoomviewError::FatalEngine { msg } => Self::FatalEngine(msg),
            RoomviewError::InvalidState { msg } => Self::InvalidState(msg),
            RoomviewError::Tone { msg } | RoomviewError::Internal { msg } => Self::FatalEngine(msg),
        }
    }
}

impl From<ToneError> for RoomviewError {
    fn from(e: ToneError) -> Self {
        tracing::warn!("ToneError: {e}");
        Self::Tone { msg: e.to_string() }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for RoomviewError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Internal { msg: e.reason }
    }
}

// ── Foreign traits ────────────────────────────────────────────────────

/// The platform video SDK. Activity after `connect` is reported back
/// through [`VideoClient::push_engine_event`].
#[uniffi::export(with_foreign)]
pub trait NativeEngine: Send + Sync {
    /// Global SDK setup, run before the first session of the process.
    fn initialize(&self) -> Result<(), RoomviewError>;
    /// Global SDK shutdown, run after the last session ends.
    fn teardown(&self);
    fn connect(&self, token: String, options: ConnectOptions) -> Result<ParticipantInfo, RoomviewError>;
    fn disconnect(&self);
}

#[uniffi::export(with_foreign)]
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Platform audio device used for call-progress tones.
#[uniffi::export(with_foreign)]
pub trait AudioDevice: Send + Sync {
    fn play_buffer(
        &self,
        buffer: PcmBuffer,
        looping: bool,
        volume: f32,
        playback_speed: f32,
    ) -> Result<(), RoomviewError>;
    fn pause(&self);
    fn set_volume(&self, volume: f32);
    fn set_playback_speed(&self, playback_speed: f32);
    fn make_stereo(&self, stereo: bool);
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn SessionListener>,
}

impl roomview_core::SessionEventListener for BridgeListener {
    fn on_event(&self, event: CoreSessionEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

/// Holds the sink of the session being opened or running, so events the
/// foreign engine pushes reach it.
struct BridgeEngine {
    native: Arc<dyn NativeEngine>,
    sink: StdMutex<Option<EngineEventSink>>,
}

impl BridgeEngine {
    fn lock_sink(&self) -> MutexGuard<'_, Option<EngineEventSink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: CoreSessionEvent) -> bool {
        match self.lock_sink().as_ref() {
            Some(sink) => sink.push(event),
            None => false,
        }
    }
}

impl MediaEngine for BridgeEngine {
    fn initialize(&self) -> Result<(), CoreRoomviewError> {
        Ok(self.native.initialize()?)
    }

    fn teardown(&self) {
        self.native.teardown();
    }

    fn connect(
        &self,
        token: &str,
        options: &CoreConnectOptions,
        sink: EngineEventSink,
    ) -> Result<CoreParticipantInfo, CoreRoomviewError> {
        *self.lock_sink() = Some(sink);
        match self.native.connect(token.to_string(), options.clone().into()) {
            Ok(local) => Ok(local.into()),
            Err(e) => {
                *self.lock_sink() = None;
                Err(e.into())
            }
        }
    }

    fn disconnect(&self) {
        self.native.disconnect();
        *self.lock_sink() = None;
    }
}

struct BridgeAudio {
    device: Arc<dyn AudioDevice>,
}

impl roomview_core::AudioOutput for BridgeAudio {
    fn play_buffer(
        &self,
        buffer: &ToneBuffer,
        looping: bool,
        volume: f32,
        playback_speed: f32,
    ) -> Result<(), ToneError> {
        self.device
            .play_buffer(buffer.into(), looping, volume, playback_speed)
            .map_err(|e| ToneError::Output(e.to_string()))
    }

    fn pause(&self) {
        self.device.pause();
    }

    fn set_volume(&self, volume: f32) {
        self.device.set_volume(volume);
    }

    fn set_playback_speed(&self, playback_speed: f32) {
        self.device.set_playback_speed(playback_speed);
    }

    fn make_stereo(&self, stereo: bool) {
        self.device.make_stereo(stereo);
    }
}

// ── Views ─────────────────────────────────────────────────────────────

/// The local camera preview.
#[derive(uniffi::Object)]
pub struct LocalVideoView {
    inner: CoreLocalVideoView,
}

#[uniffi::export]
impl LocalVideoView {
    pub fn mount(&self, surface_id: u64) {
        self.inner.mount(SurfaceId(surface_id));
    }

    pub fn unmount(&self) {
        self.inner.unmount();
    }

    pub fn on_track_changed(&self, participant_sid: String, track: TrackInfo) {
        self.inner.on_track_changed(&participant_sid, &track.into());
    }

    pub fn binding_state(&self) -> BindingState {
        self.inner.binding_state().into()
    }

    pub fn bound_track(&self) -> Option<String> {
        self.inner.bound_track()
    }
}

/// A remote participant's camera.
#[derive(uniffi::Object)]
pub struct ParticipantView {
    inner: CoreParticipantView,
}

#[uniffi::export]
impl ParticipantView {
    pub fn mount(&self, surface_id: u64) {
        self.inner.mount(SurfaceId(surface_id));
    }

    pub fn unmount(&self) {
        self.inner.unmount();
    }

    pub fn on_track_changed(&self, participant_sid: String, track: TrackInfo) {
        self.inner.on_track_changed(&participant_sid, &track.into());
    }

    pub fn binding_state(&self) -> BindingState {
        self.inner.binding_state().into()
    }

    pub fn bound_track(&self) -> Option<String> {
        self.inner.bound_track()
    }

    pub fn set_participant(&self, participant_sid: String) {
        self.inner.set_participant(&participant_sid);
    }
}

/// A participant's screen share, or the local one.
#[derive(uniffi::Object)]
pub struct ScreenShareView {
    inner: CoreScreenShareView,
}

#[uniffi::export]
impl ScreenShareView {
    pub fn mount(&self, surface_id: u64) {
        self.inner.mount(SurfaceId(surface_id));
    }

    pub fn unmount(&self) {
        self.inner.unmount();
    }

    pub fn on_track_changed(&self, participant_sid: String, track: TrackInfo) {
        self.inner.on_track_changed(&participant_sid, &track.into());
    }

    pub fn binding_state(&self) -> BindingState {
        self.inner.binding_state().into()
    }

    pub fn bound_track(&self) -> Option<String> {
        self.inner.bound_track()
    }

    pub fn is_sharing(&self) -> bool {
        self.inner.is_sharing()
    }
}

// ── VideoClient: main FFI object ──────────────────────────────────────

#[derive(uniffi::Object)]
pub struct VideoClient {
    controller: SessionController,
    engine: Arc<BridgeEngine>,
    tones: TonePlayer,
    settings: roomview_core::SettingsStore,
    rt: tokio::runtime::Runtime,
}

impl VideoClient {
    fn with_renderer(
        data_dir: &str,
        engine: Arc<dyn NativeEngine>,
        audio: Arc<dyn AudioDevice>,
        renderer: Arc<dyn SurfaceRenderer>,
        sdk: Arc<Sdk>,
    ) -> Result<Self, RoomviewError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| RoomviewError::Internal {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let settings = roomview_core::SettingsStore::new(data_dir);
        let defaults = settings.get();

        let engine = Arc::new(BridgeEngine {
            native: engine,
            sink: StdMutex::new(None),
        });
        let controller = SessionController::with_sdk(engine.clone(), renderer, sdk);

        let tones = TonePlayer::new(Arc::new(BridgeAudio { device: audio.clone() }));
        tones.initialize(defaults.max_loadable_tones, defaults.stereo_tones);
        tones.set_volume(defaults.tone_volume);

        tracing::debug!(data_dir, "VideoClient created");
        Ok(Self {
            controller,
            engine,
            tones,
            settings,
            rt,
        })
    }
}

#[uniffi::export]
impl VideoClient {
    /// Create a client rendering through the process-wide native renderer
    /// that `roomview_video_*` C entry points configure.
    #[uniffi::constructor]
    pub fn new(
        data_dir: String,
        engine: Arc<dyn NativeEngine>,
        audio: Arc<dyn AudioDevice>,
    ) -> Result<Arc<Self>, RoomviewError> {
        let renderer = roomview_video::NativeRenderer::global();
        Self::with_renderer(&data_dir, engine, audio, renderer, Sdk::global()).map(Arc::new)
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.controller.add_listener(Arc::new(BridgeListener {
            ffi_listener: listener,
        }));
    }

    /// Connect with options seeded from the stored settings.
    pub fn connect(&self, token: String, room_name: Option<String>) -> Result<String, RoomviewError> {
        let options = self.settings.get().connect_options(room_name);
        self.connect_with_options(token, options.into())
    }

    /// Open a session and start applying its events in the background.
    /// Returns the session id.
    pub fn connect_with_options(
        &self,
        token: String,
        options: ConnectOptions,
    ) -> Result<String, RoomviewError> {
        let options: CoreConnectOptions = options.into();

        // Panics must not unwind across the FFI boundary.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.controller.connect(&token, &options)
        }));

        let session = match result {
            Ok(res) => res?,
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("connect() panicked: {msg}");
                return Err(RoomviewError::Internal {
                    msg: format!("panic in connect: {msg}"),
                });
            }
        };

        if let Some(mut events) = session.events() {
            self.rt.spawn(async move {
                while events.next().await.is_some() {}
                tracing::debug!(session_id = events.session_id(), "event pump finished");
            });
        }
        Ok(session.id().to_string())
    }

    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.controller.connection_state().into()
    }

    pub fn session_id(&self) -> Option<String> {
        self.controller.session().map(|s| s.id().to_string())
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.controller
            .participants()
            .into_iter()
            .map(Into::into)
            .collect()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.controller
            .session()
            .and_then(|s| s.local_participant())
            .map(Into::into)
    }

    pub fn dominant_speaker(&self) -> Option<String> {
        self.controller.session().and_then(|s| s.dominant_speaker())
    }

    /// Entry point for the foreign engine's callbacks. Returns false when
    /// no session is open to receive the event.
    pub fn push_engine_event(&self, event: SessionEvent) -> bool {
        self.engine.push(event.into())
    }

    pub fn local_view(&self) -> Arc<LocalVideoView> {
        Arc::new(LocalVideoView {
            inner: self.controller.local_view(),
        })
    }

    pub fn participant_view(&self, participant_sid: String) -> Arc<ParticipantView> {
        Arc::new(ParticipantView {
            inner: self.controller.participant_view(&participant_sid),
        })
    }

    pub fn screen_share_view(&self, participant_sid: String) -> Arc<ScreenShareView> {
        Arc::new(ScreenShareView {
            inner: self.controller.screen_share_view(&participant_sid),
        })
    }

    pub fn local_screen_share_view(&self) -> Arc<ScreenShareView> {
        Arc::new(ScreenShareView {
            inner: self.controller.local_screen_share_view(),
        })
    }

    // ── Tones ──

    pub fn play_tone(&self, kind: ToneKind) -> Result<(), RoomviewError> {
        Ok(self.tones.play(kind.into())?)
    }

    /// Play a preloaded buffer once, or on repeat.
    pub fn play_named_tone(&self, name: String, looping: bool) -> Result<(), RoomviewError> {
        let request = ToneRequest {
            looping,
            ..ToneRequest::named(name)
        };
        Ok(self.tones.play_with(request)?)
    }

    pub fn preload_tone(&self, buffer: PcmBuffer) -> Result<(), RoomviewError> {
        let buffer = ToneBuffer::new(buffer.name, buffer.sample_rate, buffer.channels, buffer.samples)?;
        Ok(self.tones.preload(buffer)?)
    }

    /// Load a WAV file as a named tone. Returns the name to play it by.
    pub fn preload_tone_file(&self, path: String) -> Result<String, RoomviewError> {
        Ok(self.tones.preload_file(std::path::Path::new(&path))?)
    }

    pub fn release_tone(&self, name: String) {
        self.tones.release(&name);
    }

    pub fn stop_tone(&self) {
        self.tones.stop();
    }

    pub fn is_tone_playing(&self) -> bool {
        self.tones.is_playing()
    }

    pub fn set_tone_volume(&self, volume: f32) {
        self.tones.set_volume(volume);
        self.settings.set_tone_volume(volume);
    }

    pub fn set_tone_playback_speed(&self, playback_speed: f32) {
        self.tones.set_playback_speed(playback_speed);
    }

    // ── Settings ──

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    pub fn set_audio_on_join(&self, enabled: bool) {
        self.settings.set_audio_on_join(enabled);
    }

    pub fn set_video_on_join(&self, enabled: bool) {
        self.settings.set_video_on_join(enabled);
    }

    pub fn set_dominant_speaker(&self, enabled: bool) {
        self.settings.update(|s| s.dominant_speaker = enabled);
    }

    pub fn set_network_quality(&self, enabled: bool) {
        self.settings.update(|s| s.network_quality = enabled);
    }
}
