//! Roomview core binding logic.
//!
//! Pure Rust crate with no platform dependencies. Binds the tracks of a
//! native video engine's sessions to platform render surfaces and plays
//! call-progress tones. Consumed by native UI shells via UniFFI bindings.

pub mod binding;
pub mod engine;
pub mod errors;
pub mod events;
pub mod participants;
pub mod sdk;
pub mod session;
pub mod settings;
pub mod tone;
pub mod tracks;
pub mod views;

pub use binding::{BindingTable, SurfaceLosses, SurfaceRenderer};
pub use engine::{ConnectOptions, EngineEventSink, MediaEngine};
pub use errors::RoomviewError;
pub use events::{ConnectionState, ParticipantInfo, SessionEvent, SessionEventListener};
pub use participants::{Participant, Presence};
pub use sdk::{Sdk, SdkGuard};
pub use session::{Session, SessionController, SessionEvents};
pub use settings::{Settings, SettingsStore};
pub use tone::{AudioOutput, ToneBuffer, ToneError, ToneKind, TonePlayer, ToneRequest, ToneSource};
pub use tracks::{BindingState, SurfaceId, TrackInfo, TrackKind};
pub use views::{LocalVideoView, ParticipantView, ScreenShareView, VideoView};
