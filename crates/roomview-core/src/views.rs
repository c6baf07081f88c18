//! Renderable views over session tracks.
//!
//! A view is mounted on one platform surface and shows the first enabled
//! track of its kind published by its target participant. The desired
//! binding is re-derived from the participant registry every time anything
//! changes, so mount/unmount and engine events can arrive in any order.

use std::sync::Arc;

use crate::participants::ParticipantRegistry;
use crate::session::{CoreState, Shared};
use crate::tracks::{BindingState, SurfaceId, TrackInfo, TrackKind};

/// Lifecycle shared by every view kind.
pub trait VideoView {
    /// Show this view's track on `surface`, replacing any prior surface.
    fn mount(&self, surface: SurfaceId);
    /// Release the surface. Idempotent.
    fn unmount(&self);
    /// Re-evaluate the binding after `track` of `participant_sid` changed.
    fn on_track_changed(&self, participant_sid: &str, track: &TrackInfo);
    fn binding_state(&self) -> BindingState;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ViewTarget {
    Local,
    Participant(String),
}

impl ViewTarget {
    pub(crate) fn participant_sid<'a>(&'a self, registry: &'a ParticipantRegistry) -> Option<&'a str> {
        match self {
            ViewTarget::Local => registry.local_sid(),
            ViewTarget::Participant(sid) => Some(sid),
        }
    }
}

pub(crate) struct ViewSlot {
    pub(crate) id: u64,
    pub(crate) target: ViewTarget,
    pub(crate) kind: TrackKind,
    pub(crate) surface: Option<SurfaceId>,
    /// Track this view last bound; authoritative state is the binding table.
    pub(crate) bound_track: Option<String>,
}

fn desired_track(slot: &ViewSlot, registry: &ParticipantRegistry) -> Option<String> {
    slot.target
        .participant_sid(registry)
        .and_then(|sid| registry.lookup(sid))
        .and_then(|p| p.renderable_track(slot.kind))
        .map(|t| t.sid.clone())
}

/// Bring one view's binding in line with the registry.
pub(crate) fn reconcile(state: &mut CoreState, idx: usize) {
    let CoreState {
        views,
        registry,
        bindings,
        ..
    } = state;
    let slot = &mut views[idx];

    let Some(surface) = slot.surface else {
        slot.bound_track = None;
        return;
    };

    let desired = desired_track(slot, registry);

    match desired {
        None => {
            bindings.unbind_surface(surface);
            slot.bound_track = None;
        }
        Some(track_sid) => match bindings.bind(&track_sid, surface) {
            Ok(()) => slot.bound_track = Some(track_sid),
            Err(e) => {
                tracing::warn!(view = slot.id, %surface, %track_sid, "bind failed, view stays unbound: {e}");
                slot.bound_track = None;
            }
        },
    }
}

/// Hand a track that no surface shows any more to the most recently
/// registered mounted view that wants it.
pub(crate) fn rebind_freed(state: &mut CoreState, track_sid: &str) {
    if state.bindings.surface_of(track_sid).is_some() {
        return;
    }
    let candidates: Vec<usize> = (0..state.views.len())
        .rev()
        .filter(|&idx| {
            let slot = &state.views[idx];
            slot.surface.is_some() && desired_track(slot, &state.registry).as_deref() == Some(track_sid)
        })
        .collect();
    for idx in candidates {
        reconcile(state, idx);
        if state.bindings.surface_of(track_sid).is_some() {
            tracing::debug!(view = state.views[idx].id, %track_sid, "freed track rebound");
            return;
        }
    }
}

/// Registration of one view in the shared state. Dropping it unmounts.
struct ViewHandle {
    id: u64,
    shared: Arc<Shared>,
}

impl ViewHandle {
    fn register(shared: Arc<Shared>, target: ViewTarget, kind: TrackKind) -> Self {
        let id = {
            let mut state = shared.lock();
            let id = state.next_view_id;
            state.next_view_id += 1;
            state.views.push(ViewSlot {
                id,
                target,
                kind,
                surface: None,
                bound_track: None,
            });
            id
        };
        Self { id, shared }
    }

    fn index(state: &CoreState, id: u64) -> Option<usize> {
        state.views.iter().position(|v| v.id == id)
    }

    fn mount(&self, surface: SurfaceId) {
        let mut state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return;
        };

        let mut freed: Vec<String> = state.bindings.track_on(surface).map(str::to_string).into_iter().collect();
        if let Some(previous) = state.views[idx].surface.filter(|s| *s != surface) {
            freed.extend(state.bindings.unbind_surface(previous));
        }

        // The surface now belongs to this view alone.
        for other in 0..state.views.len() {
            if other != idx && state.views[other].surface == Some(surface) {
                tracing::debug!(view = state.views[other].id, %surface, "surface taken over by another view");
                state.views[other].surface = None;
                state.views[other].bound_track = None;
            }
        }

        state.views[idx].surface = Some(surface);
        tracing::debug!(view = self.id, %surface, "view mounted");
        reconcile(&mut state, idx);
        for track_sid in freed {
            rebind_freed(&mut state, &track_sid);
        }
    }

    fn unmount(&self) {
        let mut state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return;
        };
        state.views[idx].bound_track = None;
        if let Some(surface) = state.views[idx].surface.take() {
            let freed = state.bindings.unbind_surface(surface);
            tracing::debug!(view = self.id, %surface, "view unmounted");
            if let Some(track_sid) = freed {
                rebind_freed(&mut state, &track_sid);
            }
        }
    }

    fn on_track_changed(&self, participant_sid: &str, track: &TrackInfo) {
        let mut state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return;
        };
        let slot = &state.views[idx];
        if slot.kind != track.kind || slot.target.participant_sid(&state.registry) != Some(participant_sid) {
            return;
        }
        reconcile(&mut state, idx);
    }

    fn binding_state(&self) -> BindingState {
        let state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return BindingState::Unbound;
        };
        let slot = &state.views[idx];
        match (slot.surface, slot.bound_track.as_deref()) {
            (Some(surface), Some(track)) if state.bindings.surface_of(track) == Some(surface) => {
                BindingState::Bound(surface)
            }
            _ => BindingState::Unbound,
        }
    }

    fn bound_track(&self) -> Option<String> {
        let state = self.shared.lock();
        let idx = Self::index(&state, self.id)?;
        let slot = &state.views[idx];
        let surface = slot.surface?;
        let track = slot.bound_track.as_deref()?;
        (state.bindings.surface_of(track) == Some(surface)).then(|| track.to_string())
    }

    fn retarget(&self, target: ViewTarget) {
        let mut state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return;
        };
        if state.views[idx].target == target {
            return;
        }
        state.views[idx].target = target;
        let previous = state.views[idx].bound_track.clone();
        reconcile(&mut state, idx);
        if let Some(track_sid) = previous {
            rebind_freed(&mut state, &track_sid);
        }
    }

    fn target_has_track(&self, kind: TrackKind) -> bool {
        let state = self.shared.lock();
        let Some(idx) = Self::index(&state, self.id) else {
            return false;
        };
        state.views[idx]
            .target
            .participant_sid(&state.registry)
            .and_then(|sid| state.registry.lookup(sid))
            .is_some_and(|p| p.has_track(kind))
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        self.unmount();
        let mut state = self.shared.lock();
        state.views.retain(|v| v.id != self.id);
    }
}

/// The local user's camera preview.
pub struct LocalVideoView {
    handle: ViewHandle,
}

impl LocalVideoView {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            handle: ViewHandle::register(shared, ViewTarget::Local, TrackKind::Video),
        }
    }

    /// SID of the track currently rendered, if any.
    pub fn bound_track(&self) -> Option<String> {
        self.handle.bound_track()
    }
}

/// A remote participant's camera.
pub struct ParticipantView {
    handle: ViewHandle,
}

impl ParticipantView {
    pub(crate) fn new(shared: Arc<Shared>, participant_sid: &str) -> Self {
        Self {
            handle: ViewHandle::register(
                shared,
                ViewTarget::Participant(participant_sid.to_string()),
                TrackKind::Video,
            ),
        }
    }

    /// Point the view at another participant, rebinding if mounted.
    pub fn set_participant(&self, participant_sid: &str) {
        self.handle
            .retarget(ViewTarget::Participant(participant_sid.to_string()));
    }

    pub fn bound_track(&self) -> Option<String> {
        self.handle.bound_track()
    }
}

/// A participant's screen share. Screen tracks come and go while the
/// participant stays in the session.
pub struct ScreenShareView {
    handle: ViewHandle,
}

impl ScreenShareView {
    /// `None` targets the local user's own share.
    pub(crate) fn new(shared: Arc<Shared>, participant_sid: Option<&str>) -> Self {
        let target = match participant_sid {
            Some(sid) => ViewTarget::Participant(sid.to_string()),
            None => ViewTarget::Local,
        };
        Self {
            handle: ViewHandle::register(shared, target, TrackKind::ScreenShare),
        }
    }

    /// Whether the target currently publishes a screen-share track.
    pub fn is_sharing(&self) -> bool {
        self.handle.target_has_track(TrackKind::ScreenShare)
    }

    pub fn bound_track(&self) -> Option<String> {
        self.handle.bound_track()
    }
}

macro_rules! impl_video_view {
    ($($view:ty),*) => {
        $(
            impl VideoView for $view {
                fn mount(&self, surface: SurfaceId) {
                    self.handle.mount(surface);
                }

                fn unmount(&self) {
                    self.handle.unmount();
                }

                fn on_track_changed(&self, participant_sid: &str, track: &TrackInfo) {
                    self.handle.on_track_changed(participant_sid, track);
                }

                fn binding_state(&self) -> BindingState {
                    self.handle.binding_state()
                }
            }
        )*
    };
}

impl_video_view!(LocalVideoView, ParticipantView, ScreenShareView);
