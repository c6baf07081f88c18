use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::RoomviewError;
use crate::tracks::SurfaceId;

/// Platform side of a binding: attaches a track's output to a surface.
///
/// Called with the core state lock held; implementations must not call back
/// into the session controller.
pub trait SurfaceRenderer: Send + Sync {
    fn attach(&self, track_sid: &str, surface: SurfaceId) -> Result<(), RoomviewError>;
    fn detach(&self, track_sid: &str, surface: SurfaceId);

    /// Called once per controller with the channel on which to report
    /// surfaces that disappear without a [`SurfaceRenderer::detach`].
    /// Renderers whose surfaces only go away through detach can ignore it.
    fn watch_losses(&self, _losses: SurfaceLosses) {}
}

/// Surfaces the platform withdrew on its own.
///
/// Reporting never touches the core state lock, so it is safe from any
/// thread and from inside renderer callbacks. The core applies pending
/// losses the next time it reads or changes its state.
#[derive(Clone, Default)]
pub struct SurfaceLosses {
    lost: Arc<Mutex<Vec<SurfaceId>>>,
}

impl SurfaceLosses {
    pub fn report(&self, surface: SurfaceId) {
        self.lost
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(surface);
    }

    /// True once the controller that owned the other end is gone.
    pub fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.lost) == 1
    }

    pub(crate) fn drain(&self) -> Vec<SurfaceId> {
        std::mem::take(&mut *self.lost.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

/// Two-way map of track ↔ surface bindings.
///
/// A track is bound to at most one surface and a surface renders at most one
/// track. Binding either end again replaces the previous pairing.
pub struct BindingTable {
    renderer: Arc<dyn SurfaceRenderer>,
    by_track: HashMap<String, SurfaceId>,
    by_surface: HashMap<SurfaceId, String>,
}

impl BindingTable {
    pub fn new(renderer: Arc<dyn SurfaceRenderer>) -> Self {
        Self {
            renderer,
            by_track: HashMap::new(),
            by_surface: HashMap::new(),
        }
    }

    /// Bind `track_sid` to `surface`, detaching whatever either side was
    /// bound to first. On renderer failure both ends are left unbound.
    pub fn bind(&mut self, track_sid: &str, surface: SurfaceId) -> Result<(), RoomviewError> {
        if self.surface_of(track_sid) == Some(surface) {
            return Ok(());
        }

        self.unbind_track(track_sid);
        self.unbind_surface(surface);

        self.renderer.attach(track_sid, surface)?;
        self.by_track.insert(track_sid.to_string(), surface);
        self.by_surface.insert(surface, track_sid.to_string());
        tracing::debug!(track_sid, %surface, "track bound");
        Ok(())
    }

    /// Detach a track from its surface. No-op if it was not bound.
    pub fn unbind_track(&mut self, track_sid: &str) -> Option<SurfaceId> {
        let surface = self.by_track.remove(track_sid)?;
        self.by_surface.remove(&surface);
        self.renderer.detach(track_sid, surface);
        tracing::debug!(track_sid, %surface, "track unbound");
        Some(surface)
    }

    /// Detach whatever track a surface renders. No-op if it renders nothing.
    pub fn unbind_surface(&mut self, surface: SurfaceId) -> Option<String> {
        let track_sid = self.by_surface.get(&surface)?.clone();
        self.unbind_track(&track_sid);
        Some(track_sid)
    }

    /// Drop the binding of a surface the platform already tore down,
    /// without asking the renderer to detach.
    pub fn forget_surface(&mut self, surface: SurfaceId) -> Option<String> {
        let track_sid = self.by_surface.remove(&surface)?;
        self.by_track.remove(&track_sid);
        tracing::debug!(%track_sid, %surface, "binding forgotten after surface loss");
        Some(track_sid)
    }

    pub fn surface_of(&self, track_sid: &str) -> Option<SurfaceId> {
        self.by_track.get(track_sid).copied()
    }

    pub fn track_on(&self, surface: SurfaceId) -> Option<&str> {
        self.by_surface.get(&surface).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty()
    }

    /// Detach every binding, e.g. when the session ends.
    pub fn release_all(&mut self) {
        let tracks: Vec<String> = self.by_track.keys().cloned().collect();
        for track_sid in tracks {
            self.unbind_track(&track_sid);
        }
    }
}
