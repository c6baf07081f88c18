//! Platform surface renderer with raw C FFI.
//!
//! Native UI shells register their render targets (an `ANativeWindow*`, a
//! `UIView*`/`CALayer*`, ...) under a numeric surface id and install a pair
//! of attach/detach callbacks. The binding layer then asks this crate to
//! attach a track to a surface id; the native SDK does the actual frame
//! delivery inside the callback.
//!
//! This crate bypasses UniFFI so surface pointers never cross a serializing
//! boundary.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use roomview_core::{RoomviewError, SurfaceId, SurfaceLosses, SurfaceRenderer};

// ---------------------------------------------------------------------------
// Send-able surface pointer wrapper
// ---------------------------------------------------------------------------

/// Wrapper around `*mut c_void` that implements `Send`.
///
/// # Safety
/// The platform guarantees that the surface pointer stays valid from
/// `roomview_video_register_surface` until `roomview_video_unregister_surface`
/// and that it is only dereferenced by the platform callbacks.
#[derive(Debug, Clone, Copy)]
struct SurfacePtr(*mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side; it is handed
// back to the platform callbacks, which synchronise access themselves.
unsafe impl Send for SurfacePtr {}

// ---------------------------------------------------------------------------
// Platform callbacks
// ---------------------------------------------------------------------------

/// Attach: (track_sid, surface_id, surface, user_data) -> 0 on success.
pub type AttachCallback = unsafe extern "C" fn(
    track_sid: *const c_char,
    surface_id: u64,
    surface: *mut c_void,
    user_data: *mut c_void,
) -> i32;

/// Detach: (track_sid, surface_id, surface, user_data).
pub type DetachCallback = unsafe extern "C" fn(
    track_sid: *const c_char,
    surface_id: u64,
    surface: *mut c_void,
    user_data: *mut c_void,
);

#[derive(Clone, Copy)]
struct PlatformCallbacks {
    attach: AttachCallback,
    detach: DetachCallback,
    user_data: *mut c_void,
}

// SAFETY: callbacks and user_data are installed from the platform main thread
// and stay valid for the application's lifetime. They are invoked from
// whichever thread applies session events; the platform side synchronises.
unsafe impl Send for PlatformCallbacks {}

#[derive(Default)]
struct Registry {
    callbacks: Option<PlatformCallbacks>,
    surfaces: HashMap<SurfaceId, SurfacePtr>,
    /// track SID -> surface it is attached to
    attached: HashMap<String, SurfaceId>,
    /// Controllers to tell when a surface goes away under a binding.
    losses: Vec<SurfaceLosses>,
}

impl Registry {
    /// Forget the attachment of `track_sid` to `surface` and return the
    /// platform call that undoes it. The caller runs it after unlocking.
    fn take_detach(&mut self, track_sid: &str, surface: SurfaceId) -> Option<PendingDetach> {
        if self.attached.get(track_sid) != Some(&surface) {
            return None;
        }
        self.attached.remove(track_sid);
        let callbacks = self.callbacks?;
        let ptr = self.surfaces.get(&surface).copied()?;
        Some(PendingDetach {
            track_sid: track_sid.to_string(),
            surface,
            ptr,
            callbacks,
        })
    }
}

struct PendingDetach {
    track_sid: String,
    surface: SurfaceId,
    ptr: SurfacePtr,
    callbacks: PlatformCallbacks,
}

impl PendingDetach {
    fn run(self) {
        let Ok(sid) = CString::new(self.track_sid) else {
            return;
        };
        unsafe {
            (self.callbacks.detach)(sid.as_ptr(), self.surface.0, self.ptr.0, self.callbacks.user_data)
        };
    }
}

/// Renders bound tracks through platform-registered callbacks.
///
/// Platform callbacks run without the registry lock held, so they may query
/// the renderer from any thread.
#[derive(Default)]
pub struct NativeRenderer {
    registry: Mutex<Registry>,
}

static GLOBAL: OnceLock<Arc<NativeRenderer>> = OnceLock::new();

impl NativeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide renderer the C entry points operate on.
    pub fn global() -> Arc<NativeRenderer> {
        GLOBAL.get_or_init(|| Arc::new(NativeRenderer::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install the platform callbacks, replacing any previous pair.
    ///
    /// # Safety
    /// - `attach`/`detach` must be valid for the renderer's lifetime.
    /// - `user_data` must remain valid for as long as the callbacks may run.
    pub unsafe fn set_callbacks(
        &self,
        attach: AttachCallback,
        detach: DetachCallback,
        user_data: *mut c_void,
    ) {
        self.lock().callbacks = Some(PlatformCallbacks {
            attach,
            detach,
            user_data,
        });
    }

    /// Make `surface` available under `id`.
    ///
    /// # Safety
    /// `surface` must stay valid until [`NativeRenderer::unregister_surface`].
    pub unsafe fn register_surface(&self, id: SurfaceId, surface: *mut c_void) {
        self.lock().surfaces.insert(id, SurfacePtr(surface));
        tracing::debug!(%id, "surface registered");
    }

    /// Forget a surface, detaching whatever track it still shows. Watching
    /// controllers learn about the loss on their next state access.
    pub fn unregister_surface(&self, id: SurfaceId) {
        let (detaches, watchers) = {
            let mut registry = self.lock();
            let still_attached: Vec<String> = registry
                .attached
                .iter()
                .filter(|(_, s)| **s == id)
                .map(|(t, _)| t.clone())
                .collect();
            let detaches: Vec<PendingDetach> = still_attached
                .iter()
                .filter_map(|track_sid| {
                    tracing::warn!(%id, %track_sid, "surface unregistered while bound");
                    registry.take_detach(track_sid, id)
                })
                .collect();
            registry.surfaces.remove(&id);
            registry.losses.retain(|losses| !losses.is_orphaned());
            (detaches, registry.losses.clone())
        };
        for detach in detaches {
            detach.run();
        }
        for losses in watchers {
            losses.report(id);
        }
        tracing::debug!(%id, "surface unregistered");
    }

    pub fn is_registered(&self, id: SurfaceId) -> bool {
        self.lock().surfaces.contains_key(&id)
    }

    /// Surface each track is currently attached to.
    pub fn attached(&self) -> HashMap<String, SurfaceId> {
        self.lock().attached.clone()
    }
}

impl SurfaceRenderer for NativeRenderer {
    fn attach(&self, track_sid: &str, surface: SurfaceId) -> Result<(), RoomviewError> {
        let (cb, ptr) = {
            let registry = self.lock();
            let cb = registry
                .callbacks
                .ok_or_else(|| RoomviewError::Bind("no platform renderer registered".into()))?;
            let ptr = registry
                .surfaces
                .get(&surface)
                .copied()
                .ok_or_else(|| RoomviewError::Bind(format!("{surface} not registered")))?;
            (cb, ptr)
        };
        let sid = CString::new(track_sid)
            .map_err(|_| RoomviewError::Bind(format!("track sid {track_sid:?} contains NUL")))?;

        let rc = unsafe { (cb.attach)(sid.as_ptr(), surface.0, ptr.0, cb.user_data) };
        if rc != 0 {
            return Err(RoomviewError::Bind(format!(
                "platform refused {surface} for {track_sid} (code {rc})"
            )));
        }

        let mut registry = self.lock();
        if !registry.surfaces.contains_key(&surface) {
            drop(registry);
            unsafe { (cb.detach)(sid.as_ptr(), surface.0, ptr.0, cb.user_data) };
            return Err(RoomviewError::Bind(format!(
                "{surface} unregistered while attaching {track_sid}"
            )));
        }
        registry.attached.insert(track_sid.to_string(), surface);
        drop(registry);
        tracing::info!(track_sid, %surface, "renderer attached");
        Ok(())
    }

    fn detach(&self, track_sid: &str, surface: SurfaceId) {
        let pending = self.lock().take_detach(track_sid, surface);
        if let Some(detach) = pending {
            detach.run();
            tracing::info!(track_sid, %surface, "renderer detached");
        }
    }

    fn watch_losses(&self, losses: SurfaceLosses) {
        self.lock().losses.push(losses);
    }
}

// ---------------------------------------------------------------------------
// C FFI entry points
// ---------------------------------------------------------------------------

/// Install the platform attach/detach callbacks on the global renderer.
///
/// # Safety
/// - `attach` and `detach` must point to functions with the matching
///   signatures that stay valid for the application's lifetime.
/// - `user_data` must remain valid for the application's lifetime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn roomview_video_set_callbacks(
    attach: AttachCallback,
    detach: DetachCallback,
    user_data: *mut c_void,
) {
    unsafe { NativeRenderer::global().set_callbacks(attach, detach, user_data) };
}

/// Register a native render target under `surface_id`.
///
/// # Safety
/// `surface` must be a valid platform surface handle until
/// `roomview_video_unregister_surface` is called for the same id.
///
/// Returns 0 on success, -1 on a null surface.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn roomview_video_register_surface(surface_id: u64, surface: *mut c_void) -> i32 {
    if surface.is_null() {
        return -1;
    }
    unsafe { NativeRenderer::global().register_surface(SurfaceId(surface_id), surface) };
    0
}

/// Forget a render target, detaching any track still shown on it.
#[unsafe(no_mangle)]
pub extern "C" fn roomview_video_unregister_surface(surface_id: u64) {
    NativeRenderer::global().unregister_surface(SurfaceId(surface_id));
}

/// Whether `track_sid` is currently attached to any surface.
///
/// # Safety
/// `track_sid` must be a valid null-terminated C string.
///
/// Returns 1 if attached, 0 if not, -1 on invalid arguments.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn roomview_video_is_attached(track_sid: *const c_char) -> i32 {
    if track_sid.is_null() {
        return -1;
    }
    let sid = match unsafe { CStr::from_ptr(track_sid) }.to_str() {
        Ok(s) => s,
        Err(_) => return -1,
    };
    i32::from(NativeRenderer::global().lock().attached.contains_key(sid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Callback log shared through `user_data`.
    #[derive(Default)]
    struct Log {
        events: StdMutex<Vec<(String, String, u64)>>,
        refuse: StdMutex<Option<u64>>,
    }

    unsafe extern "C" fn on_attach(
        track_sid: *const c_char,
        surface_id: u64,
        _surface: *mut c_void,
        user_data: *mut c_void,
    ) -> i32 {
        let log = unsafe { &*(user_data as *const Log) };
        if *log.refuse.lock().unwrap() == Some(surface_id) {
            return 7;
        }
        let sid = unsafe { CStr::from_ptr(track_sid) }.to_str().unwrap().to_string();
        log.events.lock().unwrap().push(("attach".into(), sid, surface_id));
        0
    }

    unsafe extern "C" fn on_detach(
        track_sid: *const c_char,
        surface_id: u64,
        _surface: *mut c_void,
        user_data: *mut c_void,
    ) {
        let log = unsafe { &*(user_data as *const Log) };
        let sid = unsafe { CStr::from_ptr(track_sid) }.to_str().unwrap().to_string();
        log.events.lock().unwrap().push(("detach".into(), sid, surface_id));
    }

    fn renderer_with_log(log: &Log) -> NativeRenderer {
        let renderer = NativeRenderer::new();
        unsafe {
            renderer.set_callbacks(on_attach, on_detach, log as *const Log as *mut c_void);
        }
        renderer
    }

    fn dummy_surface() -> *mut c_void {
        std::ptr::NonNull::<u8>::dangling().as_ptr().cast()
    }

    #[test]
    fn attach_without_callbacks_is_a_bind_error() {
        let renderer = NativeRenderer::new();
        unsafe { renderer.register_surface(SurfaceId(1), dummy_surface()) };
        let err = renderer.attach("v1", SurfaceId(1)).unwrap_err();
        assert!(matches!(err, RoomviewError::Bind(_)));
    }

    #[test]
    fn attach_to_unregistered_surface_fails() {
        let log = Log::default();
        let renderer = renderer_with_log(&log);
        assert!(renderer.attach("v1", SurfaceId(42)).is_err());
        assert!(log.events.lock().unwrap().is_empty());
    }

    #[test]
    fn attach_and_detach_reach_platform() {
        let log = Log::default();
        let renderer = renderer_with_log(&log);
        unsafe { renderer.register_surface(SurfaceId(1), dummy_surface()) };

        renderer.attach("v1", SurfaceId(1)).unwrap();
        assert_eq!(renderer.attached().get("v1"), Some(&SurfaceId(1)));
        renderer.detach("v1", SurfaceId(1));
        renderer.detach("v1", SurfaceId(1));

        assert_eq!(
            *log.events.lock().unwrap(),
            vec![
                ("attach".to_string(), "v1".to_string(), 1),
                ("detach".to_string(), "v1".to_string(), 1),
            ]
        );
        assert!(renderer.attached().is_empty());
    }

    #[test]
    fn platform_refusal_is_reported() {
        let log = Log::default();
        *log.refuse.lock().unwrap() = Some(3);
        let renderer = renderer_with_log(&log);
        unsafe { renderer.register_surface(SurfaceId(3), dummy_surface()) };

        let err = renderer.attach("v1", SurfaceId(3)).unwrap_err();
        assert!(err.to_string().contains("code 7"));
        assert!(renderer.attached().is_empty());
    }

    #[test]
    fn unregistering_bound_surface_detaches() {
        let log = Log::default();
        let renderer = renderer_with_log(&log);
        unsafe { renderer.register_surface(SurfaceId(5), dummy_surface()) };
        renderer.attach("v5", SurfaceId(5)).unwrap();

        renderer.unregister_surface(SurfaceId(5));

        assert!(!renderer.is_registered(SurfaceId(5)));
        assert!(renderer.attached().is_empty());
        assert_eq!(log.events.lock().unwrap().last().unwrap().0, "detach");
    }

    /// Context whose attach callback reads the renderer from another thread.
    #[derive(Default)]
    struct Reentrant {
        renderer: OnceLock<Arc<NativeRenderer>>,
    }

    unsafe extern "C" fn attach_reading_registry(
        _track_sid: *const c_char,
        _surface_id: u64,
        _surface: *mut c_void,
        user_data: *mut c_void,
    ) -> i32 {
        let ctx = unsafe { &*(user_data as *const Reentrant) };
        let Some(renderer) = ctx.renderer.get().cloned() else {
            return 1;
        };
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(renderer.is_registered(SurfaceId(1)));
        });
        match rx.recv_timeout(std::time::Duration::from_secs(1)) {
            Ok(true) => 0,
            _ => 9,
        }
    }

    #[test]
    fn callbacks_may_query_renderer() {
        let ctx = Reentrant::default();
        let renderer = Arc::new(NativeRenderer::new());
        ctx.renderer.set(renderer.clone()).ok().unwrap();
        unsafe {
            renderer.set_callbacks(
                attach_reading_registry,
                on_detach_noop,
                &ctx as *const Reentrant as *mut c_void,
            );
            renderer.register_surface(SurfaceId(1), dummy_surface());
        }

        renderer.attach("v1", SurfaceId(1)).unwrap();
        assert_eq!(renderer.attached().get("v1"), Some(&SurfaceId(1)));
    }

    unsafe extern "C" fn on_detach_noop(
        _track_sid: *const c_char,
        _surface_id: u64,
        _surface: *mut c_void,
        _user_data: *mut c_void,
    ) {
    }

    #[test]
    fn unregistering_surface_unbinds_controller_view() {
        use roomview_core::engine::loopback::LoopbackEngine;
        use roomview_core::{BindingState, ConnectOptions, SessionController, TrackInfo, TrackKind, VideoView};

        let log = Log::default();
        let renderer = Arc::new(renderer_with_log(&log));
        unsafe {
            renderer.register_surface(SurfaceId(1), dummy_surface());
            renderer.register_surface(SurfaceId(2), dummy_surface());
        }
        let engine = Arc::new(LoopbackEngine::new());
        let controller = SessionController::new(engine.clone(), renderer.clone());
        controller.connect("tok", &ConnectOptions::default()).unwrap();
        engine.join("p1", "alice");
        engine.add_track("p1", TrackInfo::new("v1", TrackKind::Video));
        controller.dispatch_pending();

        let view = controller.participant_view("p1");
        view.mount(SurfaceId(1));
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(1)));

        renderer.unregister_surface(SurfaceId(1));

        assert_eq!(view.binding_state(), BindingState::Unbound);
        assert!(renderer.attached().is_empty());

        view.mount(SurfaceId(2));
        assert_eq!(view.binding_state(), BindingState::Bound(SurfaceId(2)));
        assert_eq!(renderer.attached().get("v1"), Some(&SurfaceId(2)));
    }

    #[test]
    fn dropped_controllers_stop_being_told() {
        let log = Log::default();
        let renderer = renderer_with_log(&log);
        let kept = SurfaceLosses::default();
        renderer.watch_losses(kept.clone());
        renderer.watch_losses(SurfaceLosses::default());
        unsafe { renderer.register_surface(SurfaceId(1), dummy_surface()) };

        renderer.unregister_surface(SurfaceId(1));

        assert_eq!(renderer.lock().losses.len(), 1);
        assert!(!kept.is_orphaned());
    }

    #[test]
    fn c_entry_points_validate_arguments() {
        unsafe {
            assert_eq!(roomview_video_register_surface(99, std::ptr::null_mut()), -1);
            assert_eq!(roomview_video_is_attached(std::ptr::null()), -1);
            let sid = CString::new("never-bound").unwrap();
            assert_eq!(roomview_video_is_attached(sid.as_ptr()), 0);
        }
    }
}
