//! Process-wide engine initialization.
//!
//! Native video SDKs expect a single global setup before the first session
//! and a teardown after the last one. Each live session holds an
//! [`SdkGuard`]; the first guard runs [`MediaEngine::initialize`], dropping
//! the last one runs [`MediaEngine::teardown`] on the same engine.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::engine::MediaEngine;
use crate::errors::RoomviewError;

#[derive(Default)]
struct SdkState {
    holders: usize,
    /// Incremented on every init, lets callers tell fresh setups apart.
    generation: u64,
    /// Engine that ran the current init; torn down with the last holder.
    engine: Option<Arc<dyn MediaEngine>>,
}

/// Init-once/teardown bookkeeping for one SDK instance.
///
/// Engine hooks run with the SDK lock held so an init never overlaps a
/// teardown. They must not acquire or drop guards themselves.
#[derive(Default)]
pub struct Sdk {
    state: Mutex<SdkState>,
}

static GLOBAL: OnceLock<Arc<Sdk>> = OnceLock::new();

impl Sdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance shared by every controller in the process.
    pub fn global() -> Arc<Sdk> {
        GLOBAL.get_or_init(|| Arc::new(Sdk::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, SdkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a holder, initializing through `engine` if none is live.
    /// A failed init leaves the SDK uninitialized.
    pub fn acquire(self: &Arc<Self>, engine: &Arc<dyn MediaEngine>) -> Result<SdkGuard, RoomviewError> {
        let mut state = self.lock();
        if state.holders == 0 {
            engine.initialize()?;
            state.generation += 1;
            state.engine = Some(engine.clone());
            tracing::info!(generation = state.generation, "sdk initialized");
        }
        state.holders += 1;
        Ok(SdkGuard {
            sdk: self.clone(),
            generation: state.generation,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().holders > 0
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}

/// Keeps the SDK initialized while alive.
pub struct SdkGuard {
    sdk: Arc<Sdk>,
    generation: u64,
}

impl SdkGuard {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for SdkGuard {
    fn drop(&mut self) {
        let mut state = self.sdk.lock();
        state.holders = state.holders.saturating_sub(1);
        if state.holders > 0 {
            return;
        }
        if let Some(engine) = state.engine.take() {
            engine.teardown();
            tracing::info!(generation = state.generation, "sdk torn down");
        }
    }
}
