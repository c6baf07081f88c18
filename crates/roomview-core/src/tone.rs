//! Call-progress tone playback.
//!
//! Independent of any session: tones can be played before connecting,
//! during a call or after hanging up. Only one tone plays at a time; a new
//! `play` cuts the current one off.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output sample rate for synthesized tones.
pub const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u16 = 2;
/// Peak amplitude of a synthesized tone, roughly -12 dBFS.
const AMPLITUDE: f32 = 0.25 * i16::MAX as f32;

const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 2.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToneError {
    #[error("unknown tone: {0}")]
    UnknownTone(String),
    #[error("cannot load more than {0} tones")]
    CapacityExceeded(usize),
    #[error("tone player not initialized")]
    NotInitialized,
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),
    #[error("audio output: {0}")]
    Output(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneKind {
    Ringing,
    Busy,
    Disconnect,
}

struct Cadence {
    freqs: [f32; 2],
    on_ms: u32,
    off_ms: u32,
}

impl ToneKind {
    pub fn name(self) -> &'static str {
        match self {
            ToneKind::Ringing => "ringing",
            ToneKind::Busy => "busy",
            ToneKind::Disconnect => "disconnect",
        }
    }

    /// Ringing and busy repeat until stopped; disconnect plays once.
    pub fn loops_by_default(self) -> bool {
        !matches!(self, ToneKind::Disconnect)
    }

    // North American call-progress plan.
    fn cadence(self) -> Cadence {
        match self {
            ToneKind::Ringing => Cadence { freqs: [440.0, 480.0], on_ms: 2000, off_ms: 4000 },
            ToneKind::Busy => Cadence { freqs: [480.0, 620.0], on_ms: 500, off_ms: 500 },
            ToneKind::Disconnect => Cadence { freqs: [480.0, 620.0], on_ms: 250, off_ms: 250 },
        }
    }
}

impl fmt::Display for ToneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToneKind {
    type Err = ToneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ringing" | "ringback" => Ok(ToneKind::Ringing),
            "busy" => Ok(ToneKind::Busy),
            "disconnect" | "disconnected" | "reorder" => Ok(ToneKind::Disconnect),
            other => Err(ToneError::UnknownTone(other.to_string())),
        }
    }
}

/// Interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneBuffer {
    name: String,
    sample_rate: u32,
    channels: u16,
    samples: Arc<[i16]>,
}

impl ToneBuffer {
    pub fn new(
        name: impl Into<String>,
        sample_rate: u32,
        channels: u16,
        samples: Vec<i16>,
    ) -> Result<Self, ToneError> {
        if sample_rate == 0 || channels == 0 {
            return Err(ToneError::InvalidBuffer("zero rate or channel count".into()));
        }
        if samples.is_empty() || samples.len() % channels as usize != 0 {
            return Err(ToneError::InvalidBuffer(format!(
                "{} samples do not fill {channels}-channel frames",
                samples.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            sample_rate,
            channels,
            samples: samples.into(),
        })
    }

    /// Decode a PCM WAV file. Integer samples of any width are rescaled to
    /// 16 bits, float samples are clamped to [-1, 1] first.
    pub fn from_wav(name: impl Into<String>, path: &Path) -> Result<Self, ToneError> {
        let invalid = |e: hound::Error| ToneError::InvalidBuffer(format!("{}: {e}", path.display()));
        let mut reader = hound::WavReader::open(path).map_err(invalid)?;
        let spec = reader.spec();
        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader.samples::<i16>().collect::<Result<Vec<_>, _>>(),
            (hound::SampleFormat::Int, bits @ 1..=32) => reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if bits > 16 {
                            (v >> (bits - 16)) as i16
                        } else {
                            (v << (16 - bits)) as i16
                        }
                    })
                })
                .collect(),
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect(),
            (format, bits) => {
                return Err(ToneError::InvalidBuffer(format!(
                    "{}: unsupported {bits}-bit {format:?} samples",
                    path.display()
                )));
            }
        }
        .map_err(invalid)?;
        Self::new(name, spec.sample_rate, spec.channels, samples)
    }

    /// One full cadence period of `kind`, stereo at [`SAMPLE_RATE`].
    pub fn synthesize(kind: ToneKind) -> Self {
        let cadence = kind.cadence();
        let on_frames = (SAMPLE_RATE * cadence.on_ms / 1000) as usize;
        let off_frames = (SAMPLE_RATE * cadence.off_ms / 1000) as usize;

        let mut samples = Vec::with_capacity((on_frames + off_frames) * CHANNELS as usize);
        for i in 0..on_frames {
            let t = i as f32 / SAMPLE_RATE as f32;
            let mixed: f32 = cadence
                .freqs
                .iter()
                .map(|f| (TAU * f * t).sin())
                .sum::<f32>()
                / cadence.freqs.len() as f32;
            let sample = (mixed * AMPLITUDE) as i16;
            samples.push(sample);
            samples.push(sample);
        }
        samples.resize(samples.len() + off_frames * CHANNELS as usize, 0);

        Self {
            name: kind.name().to_string(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            samples: samples.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Platform audio device the player schedules buffers on.
pub trait AudioOutput: Send + Sync {
    fn play_buffer(
        &self,
        buffer: &ToneBuffer,
        looping: bool,
        volume: f32,
        playback_speed: f32,
    ) -> Result<(), ToneError>;
    fn pause(&self);
    fn set_volume(&self, volume: f32);
    fn set_playback_speed(&self, playback_speed: f32);
    fn make_stereo(&self, stereo: bool);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToneSource {
    Builtin(ToneKind),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToneRequest {
    pub source: ToneSource,
    pub looping: bool,
    /// Overrides the player volume for this tone when set.
    pub volume: Option<f32>,
    pub playback_speed: Option<f32>,
}

impl ToneRequest {
    pub fn tone(kind: ToneKind) -> Self {
        Self {
            source: ToneSource::Builtin(kind),
            looping: kind.loops_by_default(),
            volume: None,
            playback_speed: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            source: ToneSource::Named(name.into()),
            looping: false,
            volume: None,
            playback_speed: None,
        }
    }
}

struct PlayerState {
    /// `None` until `initialize`; bounds the number of named buffers.
    max_loadable: Option<usize>,
    loaded: HashMap<String, ToneBuffer>,
    builtin: HashMap<ToneKind, ToneBuffer>,
    current: Option<ToneSource>,
    volume: f32,
    playback_speed: f32,
}

pub struct TonePlayer {
    output: Arc<dyn AudioOutput>,
    state: Mutex<PlayerState>,
}

impl TonePlayer {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            state: Mutex::new(PlayerState {
                max_loadable: None,
                loaded: HashMap::new(),
                builtin: HashMap::new(),
                current: None,
                volume: 1.0,
                playback_speed: 1.0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enable named buffers, at most `max_loadable` at once, and set the
    /// output channel layout.
    pub fn initialize(&self, max_loadable: usize, stereo: bool) {
        self.lock().max_loadable = Some(max_loadable);
        self.output.make_stereo(stereo);
        tracing::info!(max_loadable, stereo, "tone player initialized");
    }

    /// Make a buffer playable under `name`, replacing any buffer of that name.
    pub fn preload(&self, buffer: ToneBuffer) -> Result<(), ToneError> {
        let mut state = self.lock();
        let max = state.max_loadable.ok_or(ToneError::NotInitialized)?;
        if !state.loaded.contains_key(buffer.name()) && state.loaded.len() >= max {
            return Err(ToneError::CapacityExceeded(max));
        }
        tracing::debug!(name = buffer.name(), frames = buffer.frames(), "tone preloaded");
        state.loaded.insert(buffer.name().to_string(), buffer);
        Ok(())
    }

    /// Load a WAV file as a named buffer called after the file stem.
    /// Returns the name to play it by.
    pub fn preload_file(&self, path: &Path) -> Result<String, ToneError> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| ToneError::InvalidBuffer(format!("{}: no usable file name", path.display())))?
            .to_string();
        self.preload(ToneBuffer::from_wav(name.clone(), path)?)?;
        Ok(name)
    }

    /// Drop a named buffer, stopping it first if it is playing.
    pub fn release(&self, name: &str) {
        let mut state = self.lock();
        if state.loaded.remove(name).is_none() {
            return;
        }
        if state.current == Some(ToneSource::Named(name.to_string())) {
            state.current = None;
            self.output.pause();
        }
    }

    pub fn play(&self, kind: ToneKind) -> Result<(), ToneError> {
        self.play_with(ToneRequest::tone(kind))
    }

    /// Start a tone, replacing whatever is playing.
    pub fn play_with(&self, request: ToneRequest) -> Result<(), ToneError> {
        let mut state = self.lock();

        let buffer = match &request.source {
            ToneSource::Builtin(kind) => state
                .builtin
                .entry(*kind)
                .or_insert_with(|| ToneBuffer::synthesize(*kind))
                .clone(),
            ToneSource::Named(name) => state
                .loaded
                .get(name)
                .cloned()
                .ok_or_else(|| ToneError::UnknownTone(name.clone()))?,
        };

        if state.current.take().is_some() {
            self.output.pause();
        }

        let volume = request.volume.map(clamp_volume).unwrap_or(state.volume);
        let speed = request
            .playback_speed
            .map(clamp_speed)
            .unwrap_or(state.playback_speed);

        self.output
            .play_buffer(&buffer, request.looping, volume, speed)?;
        tracing::debug!(tone = buffer.name(), looping = request.looping, volume, speed, "tone started");
        state.current = Some(request.source);
        Ok(())
    }

    /// Stop the current tone. Idempotent.
    pub fn stop(&self) {
        if self.lock().current.take().is_some() {
            self.output.pause();
            tracing::debug!("tone stopped");
        }
    }

    pub fn pause(&self) {
        self.stop();
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.lock().volume = volume;
        self.output.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn set_playback_speed(&self, playback_speed: f32) {
        let speed = clamp_speed(playback_speed);
        self.lock().playback_speed = speed;
        self.output.set_playback_speed(speed);
    }

    pub fn current(&self) -> Option<ToneSource> {
        self.lock().current.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Stop playback and forget every named buffer. `initialize` must be
    /// called again before preloading.
    pub fn terminate(&self) {
        self.stop();
        let mut state = self.lock();
        state.loaded.clear();
        state.max_loadable = None;
        tracing::info!("tone player terminated");
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) }
}

fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() { 1.0 } else { speed.clamp(MIN_SPEED, MAX_SPEED) }
}
