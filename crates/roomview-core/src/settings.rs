use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::engine::ConnectOptions;

/// Host-level defaults, persisted as JSON in the app data directory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub audio_on_join: bool,
    #[serde(default = "default_true")]
    pub video_on_join: bool,
    #[serde(default)]
    pub dominant_speaker: bool,
    #[serde(default)]
    pub network_quality: bool,
    #[serde(default = "default_tone_volume")]
    pub tone_volume: f32,
    #[serde(default = "default_true")]
    pub stereo_tones: bool,
    #[serde(default = "default_max_loadable_tones")]
    pub max_loadable_tones: usize,
}

fn default_true() -> bool {
    true
}

fn default_tone_volume() -> f32 {
    1.0
}

fn default_max_loadable_tones() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_on_join: true,
            video_on_join: true,
            dominant_speaker: false,
            network_quality: false,
            tone_volume: default_tone_volume(),
            stereo_tones: true,
            max_loadable_tones: default_max_loadable_tones(),
        }
    }
}

impl Settings {
    /// Connect options for `room_name` seeded from these defaults.
    pub fn connect_options(&self, room_name: Option<String>) -> ConnectOptions {
        ConnectOptions {
            room_name,
            audio: self.audio_on_join,
            video: self.video_on_join,
            dominant_speaker: self.dominant_speaker,
            network_quality: self.network_quality,
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Apply `f` to the settings and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        {
            let mut settings = self.lock();
            f(&mut *settings);
        }
        self.save();
    }

    pub fn set_audio_on_join(&self, enabled: bool) {
        self.update(|s| s.audio_on_join = enabled);
    }

    pub fn set_video_on_join(&self, enabled: bool) {
        self.update(|s| s.video_on_join = enabled);
    }

    pub fn set_tone_volume(&self, volume: f32) {
        self.update(|s| s.tone_volume = volume.clamp(0.0, 1.0));
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(path = %self.file_path.display(), "failed to save settings: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "corrupt settings, using defaults: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert!(s.audio_on_join);
        assert!(s.video_on_join);
        assert!(!s.dominant_speaker);
        assert_eq!(s.tone_volume, 1.0);
        assert_eq!(s.max_loadable_tones, 4);
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_set_video_persists() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = SettingsStore::new(path);
            store.set_video_on_join(false);
            store.set_audio_on_join(false);
        }
        let store = SettingsStore::new(path);
        let s = store.get();
        assert!(!s.video_on_join);
        assert!(!s.audio_on_join);
    }

    #[test]
    fn test_tone_volume_is_clamped() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        store.set_tone_volume(7.5);
        assert_eq!(store.get().tone_volume, 1.0);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"dominant_speaker":true}"#,
        )
        .unwrap();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        let s = store.get();
        assert!(s.dominant_speaker);
        assert!(s.video_on_join);
        assert!(s.stereo_tones);
    }

    #[test]
    fn test_connect_options_follow_settings() {
        let s = Settings {
            video_on_join: false,
            dominant_speaker: true,
            ..Settings::default()
        };
        let opts = s.connect_options(Some("daily".into()));
        assert_eq!(opts.room_name.as_deref(), Some("daily"));
        assert!(opts.audio);
        assert!(!opts.video);
        assert!(opts.dominant_speaker);
    }
}
