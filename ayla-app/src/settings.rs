//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ayla_core::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_TICK_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub preferred_input_device: Option<String>,
    /// Playback gain in [0, 1].
    pub volume: f32,
    /// Engine drive interval.
    pub tick_ms: u64,
    /// Keep the microphone relay running alongside playback.
    pub relay_microphone: bool,
    pub engine: EngineConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_output_device: None,
            preferred_input_device: None,
            volume: 1.0,
            tick_ms: DEFAULT_TICK_MS,
            relay_microphone: false,
            engine: EngineConfig::default(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.take());
        self.preferred_input_device = normalize_device_name(self.preferred_input_device.take());
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.tick_ms = self.tick_ms.clamp(1, 50);
        self.engine.greeting_keywords = normalize_keywords(&self.engine.greeting_keywords);
        if let Err(e) = self.engine.validate() {
            warn!("engine settings rejected, using defaults: {e}");
            self.engine = EngineConfig::default();
        }
    }

    /// Drive interval, honoring `AYLA_TICK_MS` over the file value.
    pub fn tick_interval(&self) -> Duration {
        let ms = std::env::var("AYLA_TICK_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| (1..=50).contains(ms))
            .unwrap_or(self.tick_ms);
        Duration::from_millis(ms)
    }
}

fn normalize_device_name(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

fn normalize_keywords(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for keyword in raw {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() || out.contains(&normalized) {
            continue;
        }
        out.push(normalized);
    }
    out
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Ayla")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("ayla")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn save_then_load_keeps_engine_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = AppSettings::default();
        settings.volume = 0.4;
        settings.engine.streamer.initial_buffer_ms = 60;
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.engine.streamer.initial_buffer_ms, 60);
        assert!((loaded.volume - 0.4).abs() < 1e-6);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "volume": 7.5, "preferredOutputDevice": "  ", "engine": { "greetingKeywords": ["Salam", "salam ", ""] } }"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.preferred_output_device, None);
        assert_eq!(settings.engine.greeting_keywords, vec!["salam".to_string()]);
        assert_eq!(settings.engine.streamer, EngineConfig::default().streamer);
    }

    #[test]
    fn invalid_engine_section_is_replaced() {
        let mut settings = AppSettings::default();
        settings.engine.streamer.lookahead_ms = 10;
        settings.normalize();
        assert_eq!(settings.engine, EngineConfig::default());
    }

    #[test]
    fn malformed_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
