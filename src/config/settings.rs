//! Settings structs, defaults and TOML loading.
//!
//! Every struct is `#[serde(default)]`, so a settings file only has to name
//! the values it changes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

/// Capture format of the [`AudioSource`](crate::audio::AudioSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Length of one buffer in seconds.  The frame count is
    /// `round(sample_rate * buffer_duration_secs)`.
    pub buffer_duration_secs: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device: None,
            channels: 1,
            sample_rate: 44_100,
            buffer_duration_secs: 0.010,
        }
    }
}

// ---------------------------------------------------------------------------
// EstimatorConfig
// ---------------------------------------------------------------------------

/// Search band and window of the [`PeakEstimator`](crate::spectral::PeakEstimator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Lower band edge in Hz (inclusive).
    pub min_hz: f64,
    /// Upper band edge in Hz.
    pub max_hz: f64,
    /// Number of buffers in the analysis window.
    pub buffer_count: usize,
    /// Buffers that may wait for the worker before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_hz: 210.0,
            max_hz: 230.0,
            buffer_count: 10,
            queue_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// RecorderConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Record the raw stream while the binary runs.
    pub enabled: bool,
    /// File prefix; `None` uses [`AppPaths::default_recording_prefix`].
    pub file_prefix: Option<PathBuf>,
}

impl RecorderConfig {
    /// The configured prefix, or the default under the data directory.
    pub fn resolved_prefix(&self) -> PathBuf {
        self.file_prefix
            .clone()
            .unwrap_or_else(|| AppPaths::new().default_recording_prefix())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, read from `settings.toml`.
///
/// ```rust,no_run
/// use async_microphone::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let config = AppConfig::load().unwrap();
/// println!("{} Hz", config.source.sample_rate);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub estimator: EstimatorConfig,
    pub recorder: RecorderConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.source.channels, 1);
        assert_eq!(config.source.sample_rate, 44_100);
        assert_eq!(config.source.buffer_duration_secs, 0.010);
        assert_eq!(config.source.device, None);
        assert_eq!(config.estimator.min_hz, 210.0);
        assert_eq!(config.estimator.max_hz, 230.0);
        assert_eq!(config.estimator.buffer_count, 10);
        assert_eq!(config.estimator.queue_capacity, 64);
        assert!(!config.recorder.enabled);
        assert_eq!(config.recorder.file_prefix, None);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[source]\nsample_rate = 48000\n\n[estimator]\nmin_hz = 400.0\nmax_hz = 480.0\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.source.sample_rate, 48_000);
        assert_eq!(config.source.channels, 1);
        assert_eq!(config.estimator.min_hz, 400.0);
        assert_eq!(config.estimator.max_hz, 480.0);
        assert_eq!(config.estimator.buffer_count, 10);
        assert_eq!(config.recorder, RecorderConfig::default());
    }

    #[test]
    fn full_file_is_parsed() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[source]
device = "USB Audio"
channels = 2
sample_rate = 16000
buffer_duration_secs = 0.02

[estimator]
min_hz = 100.0
max_hz = 200.0
buffer_count = 4
queue_capacity = 8

[recorder]
enabled = true
file_prefix = "/tmp/session/subject01"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.source.device.as_deref(), Some("USB Audio"));
        assert_eq!(config.source.channels, 2);
        assert_eq!(config.source.buffer_duration_secs, 0.02);
        assert_eq!(config.estimator.queue_capacity, 8);
        assert!(config.recorder.enabled);
        assert_eq!(
            config.recorder.resolved_prefix(),
            PathBuf::from("/tmp/session/subject01")
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[source\nchannels = ").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }

    #[test]
    fn missing_prefix_resolves_under_data_dir() {
        let prefix = RecorderConfig::default().resolved_prefix();
        assert_eq!(prefix, AppPaths::new().default_recording_prefix());
    }
}
