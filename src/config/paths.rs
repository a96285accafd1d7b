//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\async-microphone\
//!   macOS:   ~/Library/Application Support/async-microphone/
//!   Linux:   ~/.config/async-microphone/
//!
//! Data dir (recordings):
//!   Windows: %LOCALAPPDATA%\async-microphone\
//!   macOS:   ~/Library/Application Support/async-microphone/
//!   Linux:   ~/.local/share/async-microphone/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for WAV recordings.
    pub recordings_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "async-microphone";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            recordings_dir: data_dir.join("recordings"),
        }
    }

    /// Prefix used when the recorder is enabled without an explicit one.
    pub fn default_recording_prefix(&self) -> PathBuf {
        self.recordings_dir.join("recording")
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.settings_file.starts_with(&paths.config_dir));
        assert!(paths.recordings_dir.ends_with("async-microphone/recordings"));
    }

    #[test]
    fn default_prefix_lives_in_recordings_dir() {
        let paths = AppPaths::new();
        let prefix = paths.default_recording_prefix();
        assert_eq!(prefix.parent(), Some(paths.recordings_dir.as_path()));
        assert!(prefix.file_name().is_some_and(|n| n == "recording"));
    }
}
