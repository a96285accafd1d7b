//! Configuration for the async microphone.
//!
//! Provides `AppConfig` (top-level settings), one sub-config per component,
//! and `AppPaths` for cross-platform directories.  Settings are read from
//! TOML via `AppConfig::load`; they are never written back.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, EstimatorConfig, RecorderConfig, SourceConfig};
