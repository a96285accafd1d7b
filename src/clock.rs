//! Timestamps for naming recordings.
//!
//! A recording's onset combines the sub-second part of the process clock
//! with the absolute wall-clock time in whole seconds, printed with three
//! decimals.  Two recordings started in the same second still get distinct
//! names as long as they are at least a millisecond apart.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds since the process clock was first read.
pub fn process_secs() -> f64 {
    PROCESS_EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Whole seconds since the Unix epoch.
pub fn absolute_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Onset timestamp used in recording file names.
pub fn onset_secs() -> f64 {
    let t = process_secs();
    t.fract() + absolute_secs() as f64
}

/// `<prefix>-<onset:.3>.wav`.
///
/// The suffix is appended to the last path component, so a prefix of
/// `data/subject01` yields `data/subject01-1700000000.123.wav`.
///
/// ```
/// use std::path::Path;
/// use async_microphone::clock::recording_path;
///
/// let path = recording_path(Path::new("data/subject01"), 1_700_000_000.1234);
/// assert_eq!(path, Path::new("data/subject01-1700000000.123.wav"));
/// ```
pub fn recording_path(prefix: &Path, onset: f64) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(format!("-{onset:.3}.wav"));
    PathBuf::from(name)
}
