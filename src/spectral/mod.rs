//! Sliding-window spectral peak estimation.
//!
//! # Pipeline
//!
//! ```text
//! AudioBuffer → bounded queue → SpectralWindow (last N buffers)
//!            → |rFFT| → strict local maxima in [min_idx, max_idx) → peak Hz
//! ```
//!
//! [`PeakEstimator`] is the threaded component; [`SpectralAnalyzer`] is the
//! synchronous core it runs on its worker thread.

pub mod band;
pub mod estimator;
pub mod peak;
pub mod window;

use thiserror::Error;

pub use band::{frequency_axis, FrequencyBand};
pub use estimator::PeakEstimator;
pub use peak::{local_maxima, strongest_peak, SpectralAnalyzer};
pub use window::SpectralWindow;

// ---------------------------------------------------------------------------
// EstimatorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("invalid frequency band [{min_hz}, {max_hz}] Hz")]
    InvalidBand { min_hz: f64, max_hz: f64 },

    #[error("invalid estimator configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn estimator worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to schedule auto stop: {0}")]
    Timer(#[source] std::io::Error),
}
