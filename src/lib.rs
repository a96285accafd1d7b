//! An asynchronous microphone with a sliding-window spectral peak estimator
//! and a WAV stream recorder.
//!
//! ```text
//! AudioHost (cpal) → AudioSource ──▶ PeakEstimator  (worker thread, rFFT)
//!                                └─▶ StreamRecorder (16-bit WAV)
//! ```

pub mod audio;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod spectral;
