//! Audio capture: microphone → buffers → listeners.
//!
//! # Pipeline
//!
//! ```text
//! cpal callback → format conversion → Rechunker → AudioSource
//!              → Broadcaster<AudioBuffer> → StreamRecorder / PeakEstimator / ...
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_microphone::audio::{AudioBuffer, AudioHost, AudioSource};
//! use async_microphone::config::SourceConfig;
//!
//! let mic = AudioSource::new(Arc::new(AudioHost::new()), &SourceConfig::default()).unwrap();
//! mic.subscribe(|buffer: &AudioBuffer| {
//!     println!("{} samples @ {}Hz", buffer.len(), buffer.sample_rate);
//!     Ok(())
//! });
//! mic.open(None).unwrap();
//! // ...
//! mic.close();
//! ```

pub mod buffer;
pub mod capture;
pub mod recorder;
pub mod source;

pub use buffer::AudioBuffer;
pub use capture::{
    AudioHost, CaptureBackend, CaptureCallback, CaptureError, CaptureFlow, CaptureStream, DeviceInfo, Rechunker,
    StreamSpec,
};
pub use recorder::{RecorderError, StreamRecorder};
pub use source::{AudioSource, SourceError, SAMPLE_WIDTH};

#[cfg(test)]
pub use capture::ManualBackend;
