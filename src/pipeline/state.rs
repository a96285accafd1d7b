//! Lifecycle states of the pipeline components.
//!
//! ```text
//! SourceState:     Idle ──open()──▶ Capturing ──close()──▶ Closed
//!                  Idle ─────────────close()─────────────▶ Closed
//!
//! EstimatorState:  Idle ──start()──▶ Running ──stop()──▶ Idle
//!
//! RecorderState:   Idle ──begin()──▶ Recording ──close()──▶ Closed
//!                  Idle ─────────────close()──────────────▶ Closed
//! ```
//!
//! `Closed` is terminal for sources and recorders; a new instance is needed
//! to capture or record again.  An estimator may be restarted.

// ---------------------------------------------------------------------------
// SourceState
// ---------------------------------------------------------------------------

/// Lifecycle of an [`AudioSource`](crate::audio::AudioSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    /// Constructed, no stream opened yet.
    #[default]
    Idle,
    /// A stream is open and buffers are being broadcast.
    Capturing,
    /// The stream was closed.  Terminal.
    Closed,
}

impl SourceState {
    /// Short label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            SourceState::Idle => "Idle",
            SourceState::Capturing => "Capturing",
            SourceState::Closed => "Closed",
        }
    }

    /// Returns `true` while the capture callback delivers buffers.
    pub fn is_active(&self) -> bool {
        matches!(self, SourceState::Capturing)
    }
}

// ---------------------------------------------------------------------------
// EstimatorState
// ---------------------------------------------------------------------------

/// Lifecycle of a [`PeakEstimator`](crate::spectral::PeakEstimator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorState {
    /// Incoming buffers are ignored.
    #[default]
    Idle,
    /// The worker thread accepts and analyses buffers.
    Running,
}

impl EstimatorState {
    pub fn label(&self) -> &'static str {
        match self {
            EstimatorState::Idle => "Idle",
            EstimatorState::Running => "Running",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, EstimatorState::Running)
    }
}

// ---------------------------------------------------------------------------
// RecorderState
// ---------------------------------------------------------------------------

/// Lifecycle of a [`StreamRecorder`](crate::audio::StreamRecorder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    /// No file open; buffers are discarded.
    #[default]
    Idle,
    /// A WAV file is open and every buffer is appended.
    Recording,
    /// The file was finalised.  Terminal.
    Closed,
}

impl RecorderState {
    pub fn label(&self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Recording => "Recording",
            RecorderState::Closed => "Closed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecorderState::Recording)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_idle() {
        assert_eq!(SourceState::default(), SourceState::Idle);
        assert_eq!(EstimatorState::default(), EstimatorState::Idle);
        assert_eq!(RecorderState::default(), RecorderState::Idle);
    }

    #[test]
    fn only_capturing_source_is_active() {
        assert!(!SourceState::Idle.is_active());
        assert!(SourceState::Capturing.is_active());
        assert!(!SourceState::Closed.is_active());
    }

    #[test]
    fn only_running_estimator_is_active() {
        assert!(!EstimatorState::Idle.is_active());
        assert!(EstimatorState::Running.is_active());
    }

    #[test]
    fn only_recording_recorder_is_active() {
        assert!(!RecorderState::Idle.is_active());
        assert!(RecorderState::Recording.is_active());
        assert!(!RecorderState::Closed.is_active());
    }

    #[test]
    fn labels() {
        assert_eq!(SourceState::Capturing.label(), "Capturing");
        assert_eq!(SourceState::Closed.label(), "Closed");
        assert_eq!(EstimatorState::Running.label(), "Running");
        assert_eq!(RecorderState::Recording.label(), "Recording");
        assert_eq!(RecorderState::Idle.label(), "Idle");
    }
}
