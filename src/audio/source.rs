//! The asynchronous microphone.
//!
//! An [`AudioSource`] owns at most one input stream.  While capturing, every
//! buffer the backend delivers is wrapped in an [`AudioBuffer`] and published
//! synchronously on the capture thread to all subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_microphone::audio::{AudioBuffer, AudioHost, AudioSource};
//! use async_microphone::config::SourceConfig;
//!
//! let host = Arc::new(AudioHost::new());
//! let mic = AudioSource::new(host, &SourceConfig::default()).unwrap();
//! mic.subscribe(|buffer: &AudioBuffer| {
//!     println!("buffer {} ({} samples)", buffer.sequence, buffer.len());
//!     Ok(())
//! });
//!
//! // Closes itself after two seconds.
//! mic.open(Some(Duration::from_secs(2))).unwrap();
//! ```

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use thiserror::Error;

use super::buffer::AudioBuffer;
use super::capture::{CaptureBackend, CaptureFlow, CaptureStream, StreamSpec};
use super::CaptureError;
use crate::config::SourceConfig;
use crate::pipeline::{lock, timer, Broadcaster, Listener, SourceState, SubscriptionId};

/// Bytes per sample: capture is always signed 16-bit.
pub const SAMPLE_WIDTH: u16 = 2;

// ---------------------------------------------------------------------------
// SourceError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    /// Each source owns a single stream for its whole life.
    #[error("each audio source can only have one open audio stream")]
    AlreadyOpen,

    #[error("audio source was closed before it was opened")]
    Closed,

    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to schedule auto close: {0}")]
    Timer(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

enum StreamSlot {
    /// Never opened.
    Empty,
    Open(Box<dyn CaptureStream>),
    /// Opened once and closed since.
    Released,
}

/// State reachable from the capture callback.
struct SourceShared {
    spec: StreamSpec,
    state: Mutex<SourceState>,
    buffers: Broadcaster<AudioBuffer>,
    /// Thread currently running the buffer listeners, if any.
    publishing_on: Mutex<Option<ThreadId>>,
}

impl SourceShared {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(SourceState::Idle),
            buffers: Broadcaster::new("audio-source"),
            publishing_on: Mutex::new(None),
        }
    }

    fn in_listener(&self) -> bool {
        *lock(&self.publishing_on) == Some(thread::current().id())
    }

    fn on_capture(&self, samples: &[i16], sequence: &mut u64) -> CaptureFlow {
        let state = *lock(&self.state);
        if !state.is_active() {
            return match state {
                SourceState::Closed => CaptureFlow::Complete,
                _ => CaptureFlow::Abort,
            };
        }

        if samples.len() != self.spec.samples_per_buffer() {
            log::warn!(
                "audio-source: expected {} samples, backend delivered {}",
                self.spec.samples_per_buffer(),
                samples.len()
            );
        }

        let buffer = AudioBuffer::new(samples, self.spec.sample_rate, self.spec.channels, *sequence);
        *sequence += 1;
        *lock(&self.publishing_on) = Some(thread::current().id());
        self.buffers.publish(&buffer);
        *lock(&self.publishing_on) = None;
        CaptureFlow::Continue
    }
}

/// Captures 16-bit audio from one input stream and forwards each buffer to
/// any number of listeners.
pub struct AudioSource {
    backend: Arc<dyn CaptureBackend>,
    buffer_duration: f64,
    shared: Arc<SourceShared>,
    stream: Mutex<StreamSlot>,
}

impl AudioSource {
    /// Create an idle source.  No device is touched until [`open`](Self::open).
    ///
    /// The buffer size is `round(sample_rate * buffer_duration_secs)` frames.
    ///
    /// # Errors
    ///
    /// [`SourceError::InvalidConfig`] when the channel count, rate or buffer
    /// duration cannot produce a non-empty buffer.
    pub fn new(backend: Arc<dyn CaptureBackend>, config: &SourceConfig) -> Result<Arc<Self>, SourceError> {
        if config.channels == 0 {
            return Err(SourceError::InvalidConfig("channels must be at least 1".into()));
        }
        if config.sample_rate == 0 {
            return Err(SourceError::InvalidConfig("sample_rate must be positive".into()));
        }
        if !config.buffer_duration_secs.is_finite() || config.buffer_duration_secs <= 0.0 {
            return Err(SourceError::InvalidConfig(format!(
                "buffer_duration_secs must be positive, got {}",
                config.buffer_duration_secs
            )));
        }

        let buffer_frames = (config.sample_rate as f64 * config.buffer_duration_secs).round() as usize;
        if buffer_frames == 0 {
            return Err(SourceError::InvalidConfig(format!(
                "{} s at {} Hz is shorter than one frame",
                config.buffer_duration_secs, config.sample_rate
            )));
        }

        Ok(Arc::new(Self {
            backend,
            buffer_duration: config.buffer_duration_secs,
            shared: Arc::new(SourceShared::new(StreamSpec {
                channels: config.channels,
                sample_rate: config.sample_rate,
                buffer_frames,
            })),
            stream: Mutex::new(StreamSlot::Empty),
        }))
    }

    /// Open the input stream and start broadcasting buffers.
    ///
    /// With `duration`, a timer thread calls [`close`](Self::close) once it
    /// elapses.
    ///
    /// # Errors
    ///
    /// [`SourceError::AlreadyOpen`] if this source has opened a stream
    /// before; the existing stream is left untouched.  Backend failures are
    /// returned as [`SourceError::Capture`] and leave the source idle.
    pub fn open(self: &Arc<Self>, duration: Option<Duration>) -> Result<(), SourceError> {
        let mut slot = lock(&self.stream);
        match *slot {
            StreamSlot::Open(_) | StreamSlot::Released => return Err(SourceError::AlreadyOpen),
            StreamSlot::Empty => {}
        }

        {
            let mut state = lock(&self.shared.state);
            if *state == SourceState::Closed {
                return Err(SourceError::Closed);
            }
            // Set before the backend can fire its first callback.
            *state = SourceState::Capturing;
        }

        let shared = Arc::clone(&self.shared);
        let mut sequence = 0_u64;
        let callback = Box::new(move |samples: &[i16]| shared.on_capture(samples, &mut sequence));

        match self.backend.open_stream(&self.shared.spec, callback) {
            Ok(stream) => *slot = StreamSlot::Open(stream),
            Err(e) => {
                *lock(&self.shared.state) = SourceState::Idle;
                return Err(e.into());
            }
        }
        drop(slot);

        log::info!(
            "audio-source: capturing {} Hz, {} ch, {} frames/buffer",
            self.sample_rate(),
            self.channels(),
            self.buffer_size()
        );

        if let Some(duration) = duration {
            if let Err(e) = timer::schedule_for("audio-source", duration, self, |source| source.close()) {
                self.close();
                return Err(SourceError::Timer(e));
            }
        }
        Ok(())
    }

    /// Close the stream if one is open and move to [`SourceState::Closed`].
    ///
    /// Idempotent.  Returns after the backend guarantees no further capture
    /// callback can run.
    ///
    /// Called from a buffer listener it only marks the source closed, since
    /// the stream cannot be joined from its own thread.  The next callback
    /// completes the stream; a later `close` or drop releases the handle.
    pub fn close(&self) {
        let mut slot = lock(&self.stream);
        let previous = std::mem::replace(&mut *lock(&self.shared.state), SourceState::Closed);
        if previous != SourceState::Closed {
            log::debug!("audio-source: {} -> {}", previous.label(), SourceState::Closed.label());
        }

        if matches!(*slot, StreamSlot::Open(_)) && self.shared.in_listener() {
            log::warn!("audio-source: close called from a buffer listener; stream released later");
            return;
        }

        match std::mem::replace(&mut *slot, StreamSlot::Released) {
            StreamSlot::Open(mut stream) => {
                stream.close();
                log::info!("audio-source: stream closed");
            }
            StreamSlot::Empty => *slot = StreamSlot::Empty,
            StreamSlot::Released => {}
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SourceState {
        *lock(&self.shared.state)
    }

    /// Register a buffer listener.  Listeners run on the capture thread and
    /// must return quickly.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: Listener<AudioBuffer> + 'static,
    {
        self.shared.buffers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.buffers.unsubscribe(id)
    }

    /// The broadcaster buffers are published on.
    pub fn buffers(&self) -> &Broadcaster<AudioBuffer> {
        &self.shared.buffers
    }

    pub fn channels(&self) -> u16 {
        self.shared.spec.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.spec.sample_rate
    }

    /// Seconds between samples, `1 / sample_rate`.
    pub fn sample_period(&self) -> f64 {
        1.0 / self.shared.spec.sample_rate as f64
    }

    /// Bytes per sample.
    pub fn sample_width(&self) -> u16 {
        SAMPLE_WIDTH
    }

    /// Configured buffer length in seconds.
    pub fn buffer_duration(&self) -> f64 {
        self.buffer_duration
    }

    /// Frames per buffer.
    pub fn buffer_size(&self) -> usize {
        self.shared.spec.buffer_frames
    }

    /// Interleaved samples per buffer (`buffer_size * channels`).
    pub fn samples_per_buffer(&self) -> usize {
        self.shared.spec.samples_per_buffer()
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualBackend;
    use std::time::Instant;

    fn mono(sample_rate: u32, buffer_duration_secs: f64) -> SourceConfig {
        SourceConfig {
            channels: 1,
            sample_rate,
            buffer_duration_secs,
            ..SourceConfig::default()
        }
    }

    fn collect(source: &AudioSource) -> Arc<Mutex<Vec<AudioBuffer>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source.subscribe(move |b: &AudioBuffer| {
            sink.lock().unwrap().push(b.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn buffer_size_is_rounded() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend, &mono(44_100, 0.010)).unwrap();
        assert_eq!(source.buffer_size(), 441);
        assert_eq!(source.sample_width(), 2);
        assert!((source.sample_period() - 1.0 / 44_100.0).abs() < 1e-15);

        // 1.52 frames rounds up, not down.
        let source = AudioSource::new(ManualBackend::new(), &mono(8_000, 0.00019)).unwrap();
        assert_eq!(source.buffer_size(), 2);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero_channels = SourceConfig {
            channels: 0,
            ..SourceConfig::default()
        };
        assert!(matches!(
            AudioSource::new(ManualBackend::new(), &zero_channels),
            Err(SourceError::InvalidConfig(_))
        ));
        assert!(matches!(
            AudioSource::new(ManualBackend::new(), &mono(8_000, 0.0)),
            Err(SourceError::InvalidConfig(_))
        ));
        assert!(matches!(
            AudioSource::new(ManualBackend::new(), &mono(8_000, 0.00001)),
            Err(SourceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn open_broadcasts_buffers_in_capture_order() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        let first = collect(&source);
        let second = collect(&source);

        source.open(None).unwrap();
        assert_eq!(source.state(), SourceState::Capturing);
        assert_eq!(backend.spec().unwrap().buffer_frames, 8);

        for n in 0..20_i16 {
            assert_eq!(backend.push(&[n; 8]), Some(CaptureFlow::Continue));
        }

        for seen in [first, second] {
            let seen = seen.lock().unwrap();
            let sequences: Vec<u64> = seen.iter().map(|b| b.sequence).collect();
            assert_eq!(sequences, (0..20).collect::<Vec<_>>());
            assert!(seen.iter().enumerate().all(|(i, b)| b.samples() == [i as i16; 8]));
            assert!(seen.iter().all(|b| b.sample_rate == 8_000 && b.channels == 1));
        }
    }

    #[test]
    fn reopen_fails_and_keeps_stream() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.open(None).unwrap();

        assert!(matches!(source.open(None), Err(SourceError::AlreadyOpen)));
        assert_eq!(backend.opened(), 1);
        assert!(backend.is_streaming());
        assert_eq!(source.state(), SourceState::Capturing);
    }

    #[test]
    fn reopen_after_close_fails() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.open(None).unwrap();
        source.close();
        assert!(matches!(source.open(None), Err(SourceError::AlreadyOpen)));
        assert_eq!(backend.opened(), 1);
    }

    #[test]
    fn open_after_close_without_stream_fails() {
        let source = AudioSource::new(ManualBackend::new(), &mono(8_000, 0.001)).unwrap();
        source.close();
        assert!(matches!(source.open(None), Err(SourceError::Closed)));
    }

    #[test]
    fn close_is_idempotent() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.open(None).unwrap();

        source.close();
        source.close();
        assert_eq!(source.state(), SourceState::Closed);
        assert_eq!(backend.closed(), 1);
        assert_eq!(backend.push(&[0; 8]), None);
    }

    #[test]
    fn close_before_open_is_allowed() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.close();
        assert_eq!(source.state(), SourceState::Closed);
        assert_eq!(backend.closed(), 0);
    }

    #[test]
    fn callback_flow_follows_state() {
        let shared = SourceShared::new(StreamSpec {
            channels: 1,
            sample_rate: 8_000,
            buffer_frames: 2,
        });
        let mut seq = 0;

        assert_eq!(shared.on_capture(&[0, 0], &mut seq), CaptureFlow::Abort);
        *shared.state.lock().unwrap() = SourceState::Capturing;
        assert_eq!(shared.on_capture(&[0, 0], &mut seq), CaptureFlow::Continue);
        *shared.state.lock().unwrap() = SourceState::Closed;
        assert_eq!(shared.on_capture(&[0, 0], &mut seq), CaptureFlow::Complete);
        assert_eq!(seq, 1);
    }

    #[test]
    fn close_from_listener_defers_stream_release() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        let weak = Arc::downgrade(&source);
        source.subscribe(move |_: &AudioBuffer| {
            if let Some(source) = weak.upgrade() {
                source.close();
            }
            Ok(())
        });
        source.open(None).unwrap();

        assert_eq!(backend.push(&[0; 8]), Some(CaptureFlow::Continue));
        assert_eq!(source.state(), SourceState::Closed);
        assert_eq!(backend.closed(), 0);

        // The stream completes on its next callback.
        assert_eq!(backend.push(&[0; 8]), Some(CaptureFlow::Complete));

        source.close();
        assert_eq!(backend.closed(), 1);
        assert!(matches!(source.open(None), Err(SourceError::AlreadyOpen)));
    }

    #[test]
    fn duration_closes_automatically() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.open(Some(Duration::from_millis(30))).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while source.state() != SourceState::Closed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(source.state(), SourceState::Closed);
        assert!(!backend.is_streaming());
    }

    #[test]
    fn timer_after_manual_close_is_a_no_op() {
        let backend = ManualBackend::new();
        let source = AudioSource::new(backend.clone(), &mono(8_000, 0.001)).unwrap();
        source.open(Some(Duration::from_millis(20))).unwrap();
        source.close();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(source.state(), SourceState::Closed);
        assert_eq!(backend.closed(), 1);
    }
}
