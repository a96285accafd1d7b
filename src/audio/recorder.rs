//! Persist the raw capture stream to a WAV file.
//!
//! A [`StreamRecorder`] subscribes to an [`AudioSource`] at construction.
//! Buffers are discarded until [`begin`](StreamRecorder::begin) opens
//! `<prefix>-<onset>.wav`; from then on every buffer is appended in arrival
//! order until [`close`](StreamRecorder::close) finalises the header.
//!
//! Writes happen inline on the capture thread through a `BufWriter`, which
//! keeps each call to a memory copy in the common case.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_microphone::audio::{AudioHost, AudioSource, StreamRecorder};
//! use async_microphone::config::SourceConfig;
//!
//! let mic = AudioSource::new(Arc::new(AudioHost::new()), &SourceConfig::default()).unwrap();
//! let recorder = StreamRecorder::new(&mic);
//!
//! mic.open(None).unwrap();
//! let path = recorder.begin("session/subject01").unwrap();
//! recorder.close_after_duration(Duration::from_secs(5)).unwrap();
//! println!("recording to {}", path.display());
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use hound::{WavSpec, WavWriter};
use thiserror::Error;

use super::buffer::AudioBuffer;
use super::source::AudioSource;
use crate::clock;
use crate::pipeline::{lock, timer, RecorderState, SubscriptionId};

// ---------------------------------------------------------------------------
// RecorderError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RecorderError {
    /// A closed recorder cannot record again; create a new one.
    #[error("recorder is closed")]
    Closed,

    #[error("recording file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    /// A buffer could not be written; the session was abandoned.
    #[error("recording was cut short by a write failure: {0}")]
    WriteFailed(#[source] hound::Error),

    #[error("failed to schedule auto close: {0}")]
    Timer(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// StreamRecorder
// ---------------------------------------------------------------------------

/// Byte target of a WAV writer.
trait WavSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> WavSink for T {}

type Writer = WavWriter<Box<dyn WavSink>>;

struct Inner {
    state: RecorderState,
    writer: Option<Writer>,
    path: Option<PathBuf>,
    frames: u64,
    write_error: Option<hound::Error>,
}

/// Appends every captured buffer to a WAV file while armed.
pub struct StreamRecorder {
    source: Arc<AudioSource>,
    subscription: SubscriptionId,
    inner: Mutex<Inner>,
}

impl StreamRecorder {
    /// Create an idle recorder listening to `source`.
    pub fn new(source: &Arc<AudioSource>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = source.subscribe(move |buffer: &AudioBuffer| match weak.upgrade() {
                Some(recorder) => recorder.on_buffer(buffer),
                None => Ok(()),
            });

            Self {
                source: Arc::clone(source),
                subscription,
                inner: Mutex::new(Inner {
                    state: RecorderState::Idle,
                    writer: None,
                    path: None,
                    frames: 0,
                    write_error: None,
                }),
            }
        })
    }

    /// Open `<prefix>-<onset>.wav` and start appending buffers.
    ///
    /// The header takes channel count, sample width and rate from the
    /// source.  Missing parent directories are created.  While already
    /// recording this is a no-op returning the current path.
    ///
    /// # Errors
    ///
    /// [`RecorderError::Closed`] after [`close`](Self::close); I/O and WAV
    /// errors from creating the file.
    pub fn begin(&self, prefix: impl AsRef<Path>) -> Result<PathBuf, RecorderError> {
        let mut inner = lock(&self.inner);
        if inner.state.is_active() {
            if let Some(path) = &inner.path {
                return Ok(path.clone());
            }
        }
        if inner.state == RecorderState::Closed {
            return Err(RecorderError::Closed);
        }

        let path = clock::recording_path(prefix.as_ref(), clock::onset_secs());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let writer = WavWriter::new(Box::new(BufWriter::new(file)) as Box<dyn WavSink>, self.wav_spec())?;
        Self::arm(&mut inner, writer, &path);
        Ok(path)
    }

    /// 16-bit integer PCM in the source's channel layout and rate.
    fn wav_spec(&self) -> WavSpec {
        WavSpec {
            channels: self.source.channels(),
            sample_rate: self.source.sample_rate(),
            bits_per_sample: self.source.sample_width() * 8,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn arm(inner: &mut Inner, writer: Writer, path: &Path) {
        inner.writer = Some(writer);
        inner.path = Some(path.to_path_buf());
        inner.frames = 0;
        inner.state = RecorderState::Recording;
        log::info!("recorder: {} {}", inner.state.label(), path.display());
    }

    /// Finalise and close the file, then move to [`RecorderState::Closed`].
    ///
    /// Idempotent: the file is finalised exactly once and later calls
    /// return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Errors from finalising the header, or [`RecorderError::WriteFailed`]
    /// when an earlier buffer could not be written.
    pub fn close(&self) -> Result<(), RecorderError> {
        let mut inner = lock(&self.inner);
        let previous = std::mem::replace(&mut inner.state, RecorderState::Closed);
        if previous != RecorderState::Closed {
            log::debug!("recorder: {} -> {}", previous.label(), RecorderState::Closed.label());
        }

        if let Some(writer) = inner.writer.take() {
            writer.finalize()?;
            if let Some(path) = &inner.path {
                log::info!("recorder: closed {} ({} frames)", path.display(), inner.frames);
            }
        }

        match inner.write_error.take() {
            Some(e) => Err(RecorderError::WriteFailed(e)),
            None => Ok(()),
        }
    }

    /// Call [`close`](Self::close) once `duration` has elapsed, without
    /// blocking the caller.
    pub fn close_after_duration(self: &Arc<Self>, duration: Duration) -> Result<(), RecorderError> {
        timer::schedule_for("recorder", duration, self, |recorder| {
            if let Err(e) = recorder.close() {
                log::error!("recorder: timed close failed: {e}");
            }
        })
        .map_err(RecorderError::Timer)
    }

    pub fn state(&self) -> RecorderState {
        lock(&self.inner).state
    }

    /// File of the current or last session.
    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.inner).path.clone()
    }

    /// Frames written in the current or last session.
    pub fn frames_written(&self) -> u64 {
        lock(&self.inner).frames
    }

    fn on_buffer(&self, buffer: &AudioBuffer) -> anyhow::Result<()> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let Some(writer) = inner.writer.as_mut() else {
            return Ok(());
        };

        match buffer.samples().iter().try_for_each(|&s| writer.write_sample(s)) {
            Ok(()) => {
                inner.frames += buffer.frames() as u64;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                inner.writer = None;
                inner.state = RecorderState::Closed;
                inner.write_error = Some(e);
                Err(anyhow::anyhow!("recording write failed: {message}"))
            }
        }
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
        if let Err(e) = self.close() {
            log::warn!("recorder: close on drop failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualBackend;
    use crate::config::SourceConfig;
    use std::io::{self, Cursor, SeekFrom};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tempfile::tempdir;

    /// In-memory WAV target whose writes start failing once `failing` is set.
    struct FlakySink {
        bytes: Cursor<Vec<u8>>,
        failing: Arc<AtomicBool>,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "device full"));
            }
            self.bytes.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.bytes.seek(pos)
        }
    }

    fn source(backend: &Arc<ManualBackend>, channels: u16) -> Arc<AudioSource> {
        let config = SourceConfig {
            channels,
            sample_rate: 8_000,
            buffer_duration_secs: 0.001,
            ..SourceConfig::default()
        };
        let source = AudioSource::new(backend.clone(), &config).unwrap();
        source.open(None).unwrap();
        source
    }

    fn read_wav(path: &Path) -> (WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::open(path).expect("open wav");
        let spec = reader.spec();
        let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>().expect("samples");
        (spec, samples)
    }

    #[test]
    fn round_trip_matches_fed_buffers() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let mic = source(&backend, 1);
        let recorder = StreamRecorder::new(&mic);

        let path = recorder.begin(dir.path().join("rec")).expect("begin");
        assert_eq!(recorder.state(), RecorderState::Recording);

        let mut expected = Vec::new();
        for k in 0..5_i16 {
            let buffer: Vec<i16> = (0..8).map(|i| k * 100 - i * 7).collect();
            backend.push(&buffer);
            expected.extend_from_slice(&buffer);
        }
        recorder.close().expect("close");

        let (spec, samples) = read_wav(&path);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(samples, expected);
        assert_eq!(recorder.frames_written(), 40);
    }

    #[test]
    fn header_follows_stereo_source() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let mic = source(&backend, 2);
        let recorder = StreamRecorder::new(&mic);

        let path = recorder.begin(dir.path().join("stereo")).unwrap();
        backend.push(&[1; 16]);
        recorder.close().unwrap();

        let (spec, samples) = read_wav(&path);
        assert_eq!(spec.channels, 2);
        assert_eq!(samples.len(), 16);
        assert_eq!(recorder.frames_written(), 8);
    }

    #[test]
    fn buffers_outside_session_are_discarded() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let mic = source(&backend, 1);
        let recorder = StreamRecorder::new(&mic);

        backend.push(&[9; 8]);
        let path = recorder.begin(dir.path().join("rec")).unwrap();
        backend.push(&[1; 8]);
        recorder.close().unwrap();
        backend.push(&[9; 8]);

        let (_, samples) = read_wav(&path);
        assert_eq!(samples, vec![1; 8]);
    }

    #[test]
    fn file_name_carries_onset() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        let path = recorder.begin(dir.path().join("subject01")).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_owned();
        let onset = name
            .strip_prefix("subject01-")
            .and_then(|rest| rest.strip_suffix(".wav"))
            .expect("prefix and extension");
        let (whole, decimals) = onset.split_once('.').expect("decimal point");
        assert!(whole.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(decimals.len(), 3);
        recorder.close().unwrap();
    }

    #[test]
    fn begin_twice_keeps_one_file() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        let first = recorder.begin(dir.path().join("rec")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = recorder.begin(dir.path().join("other")).unwrap();
        assert_eq!(first, second);
        recorder.close().unwrap();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn begin_creates_missing_directories() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        let path = recorder.begin(dir.path().join("a/b/rec")).unwrap();
        assert!(path.starts_with(dir.path().join("a/b")));
        recorder.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn begin_surfaces_io_errors() {
        let dir = tempdir().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));
        let result = recorder.begin(blocker.join("rec"));

        assert!(matches!(result, Err(RecorderError::Io(_))));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        recorder.begin(dir.path().join("rec")).unwrap();
        recorder.close().unwrap();
        recorder.close().unwrap();
        assert_eq!(recorder.state(), RecorderState::Closed);

        assert!(matches!(
            recorder.begin(dir.path().join("again")),
            Err(RecorderError::Closed)
        ));
    }

    #[test]
    fn close_without_begin_writes_nothing() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        recorder.close().unwrap();
        assert_eq!(recorder.state(), RecorderState::Closed);
        assert!(recorder.path().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn close_after_duration_finalises_file() {
        let dir = tempdir().expect("temp dir");
        let backend = ManualBackend::new();
        let recorder = StreamRecorder::new(&source(&backend, 1));

        let path = recorder.begin(dir.path().join("timed")).unwrap();
        backend.push(&[3; 8]);
        recorder.close_after_duration(Duration::from_millis(30)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.state() != RecorderState::Closed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(recorder.state(), RecorderState::Closed);

        let (_, samples) = read_wav(&path);
        assert_eq!(samples, vec![3; 8]);
    }

    #[test]
    fn write_failure_abandons_session_and_is_reported_once() {
        let backend = ManualBackend::new();
        let mic = source(&backend, 1);
        let recorder = StreamRecorder::new(&mic);

        let failing = Arc::new(AtomicBool::new(false));
        let sink = FlakySink {
            bytes: Cursor::new(Vec::new()),
            failing: Arc::clone(&failing),
        };
        let writer = WavWriter::new(Box::new(sink) as Box<dyn WavSink>, recorder.wav_spec()).unwrap();
        StreamRecorder::arm(&mut lock(&recorder.inner), writer, Path::new("memory.wav"));

        backend.push(&[1; 8]);
        assert_eq!(recorder.frames_written(), 8);

        failing.store(true, Ordering::SeqCst);
        let buffer = AudioBuffer::new(vec![2_i16; 8], 8_000, 1, 1);
        assert!(recorder.on_buffer(&buffer).is_err());
        assert_eq!(recorder.state(), RecorderState::Closed);

        // Nothing more is written once the session is abandoned.
        backend.push(&[3; 8]);
        assert_eq!(recorder.frames_written(), 8);

        assert!(matches!(recorder.close(), Err(RecorderError::WriteFailed(_))));
        assert!(recorder.close().is_ok());
        assert!(matches!(recorder.begin("unused"), Err(RecorderError::Closed)));
    }

    #[test]
    fn dropping_recorder_unsubscribes() {
        let backend = ManualBackend::new();
        let mic = source(&backend, 1);
        let recorder = StreamRecorder::new(&mic);
        assert_eq!(mic.buffers().len(), 1);

        drop(recorder);
        assert!(mic.buffers().is_empty());
    }
}
