//! Input streams and the process-wide audio host.
//!
//! [`CaptureBackend`] is the seam between [`AudioSource`](super::AudioSource)
//! and the audio subsystem.  [`AudioHost`] is the production implementation
//! on top of `cpal`; tests use `ManualBackend`, which lets them drive the
//! capture callback by hand.
//!
//! The backend guarantees the callback sees buffers of exactly
//! `buffer_frames * channels` interleaved `i16` samples, whatever block size
//! and sample format the driver actually uses.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use thiserror::Error;

use crate::pipeline::lock;

// ---------------------------------------------------------------------------
// StreamSpec / CaptureFlow
// ---------------------------------------------------------------------------

/// Format of the stream a source asks the backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per delivered buffer.
    pub buffer_frames: usize,
}

impl StreamSpec {
    /// Interleaved samples per delivered buffer.
    pub fn samples_per_buffer(&self) -> usize {
        self.buffer_frames * self.channels as usize
    }
}

/// What the capture callback tells the driver after each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFlow {
    /// Keep delivering buffers.
    Continue,
    /// Capture finished normally; let the stream drain.
    Complete,
    /// Stop immediately.
    Abort,
}

/// Callback invoked on the capture thread once per filled buffer.
pub type CaptureCallback = Box<dyn FnMut(&[i16]) -> CaptureFlow + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening an input stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("audio host unavailable: {0}")]
    HostUnavailable(#[from] cpal::HostUnavailable),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported device sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("capture thread exited before the stream was ready")]
    ThreadExited,
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

/// An open input stream.  Closing it stops callback delivery.
pub trait CaptureStream: Send {
    /// Stop the stream.  Returns once no further callback can run.
    fn close(&mut self);
}

/// Something that can open input streams: the audio subsystem handle.
///
/// Object-safe and `Send + Sync` so sources can share it as
/// `Arc<dyn CaptureBackend>`.
pub trait CaptureBackend: Send + Sync {
    /// Open a stream with `spec` and start calling `callback` from the
    /// capture thread.
    fn open_stream(
        &self,
        spec: &StreamSpec,
        callback: CaptureCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

// Compile-time assertion: Box<dyn CaptureBackend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn CaptureBackend>) {}
};

// ---------------------------------------------------------------------------
// Rechunker
// ---------------------------------------------------------------------------

/// Regroups driver blocks of arbitrary size into fixed-length buffers.
#[derive(Debug)]
pub struct Rechunker {
    pending: Vec<i16>,
    chunk_len: usize,
}

impl Rechunker {
    /// # Panics
    ///
    /// Panics if `chunk_len == 0`.
    pub fn new(chunk_len: usize) -> Self {
        assert!(chunk_len > 0, "Rechunker chunk length must be > 0");
        Self {
            pending: Vec::with_capacity(chunk_len),
            chunk_len,
        }
    }

    /// Feed samples; `emit` is called once per completed chunk.
    ///
    /// Stops at the first chunk for which `emit` returns something other
    /// than [`CaptureFlow::Continue`] and returns that flow.  Leftover
    /// samples stay pending for the next call.
    pub fn push<I, F>(&mut self, samples: I, mut emit: F) -> CaptureFlow
    where
        I: IntoIterator<Item = i16>,
        F: FnMut(&[i16]) -> CaptureFlow,
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.chunk_len {
                let flow = emit(&self.pending);
                self.pending.clear();
                if flow != CaptureFlow::Continue {
                    return flow;
                }
            }
        }
        CaptureFlow::Continue
    }

    /// Samples waiting for the current chunk to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// AudioHost
// ---------------------------------------------------------------------------

/// Description of an input device, for `--list-devices` style output.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Rate of the device's preferred configuration, when it reports one.
    pub default_sample_rate: Option<u32>,
    pub default_channels: Option<u16>,
}

/// Process-wide handle on the `cpal` audio subsystem.
///
/// Create one at startup and inject it into every
/// [`AudioSource`](super::AudioSource).  Only the host id and the preferred
/// device name are stored; each stream resolves its device on its own
/// capture thread, which keeps this handle `Send + Sync` on every platform.
#[derive(Debug, Clone)]
pub struct AudioHost {
    host_id: cpal::HostId,
    device: Option<String>,
}

impl AudioHost {
    /// Use the platform's default host and its default input device.
    pub fn new() -> Self {
        let host_id = cpal::default_host().id();
        log::info!("audio host initialised: {}", host_id.name());
        Self {
            host_id,
            device: None,
        }
    }

    /// Select the input device by name; `None` keeps the system default.
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    /// Name of the requested device, if one was set.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Enumerate the input devices of this host.
    pub fn list_input_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let host = cpal::host_from_id(self.host_id)?;
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut infos = Vec::new();
        for device in host.input_devices()? {
            let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
            let default_config = device.default_input_config().ok();
            infos.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                default_sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
                default_channels: default_config.as_ref().map(|c| c.channels()),
                name,
            });
        }
        Ok(infos)
    }
}

impl Default for AudioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for AudioHost {
    fn open_stream(
        &self,
        spec: &StreamSpec,
        callback: CaptureCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let finish_tx = stop_tx.clone();
        let host_id = self.host_id;
        let device = self.device.clone();
        let spec = spec.clone();

        // cpal::Stream is !Send on some platforms, so the stream lives and
        // dies on this thread.
        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match start_stream(host_id, device.as_deref(), &spec, callback, finish_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("audio-capture: stream dropped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop_tx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::ThreadExited)
            }
        }
    }
}

/// Handle to a stream owned by an `audio-capture` thread.
struct CpalStream {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn close(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if thread.join().is_err() {
            log::error!("audio-capture thread panicked");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_owned())),
    }
}

fn start_stream(
    host_id: cpal::HostId,
    device_name: Option<&str>,
    spec: &StreamSpec,
    callback: CaptureCallback,
    finish_tx: mpsc::Sender<()>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::host_from_id(host_id)?;
    let device = resolve_device(&host, device_name)?;
    let format = device.default_input_config()?.sample_format();

    let fixed = cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(spec.buffer_frames as u32),
    };

    let sink = SharedSink::new(spec.samples_per_buffer(), callback, finish_tx);
    let stream = match build_for_format(&device, &fixed, format, sink.clone()) {
        Ok(stream) => stream,
        Err(CaptureError::BuildStream(e)) => {
            log::debug!("fixed buffer size rejected ({e}); using the driver default");
            let flexible = cpal::StreamConfig {
                buffer_size: cpal::BufferSize::Default,
                ..fixed
            };
            build_for_format(&device, &flexible, format, sink)?
        }
        Err(e) => return Err(e),
    };

    stream.play()?;
    log::info!(
        "input stream open on {:?} ({} Hz, {} ch, {} frames/buffer, device format {format:?})",
        device.name().unwrap_or_default(),
        spec.sample_rate,
        spec.channels,
        spec.buffer_frames
    );
    Ok(stream)
}

fn build_for_format(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    sink: SharedSink,
) -> Result<cpal::Stream, CaptureError> {
    match format {
        SampleFormat::I16 => build_stream::<i16>(device, config, sink),
        SampleFormat::U16 => build_stream::<u16>(device, config, sink),
        SampleFormat::I32 => build_stream::<i32>(device, config, sink),
        SampleFormat::F32 => build_stream::<f32>(device, config, sink),
        other => Err(CaptureError::UnsupportedFormat(other)),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: SharedSink,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            sink.feed(data.iter().map(|s| s.to_sample::<i16>()));
        },
        |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Driver-side state: rechunking plus the source callback.
struct ChunkSink {
    rechunker: Rechunker,
    callback: CaptureCallback,
    finished: bool,
    finish_tx: mpsc::Sender<()>,
}

/// The sink is shared between the fixed-size and the fallback stream
/// attempts; only one of them ends up running.
#[derive(Clone)]
struct SharedSink(Arc<Mutex<ChunkSink>>);

impl SharedSink {
    fn new(chunk_len: usize, callback: CaptureCallback, finish_tx: mpsc::Sender<()>) -> Self {
        Self(Arc::new(Mutex::new(ChunkSink {
            rechunker: Rechunker::new(chunk_len),
            callback,
            finished: false,
            finish_tx,
        })))
    }

    fn feed<I: IntoIterator<Item = i16>>(&self, samples: I) {
        let mut guard = lock(&self.0);
        let sink = &mut *guard;
        if sink.finished {
            return;
        }
        let callback = &mut sink.callback;
        let flow = sink.rechunker.push(samples, |chunk| callback(chunk));
        if flow != CaptureFlow::Continue {
            log::debug!("audio-capture: callback returned {flow:?}, finishing stream");
            sink.finished = true;
            let _ = sink.finish_tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// ManualBackend (test double)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use manual::ManualBackend;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
