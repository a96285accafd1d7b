//! Threaded peak estimator.
//!
//! [`PeakEstimator`] listens to an [`AudioSource`] and, while running, hands
//! every buffer to a dedicated `peak-estimator` worker thread through a
//! bounded queue.  The worker owns the [`SpectralAnalyzer`]; each time it
//! finds an in-band peak it stores the frequency and publishes it on
//! [`peak_ready`](PeakEstimator::peak_ready).
//!
//! The capture thread never blocks on the worker: when the queue is full the
//! buffer is dropped and a warning is logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_microphone::audio::{AudioHost, AudioSource};
//! use async_microphone::config::SourceConfig;
//! use async_microphone::spectral::PeakEstimator;
//!
//! let mic = AudioSource::new(Arc::new(AudioHost::new()), &SourceConfig::default()).unwrap();
//! let estimator = PeakEstimator::configure(&mic, 200.0, 300.0, 10).unwrap();
//! estimator.subscribe_peak(|hz: &f64| {
//!     println!("peak at {hz:.1} Hz");
//!     Ok(())
//! });
//!
//! mic.open(None).unwrap();
//! estimator.start(Some(Duration::from_secs(10))).unwrap();
//! ```

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::band::FrequencyBand;
use super::peak::SpectralAnalyzer;
use super::EstimatorError;
use crate::audio::{AudioBuffer, AudioSource};
use crate::config::EstimatorConfig;
use crate::pipeline::{lock, timer, Broadcaster, EstimatorState, Listener, SubscriptionId};

/// Latest estimate plus its change notification, shared with the worker.
struct PeakShared {
    value: Mutex<Option<f64>>,
    ready: Broadcaster<f64>,
}

struct Control {
    worker: Option<JoinHandle<SpectralAnalyzer>>,
    /// Kept between sessions so the window survives a restart.
    analyzer: Option<SpectralAnalyzer>,
    /// Bumped on every start; a duration timer only stops its own session.
    generation: u64,
}

// ---------------------------------------------------------------------------
// PeakEstimator
// ---------------------------------------------------------------------------

/// Tracks the strongest spectral peak of a source within a frequency band.
pub struct PeakEstimator {
    source: Arc<AudioSource>,
    subscription: SubscriptionId,
    band: FrequencyBand,
    buffer_count: usize,
    queue_capacity: usize,
    control: Mutex<Control>,
    state: Mutex<EstimatorState>,
    /// Present only while running; taking it closes the queue.
    sender: Mutex<Option<SyncSender<AudioBuffer>>>,
    peak: Arc<PeakShared>,
}

impl PeakEstimator {
    /// Search `[min_hz, max_hz]` over windows of `buffer_count` buffers,
    /// with the default queue capacity.
    pub fn configure(
        source: &Arc<AudioSource>,
        min_hz: f64,
        max_hz: f64,
        buffer_count: usize,
    ) -> Result<Arc<Self>, EstimatorError> {
        Self::new(
            source,
            &EstimatorConfig {
                min_hz,
                max_hz,
                buffer_count,
                ..EstimatorConfig::default()
            },
        )
    }

    /// Resolve the band against the source format and subscribe to it.
    ///
    /// The window spans `buffer_count * buffer_size` frames, downmixed to
    /// mono before the FFT; the frequency axis and band indices are computed
    /// once here.
    ///
    /// # Errors
    ///
    /// [`EstimatorError::InvalidBand`] for an empty or negative band and
    /// [`EstimatorError::InvalidConfig`] for a zero buffer count or queue
    /// capacity.
    pub fn new(source: &Arc<AudioSource>, config: &EstimatorConfig) -> Result<Arc<Self>, EstimatorError> {
        if config.buffer_count == 0 {
            return Err(EstimatorError::InvalidConfig("buffer_count must be at least 1".into()));
        }
        if config.queue_capacity == 0 {
            return Err(EstimatorError::InvalidConfig("queue_capacity must be at least 1".into()));
        }

        let window_len = config.buffer_count * source.buffer_size();
        let band = FrequencyBand::resolve(config.min_hz, config.max_hz, window_len, source.sample_rate())?;
        if band.candidate_bins() == 0 {
            log::warn!(
                "peak-estimator: [{}, {}] Hz spans bins {:?} at {:.2} Hz/bin; no interior bin can hold a peak",
                band.min_hz,
                band.max_hz,
                band.bins(),
                band.bin_width
            );
        }
        log::debug!(
            "peak-estimator: window {} frames, bins {:?}, {:.2} Hz/bin",
            band.window_len,
            band.bins(),
            band.bin_width
        );

        let analyzer = SpectralAnalyzer::new(band.clone(), config.buffer_count);

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = source.subscribe(move |buffer: &AudioBuffer| -> anyhow::Result<()> {
                if let Some(estimator) = weak.upgrade() {
                    estimator.on_buffer(buffer);
                }
                Ok(())
            });

            Self {
                source: Arc::clone(source),
                subscription,
                band,
                buffer_count: config.buffer_count,
                queue_capacity: config.queue_capacity,
                control: Mutex::new(Control {
                    worker: None,
                    analyzer: Some(analyzer),
                    generation: 0,
                }),
                state: Mutex::new(EstimatorState::Idle),
                sender: Mutex::new(None),
                peak: Arc::new(PeakShared {
                    value: Mutex::new(None),
                    ready: Broadcaster::new("peak-ready"),
                }),
            }
        }))
    }

    /// Start the worker and accept buffers.  A no-op while running.
    ///
    /// With `duration`, an independent timer calls [`stop`](Self::stop) once
    /// it elapses.  A timer left over from an earlier session does nothing.
    pub fn start(self: &Arc<Self>, duration: Option<Duration>) -> Result<(), EstimatorError> {
        let mut control = lock(&self.control);
        if lock(&self.state).is_active() {
            return Ok(());
        }

        let analyzer = control
            .analyzer
            .take()
            .unwrap_or_else(|| SpectralAnalyzer::new(self.band.clone(), self.buffer_count));
        let (tx, rx) = mpsc::sync_channel(self.queue_capacity);
        let peak = Arc::clone(&self.peak);

        let handle = thread::Builder::new()
            .name("peak-estimator".into())
            .spawn(move || run_worker(analyzer, rx, &peak))
            .map_err(EstimatorError::Spawn)?;

        *lock(&self.sender) = Some(tx);
        control.worker = Some(handle);
        control.generation += 1;
        let generation = control.generation;
        *lock(&self.state) = EstimatorState::Running;
        drop(control);

        log::info!(
            "peak-estimator: {}, band [{}, {}] Hz over {} buffers",
            EstimatorState::Running.label(),
            self.band.min_hz,
            self.band.max_hz,
            self.buffer_count
        );

        if let Some(duration) = duration {
            let scheduled = timer::schedule_for("peak-estimator", duration, self, move |estimator| {
                estimator.stop_session(generation)
            });
            if let Err(e) = scheduled {
                self.stop();
                return Err(EstimatorError::Timer(e));
            }
        }
        Ok(())
    }

    /// Stop accepting buffers and wait for the worker to finish.
    ///
    /// Every buffer already queued is analysed before this returns; no peak
    /// update is published afterwards.  Idempotent.  Must not be called
    /// from a `peak_ready` observer.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        self.stop_locked(&mut control);
    }

    fn stop_session(&self, generation: u64) {
        let mut control = lock(&self.control);
        if control.generation == generation {
            self.stop_locked(&mut control);
        }
    }

    fn stop_locked(&self, control: &mut Control) {
        let Some(handle) = control.worker.take() else {
            return;
        };

        // Dropping the sender closes the queue; the worker drains what was
        // accepted and then exits.
        drop(lock(&self.sender).take());

        if handle.thread().id() == thread::current().id() {
            log::warn!("peak-estimator: stop called from the worker thread; not joining");
        } else {
            match handle.join() {
                Ok(analyzer) => control.analyzer = Some(analyzer),
                Err(_) => log::error!("peak-estimator: worker panicked; window reset"),
            }
        }

        *lock(&self.state) = EstimatorState::Idle;
        log::info!("peak-estimator: {}", EstimatorState::Idle.label());
    }

    fn on_buffer(&self, buffer: &AudioBuffer) {
        let sender = lock(&self.sender);
        let Some(tx) = sender.as_ref() else {
            return;
        };

        match tx.try_send(buffer.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                log::warn!("peak-estimator: worker queue full, dropping buffer {}", dropped.sequence);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("peak-estimator: worker gone, buffer ignored");
            }
        }
    }

    /// Most recent peak frequency in Hz, `None` until the first detection.
    pub fn peak(&self) -> Option<f64> {
        *lock(&self.peak.value)
    }

    /// Notified with the new frequency on every successful update, on the
    /// worker thread.
    pub fn peak_ready(&self) -> &Broadcaster<f64> {
        &self.peak.ready
    }

    pub fn subscribe_peak<L>(&self, listener: L) -> SubscriptionId
    where
        L: Listener<f64> + 'static,
    {
        self.peak.ready.subscribe(listener)
    }

    pub fn state(&self) -> EstimatorState {
        *lock(&self.state)
    }

    /// The resolved search band.
    pub fn band(&self) -> &FrequencyBand {
        &self.band
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }
}

impl Drop for PeakEstimator {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
        self.stop();
    }
}

fn run_worker(mut analyzer: SpectralAnalyzer, rx: Receiver<AudioBuffer>, peak: &PeakShared) -> SpectralAnalyzer {
    log::debug!("peak-estimator: worker running");
    while let Ok(buffer) = rx.recv() {
        if let Some(hz) = analyzer.push(buffer) {
            *lock(&peak.value) = Some(hz);
            peak.ready.publish(&hz);
        }
    }
    log::debug!("peak-estimator: worker drained");
    analyzer
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
