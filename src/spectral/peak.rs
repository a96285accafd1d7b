//! Peak search over the magnitude spectrum of the window.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::band::FrequencyBand;
use super::window::SpectralWindow;
use crate::audio::AudioBuffer;

/// Indices `i` with `values[i]` strictly greater than both neighbours.
///
/// The first and last index are never returned.
pub fn local_maxima(values: &[f64]) -> Vec<usize> {
    values
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[1] > w[0] && w[1] > w[2])
        .map(|(i, _)| i + 1)
        .collect()
}

/// Bin of the largest local maximum of `spectrum` within `bins`.
///
/// Ties go to the lowest bin.  `None` when the range holds no local maximum.
pub fn strongest_peak(spectrum: &[f64], bins: std::ops::Range<usize>) -> Option<usize> {
    let end = bins.end.min(spectrum.len());
    let start = bins.start.min(end);
    let slice = &spectrum[start..end];

    let mut best: Option<usize> = None;
    for i in local_maxima(slice) {
        if best.map_or(true, |b| slice[i] > slice[b]) {
            best = Some(i);
        }
    }
    best.map(|i| i + start)
}

// ---------------------------------------------------------------------------
// SpectralAnalyzer
// ---------------------------------------------------------------------------

/// The synchronous half of the estimator: window, FFT plan and scratch space.
///
/// Owned by exactly one thread at a time.
pub struct SpectralAnalyzer {
    window: SpectralWindow,
    band: FrequencyBand,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
}

impl SpectralAnalyzer {
    /// Analyse windows of `buffer_count` buffers against `band`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_count == 0`.
    pub fn new(band: FrequencyBand, buffer_count: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(band.window_len);
        Self {
            window: SpectralWindow::new(buffer_count),
            scratch: Vec::with_capacity(band.window_len),
            magnitudes: Vec::with_capacity(band.window_len / 2 + 1),
            band,
            fft,
        }
    }

    /// Add `buffer` to the window and, once the window is full, return the
    /// frequency of the strongest in-band peak.
    pub fn push(&mut self, buffer: AudioBuffer) -> Option<f64> {
        self.window.push(buffer);
        if !self.window.is_full() {
            return None;
        }

        let len = self.window.frame_len();
        if len != self.band.window_len {
            log::warn!(
                "peak-estimator: window holds {len} frames, expected {}; skipping",
                self.band.window_len
            );
            return None;
        }

        self.compute_spectrum();
        strongest_peak(&self.magnitudes, self.band.bins()).map(|idx| self.band.frequency(idx))
    }

    /// `|rFFT|` of the mono downmix of the current window into
    /// `self.magnitudes`.
    fn compute_spectrum(&mut self) {
        self.scratch.clear();
        self.scratch.extend(self.window.mono().map(|s| Complex::new(s, 0.0)));
        self.fft.process(&mut self.scratch);

        self.magnitudes.clear();
        self.magnitudes
            .extend(self.scratch[..=self.band.window_len / 2].iter().map(|c| c.norm()));
    }

    pub fn window(&self) -> &SpectralWindow {
        &self.window
    }

    pub fn band(&self) -> &FrequencyBand {
        &self.band
    }

    /// Magnitude spectrum of the last full window.
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
