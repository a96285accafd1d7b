//! Frequency axis and search band.
//!
//! A real-input FFT of length `n` at `sample_rate` yields bins
//! `0..=n/2`; bin `i` sits at `i * sample_rate / n` Hz.  The band
//! `[min_hz, max_hz]` is resolved once into the bin range
//! `min_idx..max_idx`, where each index is the first bin at or above the
//! respective edge.

use std::ops::Range;

use super::EstimatorError;

/// Frequencies of the non-negative FFT bins, `0..=window_len / 2`.
pub fn frequency_axis(window_len: usize, sample_rate: u32) -> Vec<f64> {
    if window_len == 0 {
        return Vec::new();
    }
    let n = window_len as f64;
    let rate = sample_rate as f64;
    (0..=window_len / 2).map(|i| i as f64 * rate / n).collect()
}

// ---------------------------------------------------------------------------
// FrequencyBand
// ---------------------------------------------------------------------------

/// A search band resolved against a concrete frequency axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBand {
    pub min_hz: f64,
    pub max_hz: f64,
    /// First bin with frequency >= `min_hz`.
    pub min_idx: usize,
    /// First bin with frequency >= `max_hz`; exclusive end of the range.
    pub max_idx: usize,
    /// Samples per analysis window.
    pub window_len: usize,
    /// Spacing between bins in Hz.
    pub bin_width: f64,
    axis: Vec<f64>,
}

impl FrequencyBand {
    /// # Errors
    ///
    /// [`EstimatorError::InvalidBand`] unless `0 <= min_hz < max_hz` and both
    /// are finite; [`EstimatorError::InvalidConfig`] for an empty window or
    /// zero sample rate.
    pub fn resolve(min_hz: f64, max_hz: f64, window_len: usize, sample_rate: u32) -> Result<Self, EstimatorError> {
        if !(min_hz.is_finite() && max_hz.is_finite()) || min_hz < 0.0 || min_hz >= max_hz {
            return Err(EstimatorError::InvalidBand { min_hz, max_hz });
        }
        if window_len == 0 || sample_rate == 0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "cannot analyse {window_len} samples at {sample_rate} Hz"
            )));
        }

        let axis = frequency_axis(window_len, sample_rate);
        let min_idx = axis.partition_point(|&f| f < min_hz);
        let max_idx = axis.partition_point(|&f| f < max_hz);

        Ok(Self {
            min_hz,
            max_hz,
            min_idx,
            max_idx,
            window_len,
            bin_width: sample_rate as f64 / window_len as f64,
            axis,
        })
    }

    /// The bins searched for a peak.
    pub fn bins(&self) -> Range<usize> {
        self.min_idx..self.max_idx
    }

    /// Number of bins that can hold a peak.  Band-edge bins never can.
    pub fn candidate_bins(&self) -> usize {
        self.bins().len().saturating_sub(2)
    }

    /// Frequency of bin `idx` in Hz.
    pub fn frequency(&self, idx: usize) -> f64 {
        self.axis.get(idx).copied().unwrap_or(idx as f64 * self.bin_width)
    }

    /// The full frequency axis, `0..=window_len / 2`.
    pub fn axis(&self) -> &[f64] {
        &self.axis
    }
}
