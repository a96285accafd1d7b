//! Immutable capture buffers.
//!
//! One [`AudioBuffer`] is produced per capture callback.  Samples live in an
//! `Arc<[i16]>`, so cloning a buffer to hand it to another thread (the
//! estimator worker, a window) never copies audio data.

use std::ops::Deref;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// A fixed-length block of signed 16-bit PCM as delivered by the source.
///
/// Multi-channel audio is interleaved.  The buffer is read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[i16]>,
    /// Sample rate of the capturing source in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Position in the capture order, starting at 0 for the first buffer of
    /// a stream.
    pub sequence: u64,
}

impl AudioBuffer {
    /// Build a buffer from owned samples.
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32, channels: u16, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
        }
    }

    /// The interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Wall-clock length of the buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// One value per frame, the average of all channels.
    ///
    /// Mono buffers pass through unchanged.  Yields [`frames`](Self::frames)
    /// values; a trailing partial frame is dropped.
    pub fn mono(&self) -> impl Iterator<Item = f64> + '_ {
        let n = usize::from(self.channels.max(1));
        let frames = if self.channels == 0 { 0 } else { self.samples.len() / n };
        self.samples
            .chunks_exact(n)
            .take(frames)
            .map(move |frame| frame.iter().map(|&s| f64::from(s)).sum::<f64>() / n as f64)
    }
}

impl Deref for AudioBuffer {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.samples
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
