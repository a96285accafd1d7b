//! Sliding analysis window over the most recent capture buffers.
//!
//! The window holds whole [`AudioBuffer`]s rather than samples; pushing a
//! buffer beyond `capacity` evicts the oldest one.  Buffers are shared
//! (`Arc<[i16]>`), so a window never copies audio until it is flattened.
//!
//! # Example
//!
//! ```rust
//! use async_microphone::audio::AudioBuffer;
//! use async_microphone::spectral::SpectralWindow;
//!
//! let mut window = SpectralWindow::new(2);
//! for n in 0..3_i16 {
//!     window.push(AudioBuffer::new(vec![n; 2], 8_000, 1, n as u64));
//! }
//! assert!(window.is_full());
//! assert_eq!(window.mono().collect::<Vec<_>>(), vec![1.0, 1.0, 2.0, 2.0]);
//! ```

use std::collections::VecDeque;

use crate::audio::AudioBuffer;

// ---------------------------------------------------------------------------
// SpectralWindow
// ---------------------------------------------------------------------------

/// The last `capacity` buffers, oldest first.
#[derive(Debug, Clone)]
pub struct SpectralWindow {
    buffers: VecDeque<AudioBuffer>,
    capacity: usize,
}

impl SpectralWindow {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SpectralWindow capacity must be > 0");
        Self {
            buffers: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `buffer`, evicting from the front until at most `capacity`
    /// buffers remain.  Returns the number of evicted buffers.
    pub fn push(&mut self, buffer: AudioBuffer) -> usize {
        self.buffers.push_back(buffer);
        let mut evicted = 0;
        while self.buffers.len() > self.capacity {
            self.buffers.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Every buffer downmixed to mono, oldest to newest, as one sequence.
    pub fn mono(&self) -> impl Iterator<Item = f64> + '_ {
        self.buffers.iter().flat_map(|b| b.mono())
    }

    /// Total frame count across all buffers.
    pub fn frame_len(&self) -> usize {
        self.buffers.iter().map(AudioBuffer::frames).sum()
    }

    /// Buffers oldest first.
    pub fn buffers(&self) -> impl Iterator<Item = &AudioBuffer> {
        self.buffers.iter()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` once the window holds exactly `capacity` buffers.
    pub fn is_full(&self) -> bool {
        self.buffers.len() == self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
