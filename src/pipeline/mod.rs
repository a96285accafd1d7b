//! Plumbing shared by every pipeline component.
//!
//! # Architecture
//!
//! ```text
//! capture callback thread
//!        │
//!        ▼
//! AudioSource ──publish──▶ Broadcaster<AudioBuffer>
//!                                 │
//!                                 ├─▶ PeakEstimator ──bounded queue──▶ worker thread
//!                                 │                                      │
//!                                 │                     Broadcaster<f64> ◀┘ (peak_ready)
//!                                 │
//!                                 └─▶ StreamRecorder ──▶ <prefix>-<onset>.wav
//! ```
//!
//! Duration-based auto stop runs on [`timer`] threads, independent of the
//! capture thread.

pub mod broadcast;
pub mod state;
pub mod timer;

use std::sync::{Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use broadcast::{Broadcaster, Listener, SubscriptionId};
pub use state::{EstimatorState, RecorderState, SourceState};

/// Lock `mutex`, recovering the data if a previous holder panicked.
///
/// Listener panics are caught by the broadcaster, so a poisoned lock only
/// means a callback died mid-update; the guarded state is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
