//! Schedule-once timers for duration-based auto stop.
//!
//! Each timer runs on its own named OS thread, independent of the audio
//! callback thread.  The target is held through a [`Weak`] reference so a
//! pending timer never keeps a component alive; if the component has been
//! dropped by the time the delay elapses the timer does nothing.
//!
//! Actions must tolerate running after the component was already stopped
//! manually (every `close`/`stop` in this crate is idempotent).

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Run `action(&target)` once after `delay`, unless `target` is gone.
///
/// # Errors
///
/// Returns the OS error if the timer thread cannot be spawned.
pub fn schedule_once<T, F>(
    name: &str,
    delay: Duration,
    target: Weak<T>,
    action: F,
) -> std::io::Result<()>
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    let label = name.to_owned();
    thread::Builder::new()
        .name(format!("{name}-timer"))
        .spawn(move || {
            thread::sleep(delay);
            match target.upgrade() {
                Some(target) => {
                    log::debug!("{label}: timer fired after {delay:?}");
                    action(&target);
                }
                None => log::debug!("{label}: timer target dropped before firing"),
            }
        })?;
    Ok(())
}

/// Convenience wrapper taking the strong handle the caller already holds.
pub fn schedule_for<T, F>(
    name: &str,
    delay: Duration,
    target: &Arc<T>,
    action: F,
) -> std::io::Result<()>
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    schedule_once(name, delay, Arc::downgrade(target), action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn fires_once_after_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        schedule_for("test", Duration::from_millis(20), &counter, move |c| {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        rx.recv_timeout(Duration::from_secs(5)).expect("timer fired");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_target_is_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        schedule_for("test", Duration::from_millis(20), &counter, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(counter);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
