//! Progress reporting for tasks.
//!
//! Each transfer gets one [`Progress`], created the first time its transport reports
//! byte counts. The progress can be shared freely: pausing, resuming or cancelling it
//! reaches back into the transfer it describes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

mod observer;

pub(crate) use self::observer::ProgressObserver;

type Control = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    completed: u64,
    total: Option<u64>,
    paused: bool,
    cancelled: bool,
}

struct Shared {
    counts: Mutex<Counts>,
    pause: Option<Control>,
    resume: Option<Control>,
    cancel: Option<Control>,
}

/// Completed and total unit counts for a transfer, with controls for the transfer.
#[derive(Clone)]
pub struct Progress {
    shared: Arc<Shared>,
}

impl Progress {
    /// A detached progress, not bound to any transfer.
    pub fn new(total: Option<u64>) -> Self {
        Self::with_controls(total, None, None, None)
    }

    pub(crate) fn with_controls(
        total: Option<u64>,
        pause: Option<Control>,
        resume: Option<Control>,
        cancel: Option<Control>,
    ) -> Self {
        Progress {
            shared: Arc::new(Shared {
                counts: Mutex::new(Counts {
                    total,
                    ..Counts::default()
                }),
                pause,
                resume,
                cancel,
            }),
        }
    }

    /// Units completed so far. Never decreases.
    pub fn completed_unit_count(&self) -> u64 {
        self.shared.counts.lock().completed
    }

    /// Units expected in total, if known.
    pub fn total_unit_count(&self) -> Option<u64> {
        self.shared.counts.lock().total
    }

    /// Completed units as a fraction of the total, if the total is known and non-zero.
    pub fn fraction_completed(&self) -> Option<f64> {
        let counts = *self.shared.counts.lock();
        counts
            .total
            .filter(|total| *total > 0)
            .map(|total| counts.completed as f64 / total as f64)
    }

    /// Whether the transfer is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.counts.lock().paused
    }

    /// Whether the transfer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.counts.lock().cancelled
    }

    /// Whether pausing reaches a transfer.
    pub fn is_pausable(&self) -> bool {
        self.shared.pause.is_some()
    }

    /// Pause the transfer.
    pub fn pause(&self) {
        if self.mark_paused(true) {
            if let Some(pause) = &self.shared.pause {
                pause();
            }
        }
    }

    /// Resume a paused transfer.
    pub fn resume(&self) {
        if self.mark_paused(false) {
            if let Some(resume) = &self.shared.resume {
                resume();
            }
        }
    }

    /// Cancel the transfer.
    pub fn cancel(&self) {
        if self.mark_cancelled() {
            if let Some(cancel) = &self.shared.cancel {
                cancel();
            }
        }
    }

    /// Returns whether the paused flag changed.
    pub(crate) fn mark_paused(&self, paused: bool) -> bool {
        let mut counts = self.shared.counts.lock();
        if counts.cancelled || counts.paused == paused {
            return false;
        }
        counts.paused = paused;
        true
    }

    /// Returns whether the progress was not already cancelled.
    pub(crate) fn mark_cancelled(&self) -> bool {
        let mut counts = self.shared.counts.lock();
        if counts.cancelled {
            return false;
        }
        counts.cancelled = true;
        true
    }

    pub(crate) fn update(&self, completed: u64, total: Option<u64>) {
        let mut counts = self.shared.counts.lock();
        counts.completed = counts.completed.max(completed);
        if total.is_some() {
            counts.total = total;
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = *self.shared.counts.lock();
        f.debug_struct("Progress")
            .field("completed", &counts.completed)
            .field("total", &counts.total)
            .field("paused", &counts.paused)
            .field("cancelled", &counts.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    assert_impl_all!(Progress: Send, Sync, Clone);

    #[test]
    fn completed_is_monotonic() {
        let progress = Progress::new(None);
        progress.update(10, Some(100));
        progress.update(4, None);
        assert_eq!(progress.completed_unit_count(), 10);
        assert_eq!(progress.total_unit_count(), Some(100));
        assert_eq!(progress.fraction_completed(), Some(0.1));
    }

    #[test]
    fn controls_fire_once_per_transition() {
        let pauses = Arc::new(AtomicUsize::new(0));
        let cancels = Arc::new(AtomicUsize::new(0));
        let progress = Progress::with_controls(
            None,
            Some(Box::new({
                let pauses = pauses.clone();
                move || {
                    pauses.fetch_add(1, Ordering::SeqCst);
                }
            })),
            None,
            Some(Box::new({
                let cancels = cancels.clone();
                move || {
                    cancels.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );

        progress.pause();
        progress.pause();
        assert!(progress.is_paused());
        assert_eq!(pauses.load(Ordering::SeqCst), 1);

        progress.resume();
        assert!(!progress.is_paused());

        progress.cancel();
        progress.cancel();
        progress.pause();
        assert!(progress.is_cancelled());
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
    }
}
