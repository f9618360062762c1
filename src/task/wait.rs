use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One-shot latch for blocking until a task resolves.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    /// Returns `false` if the timeout elapsed first.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        self.cv.wait_while_for(&mut done, |done| !*done, timeout);
        *done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn signal_before_wait_does_not_block() {
        let latch = Latch::new();
        latch.signal();
        latch.wait();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wakes_waiter_on_other_thread() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = latch.clone();
            std::thread::spawn(move || latch.wait())
        };
        latch.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn times_out() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }
}
