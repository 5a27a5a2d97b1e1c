//! Shared readiness and timeout primitives.
//!
//! The acquisition worker and the in-memory test providers both wait on a
//! reusable, auto-resetting signal bounded by a timeout, mirroring the
//! auto-reset kernel event a live publisher exposes.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of waiting for a readiness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    Timeout,
}

/// Reusable auto-resetting wait primitive.
///
/// One `set` releases exactly one waiter; the signal rearms itself once the
/// wait consumes it. `Duration::MAX` waits without a deadline.
#[derive(Debug, Default)]
pub struct AutoResetSignal {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl AutoResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal one waiter, or the next wait if none is blocked yet.
    pub fn set(&self) {
        let mut signaled = lock_ignore_poison(&self.signaled);
        *signaled = true;
        self.cv.notify_one();
    }

    /// Block until signaled or the timeout elapses.
    pub fn wait(&self, timeout: Duration) -> WaitResult {
        let deadline = Instant::now().checked_add(timeout);
        let mut signaled = lock_ignore_poison(&self.signaled);

        loop {
            if *signaled {
                *signaled = false;
                return WaitResult::Signaled;
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitResult::Timeout;
                    }
                    let (guard, wait) = self
                        .cv
                        .wait_timeout(signaled, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    signaled = guard;
                    if wait.timed_out() && !*signaled {
                        return WaitResult::Timeout;
                    }
                }
                // Timeout overflowed Instant: treat as wait-forever.
                None => {
                    signaled = self
                        .cv
                        .wait(signaled)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }
}

fn lock_ignore_poison<'a>(mutex: &'a Mutex<bool>) -> MutexGuard<'a, bool> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_satisfies_exactly_one_wait() {
        let signal = AutoResetSignal::new();
        signal.set();

        assert_eq!(signal.wait(Duration::from_millis(10)), WaitResult::Signaled);
        // Consumed: the signal rearmed itself.
        assert_eq!(signal.wait(Duration::from_millis(10)), WaitResult::Timeout);
    }

    #[test]
    fn repeated_sets_coalesce() {
        let signal = AutoResetSignal::new();
        signal.set();
        signal.set();

        assert_eq!(signal.wait(Duration::from_millis(10)), WaitResult::Signaled);
        assert_eq!(signal.wait(Duration::from_millis(10)), WaitResult::Timeout);
    }

    #[test]
    fn wait_times_out_without_signal() {
        let signal = AutoResetSignal::new();
        let start = Instant::now();
        assert_eq!(signal.wait(Duration::from_millis(20)), WaitResult::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cross_thread_wake() {
        let signal = Arc::new(AutoResetSignal::new());
        let waker = Arc::clone(&signal);

        let waiter = std::thread::spawn(move || signal.wait(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        waker.set();

        assert_eq!(waiter.join().expect("waiter panicked"), WaitResult::Signaled);
    }
}
