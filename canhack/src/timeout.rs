//! The cooperative cancellation counter shared between engine loops and
//! (typically) an interrupt handler or a second core.
//!
//! Grounded on `canhack.canhack_timeout` and `canhack_set_timeout`/
//! `canhack_stop` in `canhack.c`: a single `uint32_t`, decremented once per
//! iteration of every tight polling loop in the engine, tested for having
//! reached zero on the *old* value before the decrement (so it wraps to
//! `u32::MAX` rather than saturating). `core::sync::atomic::AtomicU32` with
//! `Relaxed` ordering reproduces this exactly: no engine loop blocks, and the
//! counter is a single word so torn reads/writes are not a concern, matching
//! `spec.md` §5's "tear-free" requirement without needing a mutex.

use core::sync::atomic::{AtomicU32, Ordering};

/// A wraparound-tolerant, decrement-to-zero cancellation counter.
pub(crate) struct Timeout(AtomicU32);

impl Timeout {
    /// Starts a fresh counter at `n`.
    pub(crate) fn new(n: u32) -> Self {
        Self(AtomicU32::new(n))
    }

    /// Sets the counter to `n`, as `canhack_set_timeout` does.
    pub(crate) fn set(&self, n: u32) {
        self.0.store(n, Ordering::Relaxed);
    }

    /// Stops the current operation, as `canhack_stop` does: the very next
    /// [`Timeout::tick`] call will report expired.
    pub(crate) fn stop(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    /// One iteration of a polling loop: decrements the counter and reports
    /// whether it had already reached zero *before* this decrement.
    ///
    /// Mirrors `canhack.canhack_timeout-- == 0`: a post-decrement compare,
    /// so on expiry the stored value wraps to `u32::MAX` rather than
    /// clamping, exactly as the C's unsigned decrement does.
    pub(crate) fn tick(&self) -> bool {
        self.0.fetch_sub(1, Ordering::Relaxed) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_n_ticks() {
        let t = Timeout::new(3);
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
    }

    #[test]
    fn stop_expires_immediately() {
        let t = Timeout::new(1000);
        t.stop();
        assert!(t.tick());
    }

    #[test]
    fn zero_expires_on_first_tick_and_wraps() {
        let t = Timeout::new(0);
        assert!(t.tick());
        // Wrapped to u32::MAX - 1 after the expiring tick; far from zero.
        assert!(!t.tick());
    }
}
