//! A deterministic, in-memory [`Hal`] used by this crate's own unit tests.
//!
//! The teacher crate cannot unit test register I/O off real hardware and
//! relies on `no_run` doctests instead; the engine and attack state
//! machines here are pure enough over an abstract `Hal` that a software
//! model is both possible and far more useful, so they get one. `now`
//! advances a plain counter by one tick per call rather than reading a real
//! clock, which is enough to drive every `reached`/`advance` deadline in
//! the engine deterministically.

use canhack_core::{Hal, Instant, Level, Timing};

/// How the mock answers [`Hal::get_can_rx`].
enum RxModel {
    /// Always returns the most recently driven level: a perfect loopback
    /// with no other transmitter on the bus.
    Echo,
    /// Always returns a fixed level, regardless of what was driven —
    /// models another transmitter holding the bus to a value that
    /// disagrees with ours.
    Fixed(Level),
}

pub(crate) struct MockHal {
    clock: Instant,
    last_driven: Level,
    rx: RxModel,
    driven: heapless_log::Log,
}

/// A small fixed-capacity log of driven levels, avoiding any dependency on
/// `alloc` in this `no_std` crate's test harness.
mod heapless_log {
    pub(crate) struct Log {
        levels: [super::Level; 1024],
        len: usize,
    }

    impl Log {
        pub(crate) const fn new() -> Self {
            Self {
                levels: [super::Level::Recessive; 1024],
                len: 0,
            }
        }

        pub(crate) fn push(&mut self, level: super::Level) {
            if self.len < self.levels.len() {
                self.levels[self.len] = level;
                self.len += 1;
            }
        }

        pub(crate) fn as_slice(&self) -> &[super::Level] {
            &self.levels[..self.len]
        }
    }
}

impl MockHal {
    /// An echoing bus with a generous tick budget; `budget` only bounds the
    /// internal driven-level log, not the clock.
    ///
    /// `last_driven` starts `Dominant`, matching the SOF bit that, by the
    /// convention `send_bits`' `tx_index` uses, has already been driven by
    /// the time it's invoked with `tx_index >= 1`.
    pub(crate) fn echoing(_budget: usize) -> Self {
        Self {
            clock: 0,
            last_driven: Level::Dominant,
            rx: RxModel::Echo,
            driven: heapless_log::Log::new(),
        }
    }

    /// A bus where RX is pinned to `level` regardless of what's driven.
    pub(crate) fn fixed(level: Level, _budget: usize) -> Self {
        Self {
            clock: 0,
            last_driven: Level::Dominant,
            rx: RxModel::Fixed(level),
            driven: heapless_log::Log::new(),
        }
    }

    pub(crate) fn driven_levels(&self) -> &[Level] {
        self.driven.as_slice()
    }
}

impl Timing for MockHal {
    const BIT_TIME: u32 = 100;
    const BIT_TIME_FD: u32 = 25;
    const SAMPLE_POINT_OFFSET: u32 = 70;
    const SAMPLE_POINT_OFFSET_FD: u32 = 18;
    const SAMPLE_TO_BIT_END: u32 = 30;
    const SAMPLE_TO_BIT_END_FD: u32 = 7;
    const FALLING_EDGE_RECALIBRATE: u32 = 5;
    const MAX_BITS: usize = 800;
}

impl Hal for MockHal {
    fn now(&mut self) -> Instant {
        self.clock = self.clock.wrapping_add(1);
        self.clock
    }

    fn reset_clock(&mut self, offset: Instant) {
        self.clock = offset;
    }

    fn set_can_tx(&mut self, level: Level) {
        self.last_driven = level;
        self.driven.push(level);
    }

    fn get_can_rx(&mut self) -> Level {
        match self.rx {
            RxModel::Echo => self.last_driven,
            RxModel::Fixed(level) => level,
        }
    }
}
