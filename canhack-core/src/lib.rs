#![no_std]
#![warn(missing_docs)]

//! `canhack-core` provides the small set of traits that serve as the
//! integration layer between the platform independent [`canhack`] crate and
//! platform specific HALs (in documentation also referred to as _target
//! HALs_).
//!
//! [`canhack`] runs a time-driven loop that bit-bangs a CAN/CAN FD bus on a
//! single pair of TX/RX pins. It does not know how to read a clock or drive
//! a GPIO pin; that is supplied by a target HAL implementing [`Hal`] (and,
//! through its supertrait, [`Timing`]).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer in the usual case; implementations should be
//! provided by target HALs for a specific board and bit rate.
//!
//! [`canhack`]: <https://docs.rs/crate/canhack/>

use core::ops::Not;

/// A free-running hardware counter value, in whatever tick unit the target
/// HAL counts in (CPU cycles, or a fixed sub-bit tick). Comparisons and
/// arithmetic on `Instant` are defined to tolerate wraparound of the
/// underlying counter: see [`advance`] and [`reached`].
pub type Instant = u32;

/// Advances `t` by `dt` ticks, wrapping on overflow.
///
/// Equivalent to the original `ADVANCE(t, dt)` macro. The maximum single
/// step used anywhere in this crate is one (possibly FD) bit time, far
/// below the half-range of `Instant` at which wraparound-tolerant
/// comparisons in [`reached`] would become ambiguous.
pub const fn advance(t: Instant, dt: u32) -> Instant {
    t.wrapping_add(dt)
}

/// Returns `true` once `now` has reached or passed the deadline `t`,
/// tolerant of counter wraparound.
///
/// Equivalent to the original `REACHED(now, t)` macro: rather than a plain
/// `now >= t`, which breaks the instant the counter wraps, the comparison is
/// done on the wrapping difference interpreted as signed.
pub fn reached(now: Instant, t: Instant) -> bool {
    (now.wrapping_sub(t) as i32) >= 0
}

/// The state of the CAN bus wire: dominant (driven, `0`) or recessive
/// (released, `1`).
///
/// This is also used as the element type of an encoded bitstream: CAN's
/// wired-AND semantics mean "dominant" always wins regardless of how many
/// transmitters assert it, which is exactly why the arbitration and error
/// mechanisms in this crate work at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    /// Bus driven low; always wins arbitration against a recessive bit.
    Dominant = 0,
    /// Bus released high (through the transceiver's passive pull).
    Recessive = 1,
}

impl Level {
    /// Returns the wire value as `0`/`1`, matching the encoding used
    /// throughout `spec.md`'s data model (`0` = dominant, `1` = recessive).
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Builds a `Level` from a `0`/`1` wire sample.
    pub const fn from_bit(bit: u8) -> Self {
        if bit != 0 {
            Level::Recessive
        } else {
            Level::Dominant
        }
    }

    /// `true` for [`Level::Recessive`].
    pub const fn is_recessive(self) -> bool {
        matches!(self, Level::Recessive)
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Dominant => Level::Recessive,
            Level::Recessive => Level::Dominant,
        }
    }
}

impl From<bool> for Level {
    /// `true` maps to recessive, following the `0`/`1` = dominant/recessive
    /// convention used everywhere else in this crate.
    fn from(recessive: bool) -> Self {
        if recessive {
            Level::Recessive
        } else {
            Level::Dominant
        }
    }
}

/// Per-bit timing constants for one configured bit rate (and, for CAN FD,
/// the bit-rate-switched data phase).
///
/// A target HAL picks concrete values for a chosen nominal/data bit rate and
/// sample point and implements this trait once per configuration; see
/// `spec.md` §6 for the derivation of each constant from a real bit-timing
/// calculation.
pub trait Timing {
    /// Duration of one nominal (arbitration/control/CRC-for-classic) bit, in
    /// [`Instant`] ticks.
    const BIT_TIME: u32;
    /// Duration of one bit in the bit-rate-switched CAN FD data phase.
    const BIT_TIME_FD: u32;
    /// Offset from the start of a nominal bit to its sample point.
    const SAMPLE_POINT_OFFSET: u32;
    /// Offset from the start of an FD data-phase bit to its sample point.
    const SAMPLE_POINT_OFFSET_FD: u32;
    /// Offset from the nominal sample point to the end of the bit
    /// (`BIT_TIME - SAMPLE_POINT_OFFSET`, supplied directly rather than
    /// computed so odd/asymmetric timing tables can be expressed exactly).
    const SAMPLE_TO_BIT_END: u32;
    /// Offset from the FD data-phase sample point to the end of the bit.
    const SAMPLE_TO_BIT_END_FD: u32;
    /// Counter value a hard-sync (recessive-to-dominant edge) recalibration
    /// advances the clock origin by, to compensate for the latency between
    /// the edge occurring and the recalibration being observed.
    const FALLING_EDGE_RECALIBRATE: u32;
    /// Minimum bitstream capacity, in bits, required to hold the longest
    /// legal frame this HAL will ever be asked to encode (a full 64-byte CAN
    /// FD frame, worst-cased for stuff bits). Integrators size
    /// `canhack::frame::Frame`'s const generic to at least this value; see
    /// `SPEC_FULL.md` Open Question OQ-1.
    const MAX_BITS: usize;
}

/// Everything a target HAL must provide for [`canhack`] to drive and sample
/// a bit-banged CAN bus.
///
/// Implementations are expected to be a thin, direct mapping onto GPIO
/// register writes/reads and a free-running timer; all higher-level
/// behavior (arbitration, bit stuffing, CRC, attacks) lives in [`canhack`]
/// and is platform independent.
///
/// [`canhack`]: <https://docs.rs/crate/canhack/>
pub trait Hal: Timing {
    /// Reads the free-running counter.
    fn now(&mut self) -> Instant;

    /// Zeroes (or pre-loads) the free-running counter. Used to realign the
    /// clock origin to a hard-sync edge.
    fn reset_clock(&mut self, offset: Instant);

    /// Drives the TX pin to `level`.
    fn set_can_tx(&mut self, level: Level);

    /// Drives TX dominant. Default forwards to [`Hal::set_can_tx`].
    fn set_can_tx_dom(&mut self) {
        self.set_can_tx(Level::Dominant)
    }

    /// Releases TX to recessive. Default forwards to [`Hal::set_can_tx`].
    fn set_can_tx_rec(&mut self) {
        self.set_can_tx(Level::Recessive)
    }

    /// Samples the RX pin.
    fn get_can_rx(&mut self) -> Level;

    /// Writes an optional diagnostic pin. The default is a no-op; HALs
    /// without a spare pin need not override it.
    fn set_debug(&mut self, _level: Level) {}
}
