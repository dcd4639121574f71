//! [`CanHack`], the single owned engine record tying a target HAL to the two
//! frame slots, the derived attack masks and the cooperative timeout
//! counter together, and exposing every public operation as an inherent
//! method.
//!
//! Grounded on the C source's file-scope `struct canhack canhack;` global
//! (`canhack.c`) — this rewrite makes that state an explicit, ordinarily
//! stack- or `static`-allocated value instead of a hidden global, per
//! `spec.md` §3's "Invariants" and `SPEC_FULL.md` §4.

use crate::attack::{self, AttackMasks};
use crate::engine::{self, TransmitOutcome};
use crate::frame::{Frame, FrameBuilder, FrameTooLong};
use crate::timeout::Timeout;
use canhack_core::Hal;
use embedded_can::Id;

/// Selects which of the two frame slots an operation applies to.
///
/// The C source threads this through as a `bool second` parameter; modeled
/// here as an enum so call sites read as `Slot::First`/`Slot::Second`
/// instead of a bare boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// `can_frame1` in `canhack.c`: the frame used by every single-frame
    /// operation, and the first half of a Janus pair.
    First,
    /// `can_frame2` in `canhack.c`: only used as the second half of a
    /// Janus pair.
    Second,
}

/// The bit-banged CAN/CAN FD hacking engine.
///
/// Owns the target HAL (`H`), two frame slots sized for `N` bits each, the
/// derived [`AttackMasks`], and the cooperative cancellation counter. There
/// is deliberately no `Default`/global instance, unlike the C's file-scope
/// `struct canhack canhack;`; construct one with [`CanHack::new`] and keep
/// it wherever the application keeps its other owned state.
pub struct CanHack<H: Hal, const N: usize> {
    hal: H,
    frame1: Frame<N>,
    frame2: Frame<N>,
    masks: AttackMasks,
    timeout: Timeout,
    /// Sticky success latch. Grounded on `canhack_p->sent`: set `true`
    /// whenever a frame is driven to completion, and — faithfully
    /// reproducing the original, which never clears it — never reset by
    /// this crate. A caller that needs to distinguish "this exact call
    /// succeeded" from "some earlier call succeeded" should track that
    /// itself; see `SPEC_FULL.md` Open Question OQ-5.
    sent: bool,
}

impl<H: Hal, const N: usize> CanHack<H, N> {
    /// Creates a fresh engine around `hal`, with both frame slots unset.
    ///
    /// Grounded on `canhack_init`, generalized: the C only resets
    /// `frame_set`, relying on the rest of the zero-initialized global to
    /// already be zero; this constructor establishes that same all-zero
    /// baseline explicitly rather than depending on a hidden global.
    pub fn new(hal: H) -> Self {
        Self {
            hal,
            frame1: Frame::empty(),
            frame2: Frame::empty(),
            masks: AttackMasks::default(),
            timeout: Timeout::new(0),
            sent: false,
        }
    }

    /// Marks both frame slots unset, as `canhack_init` does.
    pub fn init(&mut self) {
        self.frame1.clear();
        self.frame2.clear();
    }

    /// Encodes `builder` into `slot`.
    ///
    /// Grounded on `canhack_set_frame`; the logical fields are taken from
    /// [`FrameBuilder`] (itself built from `embedded_can::Id`) rather than
    /// raw `id_a`/`id_b` integers, per `SPEC_FULL.md` §7.
    pub fn set_frame(&mut self, slot: Slot, builder: FrameBuilder<'_>) -> Result<(), FrameTooLong> {
        let frame = builder.build()?;
        match slot {
            Slot::First => self.frame1 = frame,
            Slot::Second => self.frame2 = frame,
        }
        Ok(())
    }

    /// Returns the frame currently held in `slot`.
    pub fn get_frame(&self, slot: Slot) -> &Frame<N> {
        match slot {
            Slot::First => &self.frame1,
            Slot::Second => &self.frame2,
        }
    }

    /// The identifier held in `slot`, if any frame has been set there.
    pub fn id(&self, slot: Slot) -> Id {
        self.get_frame(slot).id()
    }

    /// Derives and stores the attack recognition masks from frame slot 1.
    ///
    /// Grounded on `canhack_set_attack_masks`: frame 2 is only ever used as
    /// the second half of a Janus pair and never contributes to the match
    /// masks, exactly as upstream.
    pub fn set_attack_masks(&mut self) {
        self.masks = AttackMasks::derive(&self.frame1);
    }

    /// Sets the cooperative timeout counter, in polling-loop iterations.
    pub fn set_timeout(&mut self, timeout: u32) {
        self.timeout.set(timeout);
    }

    /// Stops whatever operation is currently running, at its next poll.
    pub fn stop(&mut self) {
        self.timeout.stop();
    }

    /// `true` if a frame has been driven to completion at least once since
    /// construction. See the caveat on the `sent` field: this is a sticky
    /// latch, not a per-call result.
    pub fn sent(&self) -> bool {
        self.sent
    }

    /// Sends frame slot `slot`, retrying from bus idle up to `retries`
    /// times on arbitration loss or a bus error.
    ///
    /// Returns `true` if the frame was transmitted to completion, `false`
    /// on a timeout or exhausted retries. Grounded on `canhack_send_frame`.
    pub fn send_frame(&mut self, slot: Slot, retries: u32) -> bool {
        let frame = match slot {
            Slot::First => &self.frame1,
            Slot::Second => &self.frame2,
        };
        match engine::send_frame(&mut self.hal, frame, retries, &self.timeout) {
            Some(true) => {
                self.sent = true;
                true
            }
            _ => false,
        }
    }

    /// Sends frame slots 1 and 2 as a Janus pair, presenting frame 1's bit
    /// values to receivers sampling early in the bit and frame 2's to
    /// receivers sampling late.
    ///
    /// Grounded on `canhack_send_janus_frame`.
    pub fn send_janus_frame(
        &mut self,
        sync_time: u32,
        split_time: u32,
        sync_time_fd: u32,
        split_time_fd: u32,
        retries: u32,
    ) -> bool {
        match engine::send_janus_frame(
            &mut self.hal,
            &self.frame1,
            &self.frame2,
            sync_time,
            split_time,
            sync_time_fd,
            split_time_fd,
            retries,
            &self.timeout,
        ) {
            Some(true) => {
                self.sent = true;
                true
            }
            _ => false,
        }
    }

    /// Waits for a frame matching the derived attack masks, then sends
    /// frame slot 1 (or, if `janus`, frame slots 1+2 as a Janus pair) right
    /// after winning the next arbitration.
    ///
    /// Grounded on `canhack_spoof_frame`.
    pub fn spoof_frame(
        &mut self,
        janus: bool,
        sync_time: u32,
        split_time: u32,
        sync_time_fd: u32,
        split_time_fd: u32,
        retries: u32,
    ) -> bool {
        match attack::spoof_frame(
            &mut self.hal,
            &self.masks,
            janus,
            &self.frame1,
            &self.frame2,
            sync_time,
            split_time,
            sync_time_fd,
            split_time_fd,
            retries,
            &self.timeout,
        ) {
            Some(true) => {
                self.sent = true;
                true
            }
            _ => false,
        }
    }

    /// Waits for a frame matching the derived attack masks, then overwrites
    /// it in place starting `loopback_offset` ticks early.
    ///
    /// Grounded on `canhack_spoof_frame_error_passive`.
    pub fn spoof_frame_error_passive(&mut self, loopback_offset: u32) -> bool {
        match attack::spoof_frame_error_passive(
            &mut self.hal,
            &self.masks,
            &self.frame1,
            loopback_offset,
            &self.timeout,
        ) {
            Some(TransmitOutcome::Sent) => {
                self.sent = true;
                true
            }
            _ => false,
        }
    }

    /// Waits for a frame matching the derived attack masks, optionally
    /// injects a dominant error flag, then injects a further dominant run
    /// at the EOF/IFS point matched by `eof_mask`/`eof_match`, up to
    /// `repeat` times.
    ///
    /// Grounded on `canhack_error_attack`, including the upstream
    /// widened-mask bug reproduced per `SPEC_FULL.md` Open Question OQ-2.
    pub fn error_attack(
        &mut self,
        repeat: u32,
        inject_error: bool,
        eof_mask: u32,
        eof_match: u32,
    ) -> bool {
        attack::error_attack(
            &mut self.hal,
            &self.masks,
            &self.frame1,
            repeat,
            inject_error,
            eof_mask,
            eof_match,
            &self.timeout,
        )
        .unwrap_or(false)
    }

    /// Drives a plain square wave on TX, toggling every bit time for 160
    /// bit times. Grounded on `canhack_send_square_wave`.
    pub fn send_square_wave(&mut self) {
        attack::send_square_wave(&mut self.hal, &self.timeout);
    }

    /// Echoes RX to the debug pin once per bit time after the next falling
    /// edge, for 160 (or, if `fd`, 700) bit times. Grounded on
    /// `canhack_loopback`.
    pub fn loopback(&mut self, fd: bool) {
        attack::loopback(&mut self.hal, fd, &self.timeout);
    }

    /// Releases the HAL back to the caller.
    pub fn into_inner(self) -> H {
        self.hal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockHal;
    use embedded_can::StandardId;

    #[test]
    fn set_frame_then_get_frame_round_trips_id() {
        let mut hack: CanHack<MockHal, 200> = CanHack::new(MockHal::echoing(0));
        let id = Id::Standard(StandardId::new(0x321).unwrap());
        hack.set_frame(
            Slot::First,
            FrameBuilder {
                id,
                rtr: false,
                fd: false,
                brs: false,
                esi: false,
                dlc: 0,
                data: &[],
            },
        )
        .unwrap();
        assert_eq!(hack.id(Slot::First), id);
        assert!(hack.get_frame(Slot::First).frame_set());
    }

    #[test]
    fn init_clears_frame_set() {
        let mut hack: CanHack<MockHal, 200> = CanHack::new(MockHal::echoing(0));
        hack.set_frame(
            Slot::First,
            FrameBuilder {
                id: Id::Standard(StandardId::new(1).unwrap()),
                rtr: false,
                fd: false,
                brs: false,
                esi: false,
                dlc: 0,
                data: &[],
            },
        )
        .unwrap();
        assert!(hack.get_frame(Slot::First).frame_set());
        hack.init();
        assert!(!hack.get_frame(Slot::First).frame_set());
    }

    #[test]
    fn sent_latch_is_sticky() {
        let mut hack: CanHack<MockHal, 200> = CanHack::new(MockHal::echoing(0));
        assert!(!hack.sent());
        hack.set_frame(
            Slot::First,
            FrameBuilder {
                id: Id::Standard(StandardId::new(0x10).unwrap()),
                rtr: false,
                fd: false,
                brs: false,
                esi: false,
                dlc: 1,
                data: &[0x55],
            },
        )
        .unwrap();
        hack.set_timeout(10_000);
        let sent = hack.send_frame(Slot::First, 0);
        assert!(sent);
        assert!(hack.sent());
    }
}
