//! The CAN/CAN FD frame encoder.
//!
//! [`Frame`] holds the on-wire bit sequence for one logical frame — stuff
//! bits, CRC, fixed stuff bits, CRC delimiter, ACK slot, EOF and IFS all
//! included — exactly as it will be driven onto the bus by
//! [`crate::engine`]. [`FrameBuilder`] is the only way to populate one,
//! mirroring `canhack_set_frame`/`add_bit`/`add_raw_bit` in the original
//! `canhack.c`, and the shape of `tx::MessageBuilder` in the teacher crate.

pub mod crc;

use crc::{Crc, CrcWidth};
use canhack_core::Level;
use embedded_can::{Id, StandardId};

/// Data would not fit in the `N`-bit backing bitstream.
///
/// Unlike the original C, which silently overran a fixed-size global array,
/// [`FrameBuilder::build`] reports this instead of corrupting memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTooLong;

/// Computes the data length, in bytes, encoded by a DLC field.
///
/// `spec.md` §4.2's length table: classic frames cap at 8 bytes for any
/// DLC >= 8; CAN FD frames use the non-linear 12/16/20/24/32/48/64 byte
/// lengths for DLC 9..=15.
const fn data_len(dlc: u8, fd: bool) -> usize {
    if !fd || dlc <= 8 {
        if dlc >= 8 {
            8
        } else {
            dlc as usize
        }
    } else if dlc <= 12 {
        4 * (dlc as usize - 6)
    } else if dlc == 13 {
        32
    } else {
        16 * (dlc as usize - 11)
    }
}

/// One encoded CAN or CAN FD frame: the exact on-wire bit sequence plus the
/// field-boundary indices the bit-timing engine and attacks need.
///
/// `N` is the bitstream capacity in bits, chosen by the integrator; see
/// `SPEC_FULL.md` Open Question OQ-1. [`canhack_core::Timing::MAX_BITS`]
/// documents the minimum safe value for a given target.
pub struct Frame<const N: usize> {
    tx_bitstream: [Level; N],
    stuff_bit: [bool; N],
    tx_bits: usize,
    last_arbitration_bit: usize,
    last_dlc_bit: usize,
    last_data_bit: usize,
    last_crc_bit: usize,
    last_eof_bit: usize,
    /// Index of the BRS bit, or `N` (sentinel) if this frame is not FD+BRS.
    pub(crate) brs_bit: usize,
    tx_arbitration_bits: usize,
    fd: bool,
    brs: bool,
    frame_set: bool,
    dlc: u8,
    rtr: bool,
    id: Id,
}

impl<const N: usize> Frame<N> {
    /// An empty, unset frame slot (all bits dominant, as `canhack_init`
    /// leaves a fresh frame record).
    pub const fn empty() -> Self {
        Self {
            tx_bitstream: [Level::Dominant; N],
            stuff_bit: [false; N],
            tx_bits: 0,
            last_arbitration_bit: 0,
            last_dlc_bit: 0,
            last_data_bit: 0,
            last_crc_bit: 0,
            last_eof_bit: 0,
            brs_bit: N,
            tx_arbitration_bits: 0,
            fd: false,
            brs: false,
            frame_set: false,
            dlc: 0,
            rtr: false,
            id: Id::Standard(StandardId::ZERO),
        }
    }

    /// The encoded bitstream, in transmission order, up to [`Frame::tx_bits`].
    pub fn tx_bitstream(&self) -> &[Level] {
        &self.tx_bitstream[..self.tx_bits]
    }

    /// Reads bit `i` of the backing bitstream, including positions at or
    /// past [`Frame::tx_bits`].
    ///
    /// The original C indexes a fixed `CANHACK_MAX_BITS` array whose tail,
    /// past the frame actually encoded into it, is zero-initialized (i.e.
    /// dominant); `send_janus_bits` relies on exactly this when the two
    /// Janus frames differ in length, reading past the shorter one's real
    /// content for the remaining bits of the longer one. [`Frame::empty`]
    /// leaves every slot [`Level::Dominant`] and [`FrameBuilder::build`]
    /// only ever writes the first `tx_bits` of them, so this reproduces that
    /// tail-is-dominant behavior exactly, without the out-of-bounds panic a
    /// truncated [`Frame::tx_bitstream`] slice would give.
    pub(crate) fn bit_at(&self, i: usize) -> Level {
        self.tx_bitstream[i]
    }

    /// Parallel flags marking which positions in [`Frame::tx_bitstream`] are
    /// stuff bits (for display/diagnostics only).
    pub fn stuff_bit(&self) -> &[bool] {
        &self.stuff_bit[..self.tx_bits]
    }

    /// Length of the encoded stream, in bits.
    pub fn tx_bits(&self) -> usize {
        self.tx_bits
    }

    /// Index of the last bit of the arbitration field.
    pub fn last_arbitration_bit(&self) -> usize {
        self.last_arbitration_bit
    }

    /// Index of the last bit of the DLC field.
    pub fn last_dlc_bit(&self) -> usize {
        self.last_dlc_bit
    }

    /// Index of the last bit of the data field.
    pub fn last_data_bit(&self) -> usize {
        self.last_data_bit
    }

    /// Index of the last bit of the CRC field.
    pub fn last_crc_bit(&self) -> usize {
        self.last_crc_bit
    }

    /// Index of the last bit of the EOF field.
    pub fn last_eof_bit(&self) -> usize {
        self.last_eof_bit
    }

    /// Index of the BRS bit, if this is an FD frame with bit-rate switching.
    pub fn brs_bit(&self) -> Option<usize> {
        (self.brs_bit != N).then_some(self.brs_bit)
    }

    /// `last_arbitration_bit + 1`: the number of bits, from SOF, that take
    /// part in arbitration.
    pub fn tx_arbitration_bits(&self) -> usize {
        self.tx_arbitration_bits
    }

    /// `true` if this is a CAN FD frame.
    pub fn fd(&self) -> bool {
        self.fd
    }

    /// `true` if bit-rate switching is active.
    pub fn brs(&self) -> bool {
        self.brs
    }

    /// `true` once [`FrameBuilder::build`] has populated this slot.
    pub fn frame_set(&self) -> bool {
        self.frame_set
    }

    /// The frame's identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// The frame's DLC field value (0..=15).
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// `true` if this is a remote frame.
    pub fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    /// Marks this slot as unset, matching `canhack_init`'s per-frame reset.
    pub fn clear(&mut self) {
        self.frame_set = false;
    }
}

impl<const N: usize> Default for Frame<N> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Describes a logical CAN/CAN FD frame to encode into a [`Frame`].
///
/// Field order and stuffing/CRC rules follow `spec.md` §4.2 exactly;
/// construction mirrors `tx::MessageBuilder` in the teacher crate, adapted
/// to produce a full bitstream rather than a peripheral register image.
pub struct FrameBuilder<'a> {
    /// CAN identifier. `Id::Standard` selects a classic 11-bit arbitration
    /// field (IDE=0); `Id::Extended` selects the 29-bit field (IDE=1, split
    /// on the wire into an 11-bit ID A and an 18-bit ID B).
    pub id: Id,
    /// Remote transmission request. Carries no data irrespective of `dlc`.
    pub rtr: bool,
    /// Encode as a CAN FD frame.
    pub fd: bool,
    /// Bit-rate switching (only meaningful if `fd`).
    pub brs: bool,
    /// Error state indicator (only meaningful if `fd`); transmitted
    /// inverted on the wire (`spec.md` §4.2).
    pub esi: bool,
    /// Data length code, 0..=15. The byte length it decodes to depends on
    /// `fd`; see `spec.md` §4.2's length table.
    pub dlc: u8,
    /// Frame payload. Only the first `N` bytes implied by `dlc`/`fd` are
    /// used; ignored entirely if `rtr`. Caller contract: must be at least
    /// as long as that implied length (`spec.md` §7 — not validated at
    /// runtime beyond a debug assertion).
    pub data: &'a [u8],
}

/// Tracks encoder-transient state across a single [`FrameBuilder::build`]
/// call: the running CRC, the current same-polarity run lengths, and
/// whether CRC accumulation / bit stuffing are currently active.
///
/// The original C keeps this state resident in the frame struct for the
/// lifetime of the program; here it lives only on the stack for the
/// duration of encoding; nothing in `Frame` depends on it surviving past
/// `build`.
struct Encoder<'f, const N: usize> {
    frame: &'f mut Frame<N>,
    crc: Crc,
    crcing: bool,
    stuffing: bool,
    dominant_bits: u32,
    recessive_bits: u32,
    stuff_count: u32,
}

impl<'f, const N: usize> Encoder<'f, N> {
    fn add_raw_bit(&mut self, bit: bool, stuff: bool) -> Result<(), FrameTooLong> {
        let i = self.frame.tx_bits;
        if i >= N {
            return Err(FrameTooLong);
        }
        self.frame.stuff_bit[i] = stuff;
        if stuff {
            self.stuff_count += 1;
        }
        self.frame.tx_bitstream[i] = Level::from(bit);
        self.frame.tx_bits += 1;
        Ok(())
    }

    fn add_bit(&mut self, bit: bool) -> Result<(), FrameTooLong> {
        if self.crcing {
            self.crc.shift(bit);
        }
        self.add_raw_bit(bit, false)?;

        if bit {
            self.recessive_bits += 1;
            self.dominant_bits = 0;
        } else {
            self.dominant_bits += 1;
            self.recessive_bits = 0;
        }

        if self.stuffing {
            if self.dominant_bits >= 5 {
                if self.frame.fd && self.crcing {
                    self.crc.shift(true);
                }
                self.add_raw_bit(true, true)?;
                self.dominant_bits = 0;
                self.recessive_bits = 1;
            }
            if self.recessive_bits >= 5 {
                if self.frame.fd && self.crcing {
                    self.crc.shift(false);
                }
                self.add_raw_bit(false, true)?;
                self.dominant_bits = 1;
                self.recessive_bits = 0;
            }
        }
        Ok(())
    }

    fn add_bits_msb_first(&mut self, value: u32, width: u32) -> Result<(), FrameTooLong> {
        for i in (0..width).rev() {
            self.add_bit((value >> i) & 1 != 0)?;
        }
        Ok(())
    }
}

impl<'a> FrameBuilder<'a> {
    /// Encodes this frame into a fresh [`Frame`], following `spec.md`
    /// §4.2's field order exactly.
    pub fn build<const N: usize>(self) -> Result<Frame<N>, FrameTooLong> {
        let (id_a, id_b, ide) = match self.id {
            Id::Standard(s) => (s.as_raw() as u32, 0u32, false),
            Id::Extended(e) => {
                let raw = e.as_raw();
                (raw >> 18, raw & 0x3_ffff, true)
            }
        };
        debug_assert!(id_a <= 0x7ff);
        debug_assert!(id_b <= 0x3_ffff);
        debug_assert!(self.dlc <= 15);

        let len = if self.rtr { 0 } else { data_len(self.dlc, self.fd) };
        debug_assert!(self.data.len() >= len);

        let crc_width = CrcWidth::for_frame(self.fd, self.dlc);
        let mut frame = Frame::<N>::empty();
        frame.fd = self.fd;
        frame.brs = self.fd && self.brs;
        frame.dlc = self.dlc;
        frame.rtr = self.rtr;
        frame.id = self.id;

        let mut enc = Encoder {
            frame: &mut frame,
            crc: Crc::new(crc_width),
            crcing: true,
            stuffing: true,
            dominant_bits: 0,
            recessive_bits: 0,
            stuff_count: 0,
        };

        // SOF
        enc.add_bit(false)?;

        // ID A, MSB-first
        enc.add_bits_msb_first(id_a, 11)?;

        // RTR (or SRR=1 if extended)
        enc.add_bit(self.rtr || ide)?;
        frame.last_arbitration_bit = frame.tx_bits - 1;

        // IDE
        enc.add_bit(ide)?;

        if ide {
            enc.add_bits_msb_first(id_b, 18)?;
            enc.add_bit(self.rtr)?;
            frame.last_arbitration_bit = frame.tx_bits - 1;
        }

        // r1 (FDF for FD frames); absent for classic standard frames
        if self.fd {
            enc.add_bit(true)?;
        } else if ide {
            enc.add_bit(false)?;
        }

        // r0 (res for FD frames)
        enc.add_bit(false)?;

        if self.fd {
            if frame.brs {
                enc.add_bit(true)?;
                frame.brs_bit = frame.tx_bits - 1;
            } else {
                enc.add_bit(false)?;
                frame.brs_bit = N;
            }
            // ESI transmitted inverted: dominant (0) means "error active"
            enc.add_bit(!self.esi)?;
        }

        // DLC, MSB-first
        enc.add_bits_msb_first(self.dlc as u32, 4)?;
        frame.last_dlc_bit = frame.tx_bits - 1;

        // Data, MSB-first per byte
        for (i, &byte) in self.data[..len].iter().enumerate() {
            for j in 0..8u32 {
                if self.fd && i == len - 1 && j == 7 {
                    enc.stuffing = false;
                }
                enc.add_bit((byte >> (7 - j)) & 1 != 0)?;
            }
        }
        frame.last_data_bit = frame.tx_bits - 1;

        if !self.fd {
            enc.crcing = false;
            let crc_value = enc.crc.value();
            for i in (0..15).rev() {
                enc.add_bit((crc_value >> i) & 1 != 0)?;
            }
        } else {
            // First fixed stuff bit, opposite polarity to the last data bit.
            let last_data_level = frame.tx_bitstream[frame.last_data_bit];
            if last_data_level.is_recessive() {
                enc.add_raw_bit(false, true)?;
                if enc.recessive_bits == 4 {
                    frame.last_data_bit += 1;
                }
            } else {
                enc.add_raw_bit(true, true)?;
                if enc.dominant_bits == 4 {
                    frame.last_data_bit += 1;
                }
            }
            enc.stuff_count -= 1;

            let stc = enc.stuff_count % 8;
            let gray = stc ^ (stc >> 1);
            let parity = enc.stuff_count & 1;

            enc.add_bits_msb_first(gray, 3)?;
            enc.add_bit(parity != 0)?;

            // Second fixed stuff bit, opposite polarity to parity.
            if parity != 0 {
                enc.add_raw_bit(false, true)?;
            } else {
                enc.add_raw_bit(true, true)?;
            }

            enc.crcing = false;
            let crc_value = enc.crc.value();
            let crc_len = crc_width.bits();
            for i in 0..crc_len {
                let bit = (crc_value >> (crc_len - 1 - i)) & 1 != 0;
                enc.add_bit(bit)?;
                if (i + 1) % 4 == 0 {
                    enc.add_raw_bit(!bit, true)?;
                }
            }
        }
        frame.last_crc_bit = frame.tx_bits - 1;

        enc.stuffing = false;

        // CRC delimiter
        enc.add_bit(true)?;
        // ACK: driven dominant so receivers' state machines lock onto EOF
        enc.add_bit(false)?;
        // ACK delimiter
        enc.add_bit(true)?;
        // EOF: seven recessive bits
        for _ in 0..7 {
            enc.add_bit(true)?;
        }
        frame.last_eof_bit = frame.tx_bits - 1;
        // IFS: three recessive bits
        for _ in 0..3 {
            enc.add_bit(true)?;
        }

        frame.tx_arbitration_bits = frame.last_arbitration_bit + 1;
        frame.frame_set = true;

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{ExtendedId, StandardId};

    fn bit(level: Level) -> u8 {
        level.bit()
    }

    fn starts_with_bits(bits: &[Level], expected: &[u8]) -> bool {
        bits.len() >= expected.len()
            && bits
                .iter()
                .zip(expected.iter())
                .all(|(b, e)| bit(*b) == *e)
    }

    #[test]
    fn classic_data_frame_s1() {
        let data = [0xAAu8];
        let builder = FrameBuilder {
            id: Id::Standard(StandardId::new(0x123).unwrap()),
            rtr: false,
            fd: false,
            brs: false,
            esi: false,
            dlc: 1,
            data: &data,
        };
        let frame: Frame<200> = builder.build().unwrap();
        let bits = frame.tx_bitstream();

        // SOF=0 + 11-bit id (0x123 = 0b00100100011) + RTR=0 + IDE=0 + r0=0
        assert!(starts_with_bits(
            bits,
            &[0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 1, 1, 0, 0, 0, 0]
        ));
        // DLC nibble `0001` follows directly (no stuffing triggered yet)
        assert!(starts_with_bits(&bits[16..], &[0, 0, 0, 1]));
        // data byte 0xAA = 10101010
        assert!(starts_with_bits(&bits[20..], &[1, 0, 1, 0, 1, 0, 1, 0]));

        assert!(frame.last_arbitration_bit() < frame.last_dlc_bit());
        assert!(frame.last_dlc_bit() < frame.last_data_bit());
        assert!(frame.last_data_bit() <= frame.last_crc_bit());
        assert!(frame.last_crc_bit() < frame.last_eof_bit());
        assert!(frame.last_eof_bit() < frame.tx_bits());

        // EOF: seven recessive bits ending the frame, then three IFS bits
        let eof = frame.last_eof_bit();
        for i in (eof - 6)..=eof {
            assert!(frame.tx_bitstream()[i].is_recessive());
        }
        for i in (eof + 1)..(eof + 4) {
            assert!(frame.tx_bitstream()[i].is_recessive());
        }
    }

    #[test]
    fn classic_rtr_all_ones_id_stuffs() {
        let builder = FrameBuilder {
            id: Id::Standard(StandardId::new(0x7ff).unwrap()),
            rtr: true,
            fd: false,
            brs: false,
            esi: false,
            dlc: 0,
            data: &[],
        };
        let frame: Frame<64> = builder.build().unwrap();
        // SOF(0) then 11 recessive id bits -> a dominant stuff bit must
        // appear right after the fifth recessive id bit (positions 1..=5).
        let bits = frame.tx_bitstream();
        assert!(bits[1..6].iter().all(|b| b.is_recessive()));
        assert!(!bits[6].is_recessive(), "expected a dominant stuff bit");
        assert!(frame.stuff_bit()[6]);
    }

    #[test]
    fn fd_frame_with_brs_s3() {
        let mut data = [0u8; 64];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let builder = FrameBuilder {
            id: Id::Extended(ExtendedId::new(1).unwrap()),
            rtr: false,
            fd: true,
            brs: true,
            esi: false,
            dlc: 15,
            data: &data,
        };
        let frame: Frame<700> = builder.build().unwrap();
        assert!(frame.brs_bit().is_some());
        let brs_bit = frame.brs_bit().unwrap();
        assert!(brs_bit > frame.last_arbitration_bit());
        assert!(brs_bit < frame.last_dlc_bit());
        assert!(frame.tx_bits() < 700);
        assert!(frame.tx_bitstream()[brs_bit].is_recessive());
    }

    #[test]
    fn no_illegal_runs_in_stuffed_region() {
        let data = [0xFFu8; 8];
        let builder = FrameBuilder {
            id: Id::Standard(StandardId::new(0).unwrap()),
            rtr: false,
            fd: false,
            brs: false,
            esi: false,
            dlc: 8,
            data: &data,
        };
        let frame: Frame<200> = builder.build().unwrap();
        let bits = frame.tx_bitstream();
        let stuffed_end = frame.last_crc_bit();
        let mut run = 1usize;
        for i in 1..=stuffed_end {
            if bits[i] == bits[i - 1] {
                run += 1;
                assert!(run <= 5, "illegal run of {run} at bit {i}");
            } else {
                run = 1;
            }
        }
    }

    #[test]
    fn too_long_frame_is_rejected() {
        let data = [0u8; 64];
        let builder = FrameBuilder {
            id: Id::Extended(ExtendedId::new(1).unwrap()),
            rtr: false,
            fd: true,
            brs: false,
            esi: false,
            dlc: 15,
            data: &data,
        };
        let result: Result<Frame<10>, FrameTooLong> = builder.build();
        assert!(matches!(result, Err(FrameTooLong)));
    }
}
