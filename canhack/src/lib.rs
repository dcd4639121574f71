#![no_std]
#![warn(missing_docs)]
//! # canhack
//!
//! ## Overview
//! This crate provides a platform-agnostic bit-banged CAN/CAN FD transceiver
//! for security research: encoding frames by hand, driving and sampling them
//! at the bit level against a cycle-accurate timing model, and a set of
//! classic bus-level attacks (spoofing, Janus dual-bitstream transmission,
//! and error-frame injection) built on top of that engine.
//!
//! It provides the following features:
//!
//! - a standalone CAN/CAN FD frame encoder ([`frame`]) with CRC15/CRC17/
//!   CRC21, dynamic and fixed bit stuffing, and bit-rate switching
//! - a cycle-accurate transmit engine ([`CanHack::send_frame`]) with
//!   arbitration-loss detection and automatic retry from bus idle
//! - Janus attacks ([`CanHack::send_janus_frame`],
//!   [`CanHack::spoof_frame`]): two frames transmitted simultaneously on one
//!   wire, so that receivers sampling at different points within the bit see
//!   different frame content
//! - prefix-matched frame spoofing, including against an error-passive
//!   target that can no longer contest arbitration
//!   ([`CanHack::spoof_frame_error_passive`])
//! - error/overload frame injection at a configurable offset past a matched
//!   frame ([`CanHack::error_attack`])
//!
//! `canhack` is embedded in an application like any other bit-banging
//! driver: it owns no GPIO or timer state of its own, but drives one through
//! a target HAL implementing [`canhack_core::Hal`] (and, through its
//! supertrait, [`canhack_core::Timing`]). The HAL is expected to be a thin,
//! direct mapping onto a free-running timer and two GPIO pins; all
//! higher-level behavior — arbitration, bit stuffing, CRCs, and the attack
//! state machines — lives in this crate and is platform independent.
//!
//! For `canhack` to run, an application instantiates a target HAL
//! implementing [`canhack_core::Hal`], wraps it in a [`CanHack`], encodes a
//! [`frame::Frame`] with [`frame::FrameBuilder`], and drives one of
//! `CanHack`'s operations from its main loop or an interrupt handler.
//!
//! ## General usage example
//!
//! ```no_run
//! use canhack::{CanHack, Slot};
//! use canhack::frame::FrameBuilder;
//! use embedded_can::{Id, StandardId};
//!
//! # struct MyHal;
//! # impl canhack_core::Timing for MyHal {
//! #     const BIT_TIME: u32 = 1000;
//! #     const BIT_TIME_FD: u32 = 250;
//! #     const SAMPLE_POINT_OFFSET: u32 = 700;
//! #     const SAMPLE_POINT_OFFSET_FD: u32 = 180;
//! #     const SAMPLE_TO_BIT_END: u32 = 300;
//! #     const SAMPLE_TO_BIT_END_FD: u32 = 70;
//! #     const FALLING_EDGE_RECALIBRATE: u32 = 50;
//! #     const MAX_BITS: usize = 800;
//! # }
//! # impl canhack_core::Hal for MyHal {
//! #     fn now(&mut self) -> canhack_core::Instant { 0 }
//! #     fn reset_clock(&mut self, _offset: canhack_core::Instant) {}
//! #     fn set_can_tx(&mut self, _level: canhack_core::Level) {}
//! #     fn get_can_rx(&mut self) -> canhack_core::Level { canhack_core::Level::Recessive }
//! # }
//! let hal = MyHal;
//! let mut hack: CanHack<MyHal, 800> = CanHack::new(hal);
//!
//! hack.set_frame(
//!     Slot::First,
//!     FrameBuilder {
//!         id: Id::Standard(StandardId::new(0x123).unwrap()),
//!         rtr: false,
//!         fd: false,
//!         brs: false,
//!         esi: false,
//!         dlc: 8,
//!         data: &[0u8; 8],
//!     },
//! ).unwrap();
//!
//! hack.set_timeout(1_000_000);
//! hack.send_frame(Slot::First, 3);
//! ```
//!
//! [`canhack_core::Hal`]: <https://docs.rs/canhack-core/latest/canhack_core/trait.Hal.html>

pub mod frame;

mod attack;
mod engine;
mod hack;
mod timeout;

#[cfg(test)]
mod test_support;

pub use hack::{CanHack, Slot};

pub use embedded_can;
pub use canhack_core;
