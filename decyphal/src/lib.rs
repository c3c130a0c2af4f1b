//! # Decyphal
//!
//! A deterministic transport core for the Cyphal/CAN protocol \[1\]. It
//! reassembles inbound multi-frame transfers from a stream of CAN frames into
//! application payloads, and segments outbound transfers into a
//! priority-ordered queue of frames for a link driver to transmit. The crate
//! targets embedded and real-time control systems where microcontrollers
//! share a CAN bus with publish/subscribe and request/response semantics.
//!
//! ## Architecture
//!
//! ```text
//!              RX                                TX
//!  link driver ──► FrameModel::parse    application ──► TxQueue::push
//!                     │                                   │
//!                     ▼                                   ▼
//!              Instance (port tree)              Segmenter + CanId
//!                     │                                   │
//!                     ▼                                   ▼
//!              Session::update                tree keyed by CAN ID
//!                     │                                   │
//!                     ▼                                   ▼
//!              Transfer ──► application       link driver ◄── peek/pop
//! ```
//!
//! Components:
//! * [`rx::Instance`] holds one balanced port index per transfer kind and the
//!   per-source reassembly sessions of every subscription.
//! * [`tx::TxQueue`] segments outgoing payloads and keeps the resulting
//!   frames ordered by CAN ID, so the most urgent frame is always at the
//!   front, matching bus arbitration order.
//! * [`format`] is the single home of the wire layout: CAN ID bit fields,
//!   the tail byte, and the transfer CRC.
//!
//! ## Concurrency model
//!
//! The core is single-threaded, cooperative, and non-suspending. Every public
//! operation runs to completion without yielding; there is no internal
//! locking, timer, or task. The caller serializes access to an `Instance` or
//! `TxQueue`, supplies a monotonic timestamp with each received frame, and
//! owns all I/O. Memory is allocated only for subscription state, lazily for
//! reassembly buffers (bounded by the subscription extent), and per enqueued
//! outgoing frame.
//!
//! ## Limitations
//!
//! * The CAN link driver is external; this crate never touches hardware.
//! * There is no retransmission; the CAN link layer provides it.
//! * Redundant transports are distinguished only by the caller-supplied
//!   transport index.
//!
//! # References:
//!
//! * \[1\] Cyphal Specification v1.0
//!   <https://opencyphal.org/specification/Cyphal_Specification.pdf>
#![no_std]

extern crate alloc;

pub use decyphal_core as core;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod format;
pub mod frame;
pub mod rx;
pub mod transfer;
mod tree;
pub mod tx;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
