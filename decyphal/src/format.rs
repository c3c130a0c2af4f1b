//! Cyphal/CAN wire format layout [1; 4.2.1]
//!
//! Single home for the CAN ID bit fields, the tail byte, and the transfer
//! CRC. Everything that must match the wire bit-for-bit lives here.

use decyphal_core::{NodeId, Priority, ServiceId, SubjectId, TransferId};

use crate::frame::{DataSpecifier, Frame, Header};

const CAN_ID_MASK: u32 = lsb_mask(29);

const PRIORITY_OFFSET: u32 = 26;
const SOURCE_OFFSET: u32 = 0;
const MSG_SUBJECT_OFFSET: u32 = 8;
const SRV_DESTINATION_OFFSET: u32 = 7;
const SRV_SERVICE_OFFSET: u32 = 14;

const SERVICE_FLAG: u32 = 1 << 25;
const RES_23_FLAG: u32 = 1 << 23;
const MSG_ANONYMOUS_FLAG: u32 = 1 << 24;
const MSG_RES_7_FLAG: u32 = 1 << 7;
const SRV_REQUEST_FLAG: u32 = 1 << 24;

/// Bits 21..22 of a message ID are transmitted as ones and ignored on
/// reception [1; 4.2.1].
const MSG_FILL_21_22: u32 = 0x3 << 21;

/// Toggle bit value of a start-of-transfer frame [1; table 4.4]
pub const SOT_TOGGLE_BIT: bool = true;

pub const PAD_VALUE: u8 = 0;

/// Non-last frames of a multi-frame transfer must utilize the Classic CAN
/// MTU fully [1; 4.2.4.4].
pub const MFT_NON_LAST_FRAME_PAYLOAD_MIN: usize = 7;

/// 29-bit extended CAN identifier in wire form
///
/// The derived ordering is the bus arbitration order: the numerically
/// smallest identifier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanId(u32);

impl CanId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & CAN_ID_MASK)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }

    pub const fn message(priority: Priority, subject: SubjectId, source: NodeId) -> Self {
        Self(
            (priority.into_u8() as u32) << PRIORITY_OFFSET
                | MSG_FILL_21_22
                | (subject.into_u16() as u32) << MSG_SUBJECT_OFFSET
                | (source.into_u8() as u32) << SOURCE_OFFSET,
        )
    }

    pub const fn anonymous_message(
        priority: Priority,
        subject: SubjectId,
        pseudo_source: NodeId,
    ) -> Self {
        Self(Self::message(priority, subject, pseudo_source).0 | MSG_ANONYMOUS_FLAG)
    }

    pub const fn service(
        priority: Priority,
        service: ServiceId,
        request: bool,
        destination: NodeId,
        source: NodeId,
    ) -> Self {
        let request_flag = if request { SRV_REQUEST_FLAG } else { 0 };
        Self(
            (priority.into_u8() as u32) << PRIORITY_OFFSET
                | SERVICE_FLAG
                | request_flag
                | (service.into_u16() as u32) << SRV_SERVICE_OFFSET
                | (destination.into_u8() as u32) << SRV_DESTINATION_OFFSET
                | (source.into_u8() as u32) << SOURCE_OFFSET,
        )
    }

    /// Decodes the identifier, applying the ID-level validity rules:
    /// reserved bits must read zero and a service frame cannot be sent to
    /// its own source.
    pub fn header(self) -> Option<Header> {
        let priority = Priority::from_truncating((self.0 >> PRIORITY_OFFSET) as u8);
        if self.0 & SERVICE_FLAG == 0 {
            // Reserved bits may be unreserved in the future.
            if self.0 & (RES_23_FLAG | MSG_RES_7_FLAG) != 0 {
                return None;
            }
            let subject =
                SubjectId::from_truncating((self.0 >> MSG_SUBJECT_OFFSET) as u16);
            let source = if self.0 & MSG_ANONYMOUS_FLAG == 0 {
                Some(NodeId::from_truncating((self.0 >> SOURCE_OFFSET) as u8))
            } else {
                None
            };
            Some(Header {
                priority,
                data_spec: DataSpecifier::Message(subject),
                source,
                destination: None,
            })
        } else {
            if self.0 & RES_23_FLAG != 0 {
                return None;
            }
            let source = NodeId::from_truncating((self.0 >> SOURCE_OFFSET) as u8);
            let destination =
                NodeId::from_truncating((self.0 >> SRV_DESTINATION_OFFSET) as u8);
            // A node cannot address a service transfer to itself.
            if source == destination {
                return None;
            }
            let service = ServiceId::from_truncating((self.0 >> SRV_SERVICE_OFFSET) as u16);
            let data_spec = if self.0 & SRV_REQUEST_FLAG != 0 {
                DataSpecifier::Request(service)
            } else {
                DataSpecifier::Response(service)
            };
            Some(Header {
                priority,
                data_spec,
                source: Some(source),
                destination: Some(destination),
            })
        }
    }
}

impl From<CanId> for u32 {
    fn from(value: CanId) -> Self {
        value.into_raw()
    }
}

/// Trailing byte of every transport frame [1; 4.2.3]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TailByte(u8);

impl TailByte {
    const START_OF_TRANSFER: u8 = 7;
    const END_OF_TRANSFER: u8 = 6;
    const TOGGLE_BIT: u8 = 5;
    const TRANSFER_ID: u8 = 0;

    pub fn new(sot: bool, eot: bool, toggle: bool, transfer_id: TransferId) -> Self {
        Self(
            (sot as u8) << Self::START_OF_TRANSFER
                | (eot as u8) << Self::END_OF_TRANSFER
                | (toggle as u8) << Self::TOGGLE_BIT
                | u8::from(transfer_id) << Self::TRANSFER_ID,
        )
    }

    pub fn sot(&self) -> bool {
        (self.0 >> Self::START_OF_TRANSFER) & 0x1 != 0
    }

    pub fn eot(&self) -> bool {
        (self.0 >> Self::END_OF_TRANSFER) & 0x1 != 0
    }

    pub fn toggle(&self) -> bool {
        (self.0 >> Self::TOGGLE_BIT) & 0x1 != 0
    }

    pub fn transfer_id(&self) -> TransferId {
        TransferId::from_truncating(self.0 >> Self::TRANSFER_ID)
    }
}

impl From<TailByte> for u8 {
    fn from(value: TailByte) -> Self {
        value.0
    }
}

impl From<u8> for TailByte {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// CRC-16/CCITT-FALSE accumulator for multi-frame transfers [1; 4.2.3.3]
///
/// Absorbing a correct transmission together with its trailing big-endian
/// CRC leaves a zero residue.
#[derive(Debug, Clone, Copy)]
pub struct TransferCrc(u16);

impl Default for TransferCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl TransferCrc {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0xffff;
    const POLYNOMIAL: u16 = 0x1021;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for TransferCrc {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Reads the tail byte of a frame, if it carries one.
pub fn tail_byte(frame: &Frame) -> Option<TailByte> {
    let byte = *frame.data.last()?;
    Some(TailByte::from(byte))
}

const fn lsb_mask(n: u32) -> u32 {
    if n > 0 {
        u32::MAX >> (u32::BITS - n)
    } else {
        0
    }
}
