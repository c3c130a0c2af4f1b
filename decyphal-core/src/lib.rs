//! Cyphal protocol scalar types
//!
//! This crate provides the basic value type definitions shared by the
//! decyphal crates. Users should normally depend on the `decyphal` crate and
//! use its `core` re-export instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Transfer priority [1; 4.1.1.3]
///
/// The numeric encoding matches the CAN ID priority field [1; 4.2.1.1], so
/// the derived ordering is reversed relative to urgency: `Exceptional` orders
/// before `Optional` while winning bus arbitration over it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Reserved for total-system-failure announcements. Not considered when
    /// budgeting bus load.
    Exceptional = 0,
    /// High priority with hard latency constraints.
    Immediate = 1,
    /// High priority with looser latency constraints than `Immediate`.
    Fast = 2,
    /// More important than `Nominal`; meant to stay deliverable on a
    /// distressed bus.
    High = 3,
    /// The default level. Heartbeats should use this priority.
    Nominal = 4,
    /// Deliverable under all conditions but allowed to be delayed.
    Low = 5,
    /// No time sensitivity at all; only eventual delivery is required.
    Slow = 6,
    /// Delivery is not guaranteed in every possible system state.
    Optional = 7,
}

impl Priority {
    pub const MIN: Priority = Priority::Exceptional;
    pub const MAX: Priority = Priority::Optional;

    pub const fn new(code: u8) -> Option<Priority> {
        if code <= Self::MAX.into_u8() {
            Some(Self::from_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_truncating(code: u8) -> Priority {
        match code & Self::MAX.into_u8() {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            7 => Priority::Optional,
            _ => unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl From<Priority> for usize {
    fn from(value: Priority) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Node address on the bus [1; 4.1.1.1]
///
/// Only regular addresses are representable; an anonymous participant is
/// `Option::<NodeId>::None` throughout the API.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    const MAX_VALUE: u8 = 0x7f;
    pub const MAX: NodeId = NodeId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.into_u8()
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Subject identifier of a message transfer [1; 4.1.1.2]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubjectId(u16);

impl SubjectId {
    const MAX_VALUE: u16 = 0x1fff;
    pub const MAX: SubjectId = SubjectId(Self::MAX_VALUE);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<SubjectId> for u16 {
    fn from(value: SubjectId) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for SubjectId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Service identifier of a request or response transfer [1; 4.1.1.2]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceId(u16);

impl ServiceId {
    const MAX_VALUE: u16 = 0x1ff;
    pub const MAX: ServiceId = ServiceId(Self::MAX_VALUE);

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u16) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<ServiceId> for u16 {
    fn from(value: ServiceId) -> Self {
        value.into_u16()
    }
}

impl TryFrom<u16> for ServiceId {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Cyclic transfer counter [1; 4.1.1.7]
///
/// Five bits wide, maintained independently per (source, port, kind).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferId(u8);

impl TransferId {
    const MAX_VALUE: u8 = 0x1f;
    pub const MAX: TransferId = TransferId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    /// The counter wraps around to zero past `MAX`.
    pub const fn next(self) -> Self {
        Self::from_truncating(self.0.wrapping_add(1))
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self(0)
    }
}

impl From<TransferId> for u8 {
    fn from(value: TransferId) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for TransferId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Transfer routing class
///
/// Each kind forms an independent port namespace and session space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransferKind {
    /// Multicast, from publisher to all subscribers.
    Message = 0,
    /// Point-to-point, from server to client.
    Response = 1,
    /// Point-to-point, from client to server.
    Request = 2,
}

impl TransferKind {
    pub const COUNT: usize = 3;

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl From<TransferKind> for u8 {
    fn from(value: TransferKind) -> Self {
        value as u8
    }
}

impl From<TransferKind> for usize {
    fn from(value: TransferKind) -> Self {
        value.index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_codes() {
        assert_eq!(Priority::new(4), Some(Priority::Nominal));
        assert_eq!(Priority::new(8), None);
        assert_eq!(Priority::from_truncating(0x0f), Priority::Optional);
        assert!(Priority::Exceptional < Priority::Optional);
    }

    #[test]
    fn test_node_id_range() {
        assert_eq!(NodeId::new(127).map(u8::from), Some(127));
        assert_eq!(NodeId::new(128), None);
        assert_eq!(NodeId::from_truncating(0xff), NodeId::MAX);
    }

    #[test]
    fn test_port_id_ranges() {
        assert_eq!(SubjectId::new(8191), Some(SubjectId::MAX));
        assert_eq!(SubjectId::new(8192), None);
        assert_eq!(ServiceId::new(511), Some(ServiceId::MAX));
        assert_eq!(ServiceId::new(512), None);
    }

    #[test]
    fn test_transfer_id_wraps() {
        let id = TransferId::new(31).unwrap();
        assert_eq!(id.next(), TransferId::default());
        assert_eq!(TransferId::default().next(), TransferId::new(1).unwrap());
    }
}
