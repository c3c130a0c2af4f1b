//! Transport frame objects

use decyphal_core::{NodeId, Priority, ServiceId, SubjectId, TransferKind};

use crate::format::CanId;

/// Encodes the semantic properties of the data carried by a transfer and its
/// kind
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSpecifier {
    Message(SubjectId),
    Request(ServiceId),
    Response(ServiceId),
}

impl DataSpecifier {
    pub const fn kind(&self) -> TransferKind {
        match self {
            DataSpecifier::Message(_) => TransferKind::Message,
            DataSpecifier::Request(_) => TransferKind::Request,
            DataSpecifier::Response(_) => TransferKind::Response,
        }
    }

    /// The port value within the kind's namespace.
    pub const fn port(&self) -> u16 {
        match self {
            DataSpecifier::Message(subject) => subject.into_u16(),
            DataSpecifier::Request(service) | DataSpecifier::Response(service) => {
                service.into_u16()
            }
        }
    }
}

/// Transport frame data encoded in the CAN frame ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub priority: Priority,
    pub data_spec: DataSpecifier,
    /// `None` for anonymous message frames.
    pub source: Option<NodeId>,
    /// `Some` for service frames, `None` for messages.
    pub destination: Option<NodeId>,
}

/// Transport frame for both Classic and FD links
///
/// The identifier is kept in wire form; [`CanId::header`] decodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: CanId,
    pub data: Data,
}

/// CAN frame data length restricted to the DLC-encodable set
///
/// The wire encodes frame lengths as a 4-bit data length code, so only
/// {0..8, 12, 16, 20, 24, 32, 48, 64} bytes exist on the bus; anything else
/// must be padded up or is rejected. Classic CAN uses the contiguous subset
/// up to 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataLength(u8);

impl DataLength {
    /// Valid byte counts indexed by their DLC code.
    const BY_DLC: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

    pub const MAX: usize = 64;

    /// Accepts only exact members of the DLC set.
    pub const fn new(value: usize) -> Option<Self> {
        match Self::new_ceil(value) {
            Some(ceil) => {
                if ceil.as_usize() == value {
                    Some(ceil)
                } else {
                    None
                }
            }
            None => None,
        }
    }

    /// The largest encodable length not exceeding `value`.
    pub const fn new_floor(value: usize) -> Self {
        let mut dlc = Self::BY_DLC.len() - 1;
        // DLC 0 encodes zero bytes, so the scan always terminates.
        while Self::BY_DLC[dlc] as usize > value {
            dlc -= 1;
        }
        Self(Self::BY_DLC[dlc])
    }

    /// The smallest encodable length covering `value`, unless none does.
    pub const fn new_ceil(value: usize) -> Option<Self> {
        if value > Self::MAX {
            return None;
        }
        let mut dlc = 0;
        while (Self::BY_DLC[dlc] as usize) < value {
            dlc += 1;
        }
        Some(Self(Self::BY_DLC[dlc]))
    }

    /// Reconstructs a length from the low nibble of a wire DLC.
    pub const fn from_dlc(code: u8) -> Self {
        Self(Self::BY_DLC[(code & 0xf) as usize])
    }

    /// The 4-bit data length code that encodes this length on the wire.
    pub const fn dlc(&self) -> u8 {
        let mut code = 0;
        while Self::BY_DLC[code] != self.0 {
            code += 1;
        }
        code as u8
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<DataLength> for usize {
    fn from(value: DataLength) -> Self {
        value.as_usize()
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Frame data vector of an encodable length
///
/// Equality considers the live bytes only, not the spare capacity behind
/// them.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: DataLength,
    bytes: [u8; DataLength::MAX],
}

impl Data {
    /// Fails unless the slice length is a member of the DLC set.
    pub fn new(bytes: &[u8]) -> Result<Self, InvalidLength> {
        let length = DataLength::new(bytes.len()).ok_or(InvalidLength)?;
        let mut data = Self::new_zeros(length);
        data.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(data)
    }

    pub fn new_zeros(length: DataLength) -> Self {
        Self {
            length,
            bytes: [0; DataLength::MAX],
        }
    }

    pub fn length(&self) -> DataLength {
        self.length
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..self.length.as_usize()]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes[..self.length.as_usize()]
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        let this: &[u8] = self;
        let that: &[u8] = other;
        this == that
    }
}

impl Eq for Data {}

impl core::fmt::Debug for Data {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Link-layer maximum transmission unit
///
/// A requested size is clamped to the [8, 64] range and rounded up to the
/// next valid DLC length. One byte of every frame is reserved for the tail,
/// which [`Mtu::presentation`] accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mtu(DataLength);

impl Mtu {
    pub const CLASSIC: Mtu = Mtu::new(8);
    pub const FD: Mtu = Mtu::new(64);

    pub const fn new(bytes: usize) -> Mtu {
        let clamped = if bytes < 8 {
            8
        } else if bytes > DataLength::MAX {
            DataLength::MAX
        } else {
            bytes
        };
        match DataLength::new_ceil(clamped) {
            Some(length) => Mtu(length),
            // Unreachable: the value is clamped to the valid range above.
            None => Mtu(DataLength::new_floor(DataLength::MAX)),
        }
    }

    /// Frame capacity on the wire, tail byte included.
    pub const fn link_layer(&self) -> usize {
        self.0.as_usize()
    }

    /// Per-frame transfer payload capacity, tail byte excluded.
    pub const fn presentation(&self) -> usize {
        self.0.as_usize() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_accepts_dlc_members_only() {
        for len in [0usize, 5, 8, 12, 20, 48, 64] {
            assert_eq!(DataLength::new(len).map(|l| l.as_usize()), Some(len));
        }
        for len in [9usize, 11, 15, 25, 47, 63, 65, 1000] {
            assert!(DataLength::new(len).is_none());
        }
    }

    #[test]
    fn test_length_rounding_brackets_every_size() {
        // Floor never overshoots, ceil never undershoots, and a size rounds
        // to itself exactly when it is encodable.
        for len in 0..=DataLength::MAX {
            let floor = DataLength::new_floor(len).as_usize();
            let ceil = DataLength::new_ceil(len).unwrap().as_usize();
            assert!(floor <= len && len <= ceil);
            let exact = DataLength::new(len).is_some();
            assert_eq!(exact, floor == len);
            assert_eq!(exact, ceil == len);
        }
        // Beyond the FD maximum there is nothing to round up to.
        assert_eq!(DataLength::new_ceil(DataLength::MAX + 1), None);
        assert_eq!(DataLength::new_floor(1000).as_usize(), DataLength::MAX);
    }

    #[test]
    fn test_length_rounding_at_dlc_gaps() {
        // Pin the first size inside each gap of the sparse FD region.
        for (inside_gap, below, above) in
            [(9, 8, 12), (13, 12, 16), (21, 20, 24), (27, 24, 32), (33, 32, 48), (49, 48, 64)]
        {
            assert_eq!(DataLength::new_floor(inside_gap).as_usize(), below);
            assert_eq!(DataLength::new_ceil(inside_gap).unwrap().as_usize(), above);
        }
    }

    #[test]
    fn test_dlc_code_round_trip() {
        for code in 0..16u8 {
            let length = DataLength::from_dlc(code);
            assert_eq!(length.dlc(), code);
            assert_eq!(DataLength::new(length.as_usize()), Some(length));
        }
        assert_eq!(DataLength::from_dlc(9).as_usize(), 12);
        assert_eq!(DataLength::from_dlc(15).as_usize(), 64);
    }

    #[test]
    fn test_data_compares_live_bytes_only() {
        let short = Data::new(&[0xaa, 0xbb, 0xcc]).unwrap();
        let mut padded = Data::new_zeros(DataLength::new(4).unwrap());
        padded[..3].copy_from_slice(&[0xaa, 0xbb, 0xcc]);

        // Same prefix, different live length.
        assert_ne!(short, padded);
        assert_eq!(padded[..], [0xaa, 0xbb, 0xcc, 0x00]);

        // Spare capacity does not participate in equality.
        let mut scribbled = short;
        scribbled.bytes[10] = 0xff;
        assert_eq!(short, scribbled);
    }

    #[test]
    fn test_data_rejects_unencodable_slices() {
        assert!(Data::new(&[0; 9]).is_err());
        assert!(Data::new(&[0; 65]).is_err());
        assert_eq!(Data::new(&[0; 12]).unwrap().length(), DataLength::from_dlc(9));
    }

    #[test]
    fn test_mtu_rounding() {
        assert_eq!(Mtu::new(0).link_layer(), 8);
        assert_eq!(Mtu::new(8).link_layer(), 8);
        assert_eq!(Mtu::new(9).link_layer(), 12);
        assert_eq!(Mtu::new(33).link_layer(), 48);
        assert_eq!(Mtu::new(200).link_layer(), 64);
        assert_eq!(Mtu::CLASSIC.presentation(), 7);
        assert_eq!(Mtu::FD.presentation(), 63);
    }

    #[test]
    fn test_data_specifier_ports() {
        let spec = DataSpecifier::Message(SubjectId::new(0xccc).unwrap());
        assert_eq!(spec.kind(), TransferKind::Message);
        assert_eq!(spec.port(), 0xccc);

        let spec = DataSpecifier::Request(ServiceId::new(511).unwrap());
        assert_eq!(spec.kind(), TransferKind::Request);
        assert_eq!(spec.port(), 511);
    }
}
