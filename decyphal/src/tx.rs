//! Transmit pipeline: CAN ID construction, segmentation, priority queue
//!
//! [`TxQueue::push`] segments one application transfer into tail-terminated
//! frames and files them into a balanced index keyed by CAN ID. Since the
//! identifier embeds the priority in its top bits, ascending CAN ID order is
//! descending bus priority order, and [`TxQueue::peek`] always returns the
//! frame the bus would arbitrate first. The link driver peeks, transmits,
//! and pops; frames whose deadline has passed should be popped and dropped.

use core::cmp::Ordering;

use decyphal_core::{NodeId, TransferId};

use crate::format::{CanId, PAD_VALUE, SOT_TOGGLE_BIT, TailByte, TransferCrc};
use crate::frame::{Data, DataLength, DataSpecifier, Frame, Mtu};
use crate::time::Instant;
use crate::transfer::TransferMeta;
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// The metadata is inconsistent with the source address or the payload
    /// size, e.g. an anonymous multi-frame transfer or a service transfer
    /// without both addresses.
    InvalidArgument,
    /// Enqueuing every frame of the transfer would exceed the queue
    /// capacity. Nothing was enqueued.
    QueueFull,
}

/// One enqueued transport frame
#[derive(Debug)]
pub struct TxItem {
    deadline: Instant,
    frame: Frame,
}

impl TxItem {
    /// Past this instant the frame is stale and should be dropped by the
    /// link driver instead of transmitted.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

/// Priority-ordered queue of outgoing frames
///
/// The queue owns its items; a multi-frame transfer is admitted atomically
/// or not at all. Frames with equal CAN IDs keep their insertion order, so
/// the frames of one transfer drain in chain order.
pub struct TxQueue {
    capacity: usize,
    mtu: Mtu,
    items: Tree<TxItem>,
}

impl TxQueue {
    /// `capacity` bounds the number of enqueued frames, not transfers.
    pub fn new(capacity: usize, mtu: Mtu) -> Self {
        Self {
            capacity,
            mtu,
            items: Tree::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mtu(&self) -> Mtu {
        self.mtu
    }

    /// Takes effect for subsequently pushed transfers; frames already
    /// enqueued are unaffected.
    pub fn set_mtu(&mut self, mtu: Mtu) {
        self.mtu = mtu;
    }

    /// Segments one transfer and enqueues all of its frames, returning the
    /// frame count. The capacity check runs before any mutation, so a
    /// rejected transfer leaves the queue untouched.
    pub fn push(
        &mut self,
        source: Option<NodeId>,
        deadline: Instant,
        meta: &TransferMeta,
        payload: &[u8],
    ) -> Result<usize, TxError> {
        let max_payload = self.mtu.presentation();
        let id = make_can_id(meta, source, payload, max_payload)?;

        let frame_count = if payload.len() <= max_payload {
            1
        } else {
            (payload.len() + TransferCrc::LENGTH).div_ceil(max_payload)
        };
        if self.items.len() + frame_count > self.capacity {
            return Err(TxError::QueueFull);
        }

        let mut segmenter = Segmenter::new(meta.transfer_id, payload, max_payload);
        let mut enqueued = 0;
        while let Some(data) = segmenter.next_frame() {
            self.insert(TxItem {
                deadline,
                frame: Frame { id, data },
            });
            enqueued += 1;
        }
        debug_assert_eq!(enqueued, frame_count);
        Ok(frame_count)
    }

    /// The most urgent frame: the one with the numerically lowest CAN ID.
    pub fn peek(&self) -> Option<&TxItem> {
        self.items.extremum(false).map(|handle| self.items.get(handle))
    }

    /// Removes and returns the most urgent frame.
    pub fn pop(&mut self) -> Option<TxItem> {
        let handle = self.items.extremum(false)?;
        Some(self.items.remove(handle))
    }

    fn insert(&mut self, item: TxItem) {
        let id = item.frame.id;
        // Equal identifiers descend right, preserving insertion order within
        // one priority class.
        self.items
            .search_or_insert(|other| id.cmp(&other.frame.id).then(Ordering::Greater), || item);
    }
}

/// Builds the frame identifier from the transfer metadata [1; 4.2.1]
fn make_can_id(
    meta: &TransferMeta,
    source: Option<NodeId>,
    payload: &[u8],
    max_payload: usize,
) -> Result<CanId, TxError> {
    match meta.data_spec {
        DataSpecifier::Message(subject) => {
            if meta.remote.is_some() {
                return Err(TxError::InvalidArgument);
            }
            match source {
                Some(source) => Ok(CanId::message(meta.priority, subject, source)),
                None => {
                    // Anonymous transfers must fit one frame. The pseudo
                    // source ID is derived from the payload so that
                    // concurrent anonymous publishers rarely collide.
                    if payload.len() > max_payload {
                        return Err(TxError::InvalidArgument);
                    }
                    let mut crc = TransferCrc::default();
                    crc.add_bytes(payload);
                    let pseudo = NodeId::from_truncating(crc.get() as u8);
                    Ok(CanId::anonymous_message(meta.priority, subject, pseudo))
                }
            }
        }
        DataSpecifier::Request(service) | DataSpecifier::Response(service) => {
            let source = source.ok_or(TxError::InvalidArgument)?;
            let destination = meta.remote.ok_or(TxError::InvalidArgument)?;
            let request = matches!(meta.data_spec, DataSpecifier::Request(_));
            Ok(CanId::service(
                meta.priority,
                service,
                request,
                destination,
                source,
            ))
        }
    }
}

/// Splits one transfer payload into tail-terminated frame data
///
/// A payload fitting a single frame is emitted without a CRC, padded up to
/// the next valid DLC length. Multi-frame transfers emit full frames of
/// `max_payload + 1` bytes until the remainder, padding and the transfer CRC
/// fit a last frame rounded to the smallest covering DLC length; padding is
/// inserted before the CRC and participates in it.
struct Segmenter<'a> {
    payload: &'a [u8],
    transfer_id: TransferId,
    toggle: bool,
    offset: usize,
    crc: TransferCrc,
    max_payload: usize,
}

impl<'a> Segmenter<'a> {
    const CRC_LENGTH: usize = TransferCrc::LENGTH;
    const TAIL_LENGTH: usize = 1;

    fn new(transfer_id: TransferId, payload: &'a [u8], max_payload: usize) -> Self {
        let mut crc = TransferCrc::default();
        crc.add_bytes(payload);
        Self {
            payload,
            transfer_id,
            toggle: SOT_TOGGLE_BIT,
            offset: 0,
            crc,
            max_payload,
        }
    }

    fn next_frame(&mut self) -> Option<Data> {
        // Single-frame transfer: no CRC on the wire.
        if self.offset == 0 && self.payload.len() <= self.max_payload {
            let frame_length =
                unwrap!(DataLength::new_ceil(self.payload.len() + Self::TAIL_LENGTH));
            let mut frame_data = Data::new_zeros(frame_length);
            let (tail, body) = unwrap!(frame_data.split_last_mut());
            body[..self.payload.len()].copy_from_slice(self.payload);
            *tail = TailByte::new(true, true, SOT_TOGGLE_BIT, self.transfer_id).into();
            self.offset = self.payload.len() + Self::CRC_LENGTH;
            return Some(frame_data);
        }

        let total = self.payload.len() + Self::CRC_LENGTH;
        if self.offset >= total {
            return None;
        }
        let residual = total - self.offset;

        let frame_length = unwrap!(DataLength::new_ceil(
            residual.min(self.max_payload) + Self::TAIL_LENGTH
        ));
        let mut frame_data = Data::new_zeros(frame_length);
        let (tail, body) = unwrap!(frame_data.split_last_mut());

        let sot = self.offset == 0;
        if residual >= body.len() {
            self.fill_segment(body);
        } else {
            self.fill_padded_segment(body);
        }
        *tail = TailByte::new(sot, self.offset >= total, self.toggle, self.transfer_id).into();
        self.toggle = !self.toggle;
        Some(frame_data)
    }

    // Fills the body entirely from residual payload and CRC bytes; the CRC
    // may straddle a frame boundary.
    fn fill_segment(&mut self, body: &mut [u8]) {
        let data = &self.payload[self.offset.min(self.payload.len())..];
        let data_take = data.len().min(body.len());
        let (body_data, body_crc) = body.split_at_mut(data_take);
        body_data.copy_from_slice(&data[..data_take]);

        let crc_offset = self.offset.max(self.payload.len()) - self.payload.len();
        let crc_bytes = self.crc.get().to_be_bytes();
        body_crc.copy_from_slice(&crc_bytes[crc_offset..crc_offset + body_crc.len()]);

        self.offset += body.len();
    }

    // Fills the last frame when it is not full: payload remainder, zero
    // padding, then the CRC updated over the padding.
    fn fill_padded_segment(&mut self, body: &mut [u8]) {
        debug_assert!(self.offset <= self.payload.len());
        let data = &self.payload[self.offset..];
        let (body_head, body_crc) =
            unwrap!(body.split_last_chunk_mut::<{ TransferCrc::LENGTH }>());
        let (body_data, body_pad) = body_head.split_at_mut(data.len());
        body_data.copy_from_slice(data);
        body_pad.fill(PAD_VALUE);

        let mut crc = self.crc;
        crc.add_bytes(body_pad);
        *body_crc = crc.get().to_be_bytes();

        self.offset += data.len() + body_crc.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tail_byte;
    use crate::time::Duration;
    use decyphal_core::{Priority, ServiceId, SubjectId};

    const CLASSIC_PAYLOAD: usize = 7;
    const FD_PAYLOAD: usize = 63;

    fn ts(us: u64) -> Instant {
        Instant::MIN
            .checked_add(Duration::from_micros(us))
            .unwrap_or(Instant::MAX)
    }

    fn tid(value: u8) -> TransferId {
        TransferId::new(value).unwrap()
    }

    fn message_meta(priority: Priority, subject: u16, transfer_id: u8) -> TransferMeta {
        TransferMeta {
            priority,
            data_spec: DataSpecifier::Message(SubjectId::new(subject).unwrap()),
            remote: None,
            transfer_id: tid(transfer_id),
        }
    }

    #[test]
    fn test_segment_zero_length() {
        let buffer: [u8; 0] = [];
        let mut segmenter = Segmenter::new(tid(27), &buffer, CLASSIC_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0b1110_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_segment_single_frame() {
        let buffer: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];
        let mut segmenter = Segmenter::new(tid(27), &buffer, CLASSIC_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0, 1, 2, 3, 4, 5, 6, 0b1110_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_segment_minimum_double_frame() {
        let buffer: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
        let mut segmenter = Segmenter::new(tid(27), &buffer, CLASSIC_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0, 1, 2, 3, 4, 5, 6, 0b1010_0000 + 27]).unwrap())
        );
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[7, 0x17, 0x8d, 0b0100_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_segment_full_double_frame() {
        let buffer: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        let mut segmenter = Segmenter::new(tid(27), &buffer, CLASSIC_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0, 1, 2, 3, 4, 5, 6, 0b1010_0000 + 27]).unwrap())
        );
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[7, 8, 9, 10, 11, 0x76, 0x73, 0b0100_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_segment_crc_straddles_frames() {
        let buffer: [u8; 13] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut segmenter = Segmenter::new(tid(27), &buffer, CLASSIC_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0, 1, 2, 3, 4, 5, 6, 0b1010_0000 + 27]).unwrap())
        );
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[7, 8, 9, 10, 11, 12, 0xac, 0b0000_0000 + 27]).unwrap())
        );
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0xdd, 0b0110_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_segment_padding_in_single_frame() {
        let buffer: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
        let mut segmenter = Segmenter::new(tid(27), &buffer, FD_PAYLOAD);
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[0, 1, 2, 3, 4, 5, 6, 7, 0, 0, 0, 0b1110_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[rustfmt::skip]
    #[test]
    fn test_segment_padding_in_last_frame() {
        let buffer: [u8; 69] = core::array::from_fn(|i| i.try_into().unwrap());
        let mut segmenter = Segmenter::new(tid(27), &buffer, FD_PAYLOAD);

        let first: heapless::Vec<u8, 64> =
            (0u8..63).chain([0b1010_0000u8 + 27].iter().copied()).collect();
        assert_eq!(segmenter.next_frame(), Some(Data::new(&first).unwrap()));
        // Padding precedes the CRC and is covered by it.
        assert_eq!(
            segmenter.next_frame(),
            Some(Data::new(&[63, 64, 65, 66, 67, 68, 0, 0, 0, 0xd6, 0x2c, 0b0100_0000 + 27]).unwrap())
        );
        assert_eq!(segmenter.next_frame(), None);
    }

    #[test]
    fn test_push_single_frame_with_padding() {
        let mut queue = TxQueue::new(200, Mtu::FD);
        let payload: [u8; 8] = core::array::from_fn(|i| i as u8);

        let meta = message_meta(Priority::Nominal, 321, 21);
        assert_eq!(queue.push(None, ts(100_000_000), &meta, &payload), Ok(1));
        assert_eq!(queue.len(), 1);

        let item = queue.peek().unwrap();
        assert_eq!(item.deadline(), ts(100_000_000));
        let data = &item.frame().data;
        assert_eq!(data.len(), 12);
        assert_eq!(data[..8], payload);
        assert_eq!(data[8..11], [0, 0, 0]);
        assert_eq!(data[11], u8::from(TailByte::new(true, true, true, tid(21))));

        // The anonymous pseudo source comes from the payload CRC.
        let raw = item.frame().id.into_raw();
        assert_eq!(raw & 0x7f, 0x178d & 0x7f);
        assert_eq!(raw & (1 << 24), 1 << 24);
    }

    #[test]
    fn test_push_multi_frame_drains_in_order() {
        let mut queue = TxQueue::new(200, Mtu::FD);
        let payload: [u8; 8] = core::array::from_fn(|i| i as u8);

        let single_meta = message_meta(Priority::Nominal, 321, 21);
        assert_eq!(queue.push(None, ts(100_000_000), &single_meta, &payload), Ok(1));
        let single_id = queue.peek().unwrap().frame().id;

        queue.set_mtu(Mtu::CLASSIC);
        let multi_meta = message_meta(Priority::Low, 321, 22);
        let source = NodeId::new(42);
        assert_eq!(queue.push(source, ts(100_000_001), &multi_meta, &payload), Ok(2));
        assert_eq!(queue.len(), 3);

        // The Nominal single frame outranks the Low multi-frame pair.
        let first = queue.pop().unwrap();
        assert_eq!(first.frame().id, single_id);

        let multi1 = queue.pop().unwrap();
        let multi2 = queue.pop().unwrap();
        assert!(queue.is_empty());
        assert_eq!(multi1.deadline(), ts(100_000_001));
        assert_eq!(multi2.deadline(), ts(100_000_001));
        assert_eq!(multi1.frame().data.len(), 8);
        assert_eq!(multi2.frame().data.len(), 4);

        let tail1 = tail_byte(multi1.frame()).unwrap();
        assert!(tail1.sot() && !tail1.eot() && tail1.toggle());
        let tail2 = tail_byte(multi2.frame()).unwrap();
        assert!(!tail2.sot() && tail2.eot() && !tail2.toggle());
        assert_eq!(multi2.frame().data[..3], [7, 0x17, 0x8d]);
    }

    #[test]
    fn test_push_capacity_is_atomic() {
        let mut queue = TxQueue::new(2, Mtu::CLASSIC);
        let payload: [u8; 8] = core::array::from_fn(|i| i as u8);
        let source = NodeId::new(42);

        let meta = message_meta(Priority::Nominal, 100, 0);
        assert_eq!(queue.push(source, ts(0), &meta, &payload), Ok(2));

        // Neither a multi-frame chain nor a single frame fits any more;
        // the queue stays untouched.
        let meta = message_meta(Priority::Nominal, 100, 1);
        assert_eq!(queue.push(source, ts(0), &meta, &payload), Err(TxError::QueueFull));
        assert_eq!(queue.push(source, ts(0), &meta, &[]), Err(TxError::QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_rejects_inconsistent_metadata() {
        let mut queue = TxQueue::new(8, Mtu::CLASSIC);
        let payload: [u8; 16] = core::array::from_fn(|i| i as u8);

        // Anonymous transfers cannot be multi-frame.
        let meta = message_meta(Priority::Nominal, 321, 0);
        assert_eq!(queue.push(None, ts(0), &meta, &payload), Err(TxError::InvalidArgument));

        // Service transfers need both source and destination.
        let mut meta = TransferMeta {
            priority: Priority::Nominal,
            data_spec: DataSpecifier::Request(ServiceId::new(7).unwrap()),
            remote: None,
            transfer_id: tid(0),
        };
        assert_eq!(
            queue.push(NodeId::new(1), ts(0), &meta, &payload[..4]),
            Err(TxError::InvalidArgument)
        );
        meta.remote = NodeId::new(2);
        assert_eq!(queue.push(None, ts(0), &meta, &payload[..4]), Err(TxError::InvalidArgument));
        assert_eq!(queue.push(NodeId::new(1), ts(0), &meta, &payload[..4]), Ok(1));

        // Messages cannot name a destination.
        let mut meta = message_meta(Priority::Nominal, 321, 0);
        meta.remote = NodeId::new(2);
        assert_eq!(
            queue.push(NodeId::new(1), ts(0), &meta, &payload[..4]),
            Err(TxError::InvalidArgument)
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = TxQueue::new(8, Mtu::CLASSIC);
        let meta = message_meta(Priority::Nominal, 321, 3);
        let source = NodeId::new(42);

        // Identical CAN IDs drain in push order.
        for marker in [0xa0u8, 0xa1, 0xa2] {
            assert_eq!(queue.push(source, ts(0), &meta, &[marker]), Ok(1));
        }
        for marker in [0xa0u8, 0xa1, 0xa2] {
            assert_eq!(queue.pop().unwrap().frame().data[0], marker);
        }
    }
}
