//! Receive pipeline: frame parsing, subscriptions, transfer reassembly
//!
//! A received [`Frame`] is decoded into a [`FrameModel`], dispatched through
//! the per-kind subscription tree, and fed to the per-source [`Session`]
//! state machine, which hands a completed [`Transfer`] to the caller. The
//! pipeline performs no I/O and keeps no clock; the caller supplies a
//! monotonic timestamp with every frame.

use alloc::boxed::Box;
use alloc::vec::Vec;

use decyphal_core::{NodeId, TransferId, TransferKind};

use crate::format::{
    MFT_NON_LAST_FRAME_PAYLOAD_MIN, SOT_TOGGLE_BIT, TailByte, TransferCrc,
};
use crate::frame::{DataSpecifier, Frame, Header};
use crate::time::{Duration, Instant};
use crate::transfer::{Transfer, TransferMeta};
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// The frame carries no bytes, not even a tail byte.
    EmptyPayload,
    /// The frame violates the transport format rules and was dropped without
    /// touching any session state.
    InvalidFrame,
    /// A service frame addressed to some other node.
    BadDestination,
    /// No subscription covers this kind and port.
    NoMatchingSubscription,
}

/// Parsed view of one received transport frame
#[derive(Debug, Clone, Copy)]
struct FrameModel<'a> {
    timestamp: Instant,
    header: Header,
    transfer_id: TransferId,
    start: bool,
    end: bool,
    toggle: bool,
    /// Frame payload with the tail byte cut off.
    payload: &'a [u8],
}

impl<'a> FrameModel<'a> {
    fn parse(timestamp: Instant, frame: &'a Frame) -> Result<Self, RxError> {
        let (tail, payload) = frame.data.split_last().ok_or(RxError::EmptyPayload)?;
        let header = frame.id.header().ok_or(RxError::InvalidFrame)?;
        let tail = TailByte::from(*tail);

        let model = Self {
            timestamp,
            header,
            transfer_id: tail.transfer_id(),
            start: tail.sot(),
            end: tail.eot(),
            toggle: tail.toggle(),
            payload,
        };

        // Protocol version check: a start frame must carry the initial
        // toggle state.
        let mut valid = !model.start || model.toggle == SOT_TOGGLE_BIT;
        // Anonymous transfers can only be single-frame transfers.
        valid = valid && ((model.start && model.end) || header.source.is_some());
        // Non-last frames of a multi-frame transfer shall utilize the MTU
        // fully.
        valid = valid
            && (model.payload.len() >= MFT_NON_LAST_FRAME_PAYLOAD_MIN || model.end);
        // A frame of a multi-frame transfer cannot be empty behind the tail.
        valid = valid && (!model.payload.is_empty() || (model.start && model.end));
        if valid { Ok(model) } else { Err(RxError::InvalidFrame) }
    }

    fn meta(&self) -> TransferMeta {
        TransferMeta {
            priority: self.header.priority,
            data_spec: self.header.data_spec,
            remote: self.header.source,
            transfer_id: self.transfer_id,
        }
    }
}

/// Forward distance from `b` to `a` modulo the transfer-ID range.
fn transfer_id_diff(a: TransferId, b: TransferId) -> u8 {
    a.into_u8().wrapping_sub(b.into_u8()) & TransferId::MAX.into_u8()
}

/// Reassembly state of one (subscription, source) pair
///
/// Born on a start-of-transfer frame from a new source, mutated by the
/// following frames of the same transfer, reset on completion or protocol
/// error, destroyed together with the owning subscription.
#[derive(Debug)]
struct Session {
    sot_timestamp: Instant,
    /// Cumulative payload size, not capped by the extent.
    total_payload_size: usize,
    /// Reassembly buffer, allocated lazily and capped at the extent.
    payload: Vec<u8>,
    crc: TransferCrc,
    transfer_id: TransferId,
    /// Redundant transport index the current transfer arrives on.
    rti: u8,
    toggle: bool,
}

impl Session {
    fn new(timestamp: Instant, transfer_id: TransferId, rti: u8) -> Self {
        Self {
            sot_timestamp: timestamp,
            total_payload_size: 0,
            payload: Vec::new(),
            crc: TransferCrc::default(),
            transfer_id,
            rti,
            toggle: SOT_TOGGLE_BIT,
        }
    }

    fn reset(&mut self, transfer_id: TransferId, rti: u8) {
        self.total_payload_size = 0;
        self.payload.clear();
        self.crc = TransferCrc::default();
        self.transfer_id = transfer_id;
        self.toggle = SOT_TOGGLE_BIT;
        self.rti = rti;
    }

    fn update(
        &mut self,
        model: &FrameModel<'_>,
        rti: u8,
        tid_timeout: Duration,
        extent: usize,
    ) -> Option<Transfer> {
        let timed_out = model.timestamp
            > self
                .sot_timestamp
                .checked_add(tid_timeout)
                .unwrap_or(Instant::MAX);
        let not_adjacent = transfer_id_diff(self.transfer_id, model.transfer_id) > 1;
        let restart = timed_out || (self.rti == rti && model.start && not_adjacent);

        if restart {
            self.reset(model.transfer_id, rti);
            if !model.start {
                // The start of the next transfer was missed; skip one
                // transfer-ID ahead (transport index retained) and free the
                // buffer until the next start frame re-allocates it.
                trace!("rx session: resync after missed start of transfer");
                self.reset(self.transfer_id.next(), self.rti);
                self.payload = Vec::new();
                return None;
            }
        }

        let wanted =
            self.rti == rti && model.toggle == self.toggle && model.transfer_id == self.transfer_id;
        if !wanted {
            // Out-of-order or duplicated frame; no state change.
            trace!("rx session: frame rejected by transport/toggle/id gates");
            return None;
        }
        self.accept(model, extent)
    }

    fn accept(&mut self, model: &FrameModel<'_>, extent: usize) -> Option<Transfer> {
        if model.start {
            self.sot_timestamp = model.timestamp;
        }
        let single_frame = model.start && model.end;
        if !single_frame {
            self.crc.add_bytes(model.payload);
        }
        self.write_payload(extent, model.payload);
        if !model.end {
            self.toggle = !self.toggle;
            return None;
        }
        if !single_frame && self.crc.get() != 0 {
            warn!("rx session: transfer CRC mismatch, transfer dropped");
            self.reset(self.transfer_id.next(), self.rti);
            return None;
        }

        let mut payload = core::mem::take(&mut self.payload);
        let truncated = self.total_payload_size - payload.len();
        if !single_frame && truncated < TransferCrc::LENGTH {
            // The trailing CRC bytes did not fall victim to truncation and
            // are still in the buffer.
            payload.truncate(payload.len() - (TransferCrc::LENGTH - truncated));
        }
        let transfer = Transfer {
            meta: model.meta(),
            timestamp: self.sot_timestamp,
            payload,
        };
        self.reset(self.transfer_id.next(), self.rti);
        Some(transfer)
    }

    fn write_payload(&mut self, extent: usize, payload: &[u8]) {
        self.total_payload_size += payload.len();
        if self.payload.capacity() == 0 && extent > 0 {
            // Allocate the buffer lazily, as late as possible.
            self.payload.reserve_exact(extent);
        }
        let room = extent.saturating_sub(self.payload.len());
        let store = payload.len().min(room);
        self.payload.extend_from_slice(&payload[..store]);
    }
}

const SESSION_COUNT: usize = NodeId::MAX.into_u8() as usize + 1;

/// A live subscription to one port of one transfer kind
pub struct Subscription {
    data_spec: DataSpecifier,
    extent: usize,
    tid_timeout: Duration,
    sessions: [Option<Box<Session>>; SESSION_COUNT],
}

impl Subscription {
    fn new(data_spec: DataSpecifier, extent: usize, tid_timeout: Duration) -> Self {
        Self {
            data_spec,
            extent,
            tid_timeout,
            sessions: core::array::from_fn(|_| None),
        }
    }

    pub fn data_spec(&self) -> DataSpecifier {
        self.data_spec
    }

    pub fn port(&self) -> u16 {
        self.data_spec.port()
    }

    /// Maximum payload bytes accepted from a transfer; the rest is cut off.
    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn tid_timeout(&self) -> Duration {
        self.tid_timeout
    }

    /// Number of sources with live reassembly state.
    pub fn session_count(&self) -> usize {
        self.sessions.iter().filter(|slot| slot.is_some()).count()
    }

    fn accept(&mut self, model: &FrameModel<'_>, rti: u8) -> Option<Transfer> {
        match model.header.source {
            Some(source) => {
                let tid_timeout = self.tid_timeout;
                let extent = self.extent;
                let slot = &mut self.sessions[usize::from(source)];
                if slot.is_none() && model.start {
                    // Create the session lazily on a start frame; a transfer
                    // whose start was never seen cannot complete anyway.
                    *slot = Some(Box::new(Session::new(
                        model.timestamp,
                        model.transfer_id,
                        rti,
                    )));
                }
                slot.as_mut()
                    .and_then(|session| session.update(model, rti, tid_timeout, extent))
            }
            None => {
                // Anonymous transfers are single-frame; emit immediately
                // without session state.
                let store = self.extent.min(model.payload.len());
                let mut payload = Vec::with_capacity(store);
                payload.extend_from_slice(&model.payload[..store]);
                Some(Transfer {
                    meta: model.meta(),
                    timestamp: model.timestamp,
                    payload,
                })
            }
        }
    }
}

/// The receive pipeline: subscription tables and per-source reassembly
///
/// Holds one balanced port index per [`TransferKind`]. All operations run to
/// completion without blocking; the caller serializes access.
pub struct Instance {
    node_id: Option<NodeId>,
    tables: [Tree<Subscription>; TransferKind::COUNT],
}

impl Instance {
    /// An anonymous instance (`node_id` = `None`) rejects every frame
    /// addressed to a concrete destination.
    pub fn new(node_id: Option<NodeId>) -> Self {
        Self {
            node_id,
            tables: [Tree::new(), Tree::new(), Tree::new()],
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn set_node_id(&mut self, node_id: Option<NodeId>) {
        self.node_id = node_id;
    }

    /// Starts receiving transfers on the given port.
    ///
    /// An existing subscription for the same kind and port is replaced and
    /// all of its reassembly sessions are discarded.
    pub fn subscribe(&mut self, data_spec: DataSpecifier, extent: usize, tid_timeout: Duration) {
        self.unsubscribe(data_spec);
        let port = data_spec.port();
        self.tables[data_spec.kind().index()].search_or_insert(
            |sub| port.cmp(&sub.port()),
            || Subscription::new(data_spec, extent, tid_timeout),
        );
    }

    /// Stops receiving on the port. Returns whether a subscription existed.
    pub fn unsubscribe(&mut self, data_spec: DataSpecifier) -> bool {
        let port = data_spec.port();
        let table = &mut self.tables[data_spec.kind().index()];
        match table.find(|sub| port.cmp(&sub.port())) {
            Some(handle) => {
                table.remove(handle);
                true
            }
            None => false,
        }
    }

    /// The live subscription for a port, if any.
    pub fn subscription(&self, data_spec: DataSpecifier) -> Option<&Subscription> {
        let port = data_spec.port();
        let table = &self.tables[data_spec.kind().index()];
        table.find(|sub| port.cmp(&sub.port())).map(|handle| table.get(handle))
    }

    /// Live subscriptions of one kind in ascending port order.
    pub fn subscriptions(&self, kind: TransferKind) -> impl Iterator<Item = &Subscription> {
        self.tables[kind.index()].iter()
    }

    /// Processes one received frame.
    ///
    /// `Ok(Some(_))` carries a completed transfer; `Ok(None)` means the frame
    /// was consumed but the transfer is still in progress or was silently
    /// dropped by the session gates. `rti` identifies the redundant transport
    /// the frame arrived on.
    pub fn accept(
        &mut self,
        timestamp: Instant,
        frame: &Frame,
        rti: u8,
    ) -> Result<Option<Transfer>, RxError> {
        let model = FrameModel::parse(timestamp, frame)?;
        if let Some(destination) = model.header.destination {
            if self.node_id != Some(destination) {
                return Err(RxError::BadDestination);
            }
        }
        // The only variable-complexity step of the pipeline: logarithmic in
        // the number of subscriptions of this kind.
        let port = model.header.data_spec.port();
        let table = &mut self.tables[model.header.data_spec.kind().index()];
        let handle = table
            .find(|sub| port.cmp(&sub.port()))
            .ok_or(RxError::NoMatchingSubscription)?;
        Ok(table.get_mut(handle).accept(&model, rti))
    }
}
