//! Application-level transfer objects

use alloc::vec::Vec;
use decyphal_core::{NodeId, Priority, TransferId};

use crate::frame::DataSpecifier;
use crate::time::Instant;

/// Properties shared by every frame of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferMeta {
    pub priority: Priority,
    pub data_spec: DataSpecifier,
    /// The source node on reception, the destination node for outgoing
    /// service transfers, `None` for messages and anonymous sources.
    pub remote: Option<NodeId>,
    pub transfer_id: TransferId,
}

/// A reassembled transfer handed to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub meta: TransferMeta,
    /// Timestamp of the first received frame of the transfer.
    pub timestamp: Instant,
    /// Payload truncated to the subscription extent. Ownership passes to the
    /// caller; the session buffer is re-allocated on the next transfer.
    pub payload: Vec<u8>,
}
