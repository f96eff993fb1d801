//! Per-peer link state

use std::sync::Arc;

use crossbridge_core::{PeripheralTransport, ReassemblyBuffer};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Outbound Transfer
// ----------------------------------------------------------------------------

/// Fragments of the last multi-packet message sent to a peer, kept for resends
#[derive(Debug, Clone)]
pub(crate) struct OutboundTransfer {
    pub fragments: Vec<Vec<u8>>,
    pub characteristic: Uuid,
}

// ----------------------------------------------------------------------------
// Link Statistics
// ----------------------------------------------------------------------------

/// Counters for one peer link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerLinkStats {
    pub messages_sent: u64,
    pub fragments_sent: u64,
    pub messages_received: u64,
    pub retransmit_requests_sent: u64,
    pub fragments_resent: u64,
    pub reassemblies_abandoned: u64,
}

/// Read-only view of a peer's reassembly buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblySnapshot {
    pub buffered: Vec<u8>,
    pub expected_sequence: u16,
    pub total_expected: Option<u16>,
}

// ----------------------------------------------------------------------------
// Peer Link
// ----------------------------------------------------------------------------

/// State the framing layer keeps for one connected peripheral
pub(crate) struct PeerLink {
    pub transport: Arc<dyn PeripheralTransport>,
    /// Created on the first fragment from this peer
    pub reassembly: Option<ReassemblyBuffer>,
    pub last_transfer: Option<OutboundTransfer>,
    pub stats: PeerLinkStats,
}

impl PeerLink {
    pub fn new(transport: Arc<dyn PeripheralTransport>) -> Self {
        Self {
            transport,
            reassembly: None,
            last_transfer: None,
            stats: PeerLinkStats::default(),
        }
    }

    pub fn reassembly_mut(&mut self, max_retransmit_requests: u32) -> &mut ReassemblyBuffer {
        self.reassembly
            .get_or_insert_with(|| ReassemblyBuffer::new(max_retransmit_requests))
    }

    pub fn snapshot(&self) -> Option<ReassemblySnapshot> {
        self.reassembly.as_ref().map(|buffer| ReassemblySnapshot {
            buffered: buffer.buffered().to_vec(),
            expected_sequence: buffer.expected_sequence(),
            total_expected: buffer.total_expected(),
        })
    }
}
