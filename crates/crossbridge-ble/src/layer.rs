//! Reliable messaging over BLE characteristic writes

use std::sync::Arc;

use crossbridge_core::framing::{fragment, max_payload_for_mtu, retransmit_request};
use crossbridge_core::{
    FramingConfig, InboundPacket, PeerId, PeripheralTransport, ReassemblyOutcome,
};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BleError, BleResult};
use crate::peer::{OutboundTransfer, PeerLink, PeerLinkStats, ReassemblySnapshot};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// What the framing layer reports upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingEvent {
    /// A complete message, either reassembled or unframed
    DataReceived { peer: PeerId, data: Vec<u8> },
    /// A partial message was dropped after repeated sequence mismatches
    ReassemblyAbandoned {
        peer: PeerId,
        expected_sequence: u8,
        attempts: u32,
    },
}

// ----------------------------------------------------------------------------
// Framing Layer
// ----------------------------------------------------------------------------

/// MTU-bounded fragmentation and in-order reassembly for connected peripherals
///
/// Each peer has its own lock, so traffic for unrelated peers never waits on
/// a shared one. A peer's lock is held for the whole of a send so fragments
/// of two messages to the same peer cannot interleave.
pub struct BleFramingLayer {
    config: FramingConfig,
    peers: DashMap<PeerId, Arc<Mutex<PeerLink>>>,
    event_tx: mpsc::UnboundedSender<FramingEvent>,
}

impl BleFramingLayer {
    /// Create the layer and the receiver for its events
    pub fn new(config: FramingConfig) -> (Self, mpsc::UnboundedReceiver<FramingEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let layer = Self {
            config,
            peers: DashMap::new(),
            event_tx,
        };
        (layer, event_rx)
    }

    pub fn config(&self) -> &FramingConfig {
        &self.config
    }

    /// Start tracking a connected peripheral; replaces any previous link
    pub fn connect_peer(&self, transport: Arc<dyn PeripheralTransport>) -> PeerId {
        let peer_id = transport.identifier();
        self.peers
            .insert(peer_id.clone(), Arc::new(Mutex::new(PeerLink::new(transport))));
        info!("BLE peer connected: {}", peer_id);
        peer_id
    }

    /// Forget a peripheral, dropping its reassembly buffer and retained transfer
    pub fn disconnect_peer(&self, peer_id: &PeerId) -> bool {
        let removed = self.peers.remove(peer_id).is_some();
        if removed {
            info!("BLE peer disconnected: {}", peer_id);
        }
        removed
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn link(&self, peer_id: &PeerId) -> BleResult<Arc<Mutex<PeerLink>>> {
        // clone out so the shard guard is released before awaiting the peer lock
        self.peers
            .get(peer_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BleError::not_connected(peer_id))
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send `payload` to a peer on `characteristic`, fragmenting past the MTU
    ///
    /// Returns the number of writes issued.
    pub async fn send_data(
        &self,
        payload: &[u8],
        peer_id: &PeerId,
        characteristic: Uuid,
    ) -> BleResult<usize> {
        let link = self.link(peer_id)?;
        let mut link = link.lock().await;

        let mtu = link.transport.maximum_write_length(self.config.write_type);
        let max_payload = max_payload_for_mtu(mtu)?;
        let writes = fragment(payload, max_payload)?;

        for write in &writes {
            link.transport
                .write(write, characteristic, self.config.write_type)
                .await?;
        }

        link.stats.messages_sent += 1;
        link.stats.fragments_sent += writes.len() as u64;

        let count = writes.len();
        if count > 1 {
            debug!(
                "Sent {} bytes to {} in {} fragments (max payload {})",
                payload.len(),
                peer_id,
                count,
                max_payload
            );
            link.last_transfer = Some(OutboundTransfer {
                fragments: writes,
                characteristic,
            });
        } else {
            debug!("Sent {} bytes to {} unframed", payload.len(), peer_id);
            // a newer message supersedes whatever was retained for resends
            link.last_transfer = None;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Process one packet a peer wrote on `characteristic`
    ///
    /// Retransmission requests are only recognized on the configured control
    /// characteristic; anything else without a frame marker is a message.
    pub async fn handle_incoming(
        &self,
        peer_id: &PeerId,
        packet: &[u8],
        characteristic: Uuid,
    ) -> BleResult<()> {
        let link = self.link(peer_id)?;
        let mut link = link.lock().await;

        let from_control = characteristic == self.config.control_characteristic;
        let inbound = match InboundPacket::classify(packet, from_control) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!("Dropping malformed packet from {}: {}", peer_id, err);
                return Err(err.into());
            }
        };

        match inbound {
            InboundPacket::Unframed(data) => {
                link.stats.messages_received += 1;
                self.emit(FramingEvent::DataReceived {
                    peer: peer_id.clone(),
                    data: data.to_vec(),
                });
            }
            InboundPacket::RetransmitRequest { sequence } => {
                self.resend_from(&mut link, peer_id, sequence).await?;
            }
            InboundPacket::Fragment { header, payload } => {
                let outcome = link
                    .reassembly_mut(self.config.max_retransmit_requests)
                    .accept(header, payload)?;
                self.apply_outcome(&mut link, peer_id, outcome).await?;
            }
        }
        Ok(())
    }

    async fn apply_outcome(
        &self,
        link: &mut PeerLink,
        peer_id: &PeerId,
        outcome: ReassemblyOutcome,
    ) -> BleResult<()> {
        match outcome {
            ReassemblyOutcome::Incomplete => {}
            ReassemblyOutcome::Complete(data) => {
                debug!("Reassembled {} bytes from {}", data.len(), peer_id);
                link.stats.messages_received += 1;
                self.emit(FramingEvent::DataReceived {
                    peer: peer_id.clone(),
                    data,
                });
            }
            ReassemblyOutcome::Retransmit { expected } => {
                debug!(
                    "Sequence mismatch from {}, requesting retransmit from {}",
                    peer_id, expected
                );
                link.stats.retransmit_requests_sent += 1;
                link.transport
                    .write(
                        &retransmit_request(expected),
                        self.config.control_characteristic,
                        self.config.write_type,
                    )
                    .await?;
            }
            ReassemblyOutcome::Abandoned { expected, attempts } => {
                warn!(
                    "Abandoning reassembly from {} at sequence {} after {} retransmit requests",
                    peer_id, expected, attempts
                );
                link.stats.reassemblies_abandoned += 1;
                self.emit(FramingEvent::ReassemblyAbandoned {
                    peer: peer_id.clone(),
                    expected_sequence: expected,
                    attempts,
                });
            }
        }
        Ok(())
    }

    async fn resend_from(
        &self,
        link: &mut PeerLink,
        peer_id: &PeerId,
        sequence: u8,
    ) -> BleResult<()> {
        let Some(transfer) = link.last_transfer.clone() else {
            warn!(
                "Retransmit request from {} for sequence {} with no transfer retained",
                peer_id, sequence
            );
            return Err(BleError::NothingToResend {
                peer_id: peer_id.clone(),
            });
        };

        let start = usize::from(sequence);
        let resend = transfer.fragments.get(start..).unwrap_or_default();
        debug!(
            "Resending {} fragments to {} from sequence {}",
            resend.len(),
            peer_id,
            sequence
        );
        for write in resend {
            link.transport
                .write(write, transfer.characteristic, self.config.write_type)
                .await?;
        }
        link.stats.fragments_resent += resend.len() as u64;
        Ok(())
    }

    fn emit(&self, event: FramingEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Framing event dropped, receiver closed");
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Current reassembly state for a peer, `None` before its first fragment
    pub async fn reassembly_snapshot(&self, peer_id: &PeerId) -> Option<ReassemblySnapshot> {
        let link = self.link(peer_id).ok()?;
        let link = link.lock().await;
        link.snapshot()
    }

    pub async fn peer_stats(&self, peer_id: &PeerId) -> Option<PeerLinkStats> {
        let link = self.link(peer_id).ok()?;
        let link = link.lock().await;
        Some(link.stats.clone())
    }
}
