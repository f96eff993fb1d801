//! BLE frame codec
//!
//! Splits payloads that exceed the negotiated MTU into sequenced fragments and
//! reassembles them strictly in order. A fragment carries a four byte header
//! `[0x01, seq, total_hi, total_lo]`; a retransmission request is the two byte
//! packet `[0x02, seq]`. Anything else is an unframed, complete message.
//!
//! The sequence byte only has 256 slots while the total count is 16 bits
//! wide. Rather than wrap silently, the codec refuses to produce or accept a
//! message that needs more than [`MAX_SEQUENCE_SLOTS`] fragments.

use crate::errors::FramingError;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// First byte of every fragment
pub const FRAME_MARKER: u8 = 0x01;

/// First byte of a retransmission request
pub const RETRANSMIT_MARKER: u8 = 0x02;

/// Size of the fragment header
pub const HEADER_SIZE: usize = 4;

/// Distinct sequence numbers representable in the header
pub const MAX_SEQUENCE_SLOTS: usize = 256;

// ----------------------------------------------------------------------------
// GATT Identifiers
// ----------------------------------------------------------------------------

/// Service exposing the bridge characteristics
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic carrying data fragments
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic carrying retransmission requests
pub const CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

// ----------------------------------------------------------------------------
// Fragment Header
// ----------------------------------------------------------------------------

/// Parsed fragment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u8,
    pub total_packets: u16,
}

impl FrameHeader {
    pub fn new(sequence: u8, total_packets: u16) -> Self {
        Self {
            sequence,
            total_packets,
        }
    }

    /// Wire form, total count big-endian
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let [hi, lo] = self.total_packets.to_be_bytes();
        [FRAME_MARKER, self.sequence, hi, lo]
    }

    /// Parse the header at the start of `packet`, returning it and the payload segment
    pub fn parse(packet: &[u8]) -> Result<(Self, &[u8]), FramingError> {
        if packet.len() < HEADER_SIZE || packet[0] != FRAME_MARKER {
            return Err(FramingError::InvalidHeader {
                reason: format!("expected {HEADER_SIZE}-byte header, got {} bytes", packet.len()),
            });
        }
        let total_packets = u16::from_be_bytes([packet[2], packet[3]]);
        if total_packets == 0 {
            return Err(FramingError::InvalidHeader {
                reason: "total packet count is zero".to_string(),
            });
        }
        Ok((Self::new(packet[1], total_packets), &packet[HEADER_SIZE..]))
    }
}

// ----------------------------------------------------------------------------
// Outbound
// ----------------------------------------------------------------------------

/// Payload bytes available per write once the header is accounted for
pub fn max_payload_for_mtu(mtu: usize) -> Result<usize, FramingError> {
    if mtu <= HEADER_SIZE {
        return Err(FramingError::MtuTooSmall {
            mtu,
            header: HEADER_SIZE,
        });
    }
    Ok(mtu - HEADER_SIZE)
}

/// Number of fragments `len` bytes need at `max_payload` bytes each
pub fn fragment_count(len: usize, max_payload: usize) -> usize {
    if max_payload == 0 {
        return 0;
    }
    len.div_ceil(max_payload)
}

/// Split a payload into the writes that carry it
///
/// A payload that fits in one write is returned unframed. Otherwise every
/// chunk of `max_payload` bytes is prefixed with its header, in sequence order.
pub fn fragment(payload: &[u8], max_payload: usize) -> Result<Vec<Vec<u8>>, FramingError> {
    if max_payload == 0 {
        return Err(FramingError::MtuTooSmall {
            mtu: HEADER_SIZE,
            header: HEADER_SIZE,
        });
    }
    if payload.len() <= max_payload {
        return Ok(vec![payload.to_vec()]);
    }

    let total = fragment_count(payload.len(), max_payload);
    if total > MAX_SEQUENCE_SLOTS {
        return Err(FramingError::TooManyFragments {
            needed: total,
            max: MAX_SEQUENCE_SLOTS,
        });
    }

    let fragments = payload
        .chunks(max_payload)
        .enumerate()
        .map(|(index, chunk)| {
            let header = FrameHeader::new(index as u8, total as u16);
            let mut packet = Vec::with_capacity(HEADER_SIZE + chunk.len());
            packet.extend_from_slice(&header.encode());
            packet.extend_from_slice(chunk);
            packet
        })
        .collect();
    Ok(fragments)
}

/// Request that a peer resume its transfer from `sequence`
pub fn retransmit_request(sequence: u8) -> [u8; 2] {
    [RETRANSMIT_MARKER, sequence]
}

// ----------------------------------------------------------------------------
// Inbound
// ----------------------------------------------------------------------------

/// Classification of a packet received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPacket<'a> {
    Fragment {
        header: FrameHeader,
        payload: &'a [u8],
    },
    RetransmitRequest {
        sequence: u8,
    },
    Unframed(&'a [u8]),
}

impl<'a> InboundPacket<'a> {
    /// Classify a packet; only packets read from the control characteristic
    /// (`from_control`) can be retransmission requests
    pub fn classify(packet: &'a [u8], from_control: bool) -> Result<Self, FramingError> {
        match packet {
            [FRAME_MARKER, ..] if packet.len() >= HEADER_SIZE => {
                let (header, payload) = FrameHeader::parse(packet)?;
                Ok(InboundPacket::Fragment { header, payload })
            }
            [RETRANSMIT_MARKER, sequence] if from_control => {
                Ok(InboundPacket::RetransmitRequest {
                    sequence: *sequence,
                })
            }
            _ => Ok(InboundPacket::Unframed(packet)),
        }
    }
}

/// Result of feeding one fragment to a reassembly buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// Fragment appended, more expected
    Incomplete,
    /// Last fragment appended; the full message
    Complete(Vec<u8>),
    /// Out of order; ask the peer to resend from `expected`
    Retransmit { expected: u8 },
    /// Too many consecutive mismatches; the partial message was dropped
    Abandoned { expected: u8, attempts: u32 },
}

/// Per-peer in-order reassembly state
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    accumulated: Vec<u8>,
    expected_sequence: u16,
    total_expected: Option<u16>,
    retransmit_requests: u32,
    max_retransmit_requests: u32,
}

impl ReassemblyBuffer {
    pub fn new(max_retransmit_requests: u32) -> Self {
        Self {
            accumulated: Vec::new(),
            expected_sequence: 0,
            total_expected: None,
            retransmit_requests: 0,
            max_retransmit_requests,
        }
    }

    /// Feed one fragment
    ///
    /// A mismatched fragment is never appended. Each mismatch asks for a
    /// retransmission until `max_retransmit_requests` requests have gone
    /// unanswered, after which the partial message is discarded.
    pub fn accept(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<ReassemblyOutcome, FramingError> {
        if usize::from(header.total_packets) > MAX_SEQUENCE_SLOTS {
            return Err(FramingError::TooManyFragments {
                needed: usize::from(header.total_packets),
                max: MAX_SEQUENCE_SLOTS,
            });
        }

        if u16::from(header.sequence) != self.expected_sequence {
            return Ok(self.mismatch());
        }

        let total = *self.total_expected.get_or_insert(header.total_packets);
        self.accumulated.extend_from_slice(payload);
        self.expected_sequence += 1;
        self.retransmit_requests = 0;

        if self.expected_sequence >= total {
            let message = std::mem::take(&mut self.accumulated);
            self.reset();
            return Ok(ReassemblyOutcome::Complete(message));
        }
        Ok(ReassemblyOutcome::Incomplete)
    }

    fn mismatch(&mut self) -> ReassemblyOutcome {
        // expected_sequence < total <= 256 whenever a message is in flight
        let expected = self.expected_sequence as u8;
        if self.retransmit_requests >= self.max_retransmit_requests {
            let attempts = self.retransmit_requests;
            self.reset();
            return ReassemblyOutcome::Abandoned { expected, attempts };
        }
        self.retransmit_requests += 1;
        ReassemblyOutcome::Retransmit { expected }
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.expected_sequence = 0;
        self.total_expected = None;
        self.retransmit_requests = 0;
    }

    /// Bytes accumulated for the message in flight
    pub fn buffered(&self) -> &[u8] {
        &self.accumulated
    }

    pub fn expected_sequence(&self) -> u16 {
        self.expected_sequence
    }

    pub fn total_expected(&self) -> Option<u16> {
        self.total_expected
    }

    pub fn retransmit_requests(&self) -> u32 {
        self.retransmit_requests
    }

    /// No message in flight
    pub fn is_idle(&self) -> bool {
        self.expected_sequence == 0 && self.accumulated.is_empty()
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new(3)
    }
}
