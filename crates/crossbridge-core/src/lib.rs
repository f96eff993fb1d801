//! crossbridge core
//!
//! Foundational types shared by every crossbridge crate: the message envelope
//! exchanged with embedded UI runtimes, the error taxonomy, configuration,
//! the collaborator traits that stand in for engine and BLE transports, and
//! the pure BLE frame codec used by the framing layer.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod compression;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod framing;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use compression::{compress, decompress, CompressedPayload};
pub use config::{
    BridgeConfig, FramingConfig, HybridConfig, LifecycleConfig, OptimizerConfig, RegistryConfig,
};
pub use envelope::{Envelope, MessageType, Payload};
pub use errors::{BridgeError, BridgeResult, FramingError, TransportError};
pub use framing::{
    fragment, fragment_count, max_payload_for_mtu, retransmit_request, FrameHeader,
    InboundPacket, ReassemblyBuffer, ReassemblyOutcome, CONTROL_CHARACTERISTIC_UUID,
    DATA_CHARACTERISTIC_UUID, FRAME_MARKER, HEADER_SIZE, MAX_SEQUENCE_SLOTS, RETRANSMIT_MARKER,
    SERVICE_UUID,
};
pub use transport::{
    BundleLoader, BundleSource, EngineFactory, EngineHandle, EngineTransport, EventHandler,
    PeripheralTransport, WriteType,
};
pub use types::{PeerId, SharedTimeSource, SystemTimeSource, TechStack, TimeSource, Timestamp};

/// Re-exported so downstream crates build payloads with the same JSON model.
pub use serde_json::{json, Map, Value};
