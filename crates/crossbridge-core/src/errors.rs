//! Error types for crossbridge
//!
//! Transport and framing failures have their own enums; `BridgeError` unifies
//! them with the facade-level failures callers see from `call_method`.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by an engine channel or a BLE peripheral
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Channel {channel} is not available")]
    ChannelUnavailable { channel: String },
    #[error("Invoking {method} failed: {reason}")]
    InvokeFailed { method: String, reason: String },
    #[error("Write to peer {peer_id} failed: {reason}")]
    WriteFailed { peer_id: String, reason: String },
    #[error("Peer not connected: {peer_id}")]
    PeerNotConnected { peer_id: String },
    #[error("Transport closed")]
    Closed,
}

/// Failures of the BLE frame codec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("Payload needs {needed} fragments, at most {max} can be sequenced")]
    TooManyFragments { needed: usize, max: usize },
    #[error("Negotiated MTU {mtu} leaves no room after the {header}-byte header")]
    MtuTooSmall { mtu: usize, header: usize },
    #[error("Invalid frame header: {reason}")]
    InvalidHeader { reason: String },
}

// ----------------------------------------------------------------------------
// Bridge Error
// ----------------------------------------------------------------------------

/// Unified error for every crossbridge component
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge not available")]
    BridgeNotAvailable,
    #[error("Method call {method} failed: {reason}")]
    MethodCallFailed { method: String, reason: String },
    #[error("Invalid arguments: {reason}")]
    InvalidArguments { reason: String },
    #[error("Communication timeout after {duration_ms}ms")]
    CommunicationTimeout { duration_ms: u64 },
    #[error("Engine {module_id} could not be created: {reason}")]
    EngineCreation { module_id: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

/// Result alias used across crossbridge
pub type BridgeResult<T> = Result<T, BridgeError>;

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl BridgeError {
    /// The target bridge is absent or not ready
    pub fn not_available() -> Self {
        BridgeError::BridgeNotAvailable
    }

    /// The remote side reported a failure for `method`
    pub fn method_failed<M: Into<String>, R: Into<String>>(method: M, reason: R) -> Self {
        BridgeError::MethodCallFailed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Arguments could not be interpreted
    pub fn invalid_arguments<T: Into<String>>(reason: T) -> Self {
        BridgeError::InvalidArguments {
            reason: reason.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        BridgeError::CommunicationTimeout { duration_ms }
    }

    /// The engine factory refused to build a runtime
    pub fn engine_creation<M: Into<String>, R: Into<String>>(module_id: M, reason: R) -> Self {
        BridgeError::EngineCreation {
            module_id: module_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        BridgeError::Configuration {
            reason: reason.into(),
        }
    }
}
