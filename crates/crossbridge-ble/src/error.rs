//! Error types for the BLE framing layer

use crossbridge_core::{BridgeError, FramingError, PeerId, TransportError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE framing layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Peer not connected: {peer_id}")]
    PeerNotConnected { peer_id: PeerId },

    #[error("No transfer to resend for peer {peer_id}")]
    NothingToResend { peer_id: PeerId },

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl BleError {
    pub fn not_connected(peer_id: &PeerId) -> Self {
        BleError::PeerNotConnected {
            peer_id: peer_id.clone(),
        }
    }
}

impl From<BleError> for BridgeError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::PeerNotConnected { peer_id } => {
                BridgeError::Transport(TransportError::PeerNotConnected {
                    peer_id: peer_id.to_string(),
                })
            }
            BleError::NothingToResend { peer_id } => {
                BridgeError::invalid_arguments(format!("nothing to resend for {peer_id}"))
            }
            BleError::Framing(err) => BridgeError::Framing(err),
            BleError::Transport(err) => BridgeError::Transport(err),
        }
    }
}

/// Result alias for the framing layer
pub type BleResult<T> = Result<T, BleError>;
