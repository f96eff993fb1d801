//! btleplug peripherals as framing-layer transports

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Peripheral as _, WriteType as BtleWriteType};
use btleplug::platform::Peripheral;
use crossbridge_core::{PeerId, PeripheralTransport, TransportError, WriteType};
use futures::stream::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::layer::BleFramingLayer;

/// Conservative default when the platform does not report a negotiated MTU
pub const DEFAULT_WRITE_LENGTH: usize = 182;

// ----------------------------------------------------------------------------
// Peripheral Adapter
// ----------------------------------------------------------------------------

/// A connected btleplug peripheral with discovered services
pub struct BtleplugPeripheral {
    peripheral: Peripheral,
    peer_id: PeerId,
    write_length: usize,
}

impl BtleplugPeripheral {
    pub fn new(peripheral: Peripheral) -> Self {
        let peer_id = PeerId::new(format!("{:?}", peripheral.id()));
        Self {
            peripheral,
            peer_id,
            write_length: DEFAULT_WRITE_LENGTH,
        }
    }

    /// Use the MTU negotiated by the host stack
    pub fn with_write_length(mut self, write_length: usize) -> Self {
        self.write_length = write_length;
        self
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl PeripheralTransport for BtleplugPeripheral {
    fn identifier(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn maximum_write_length(&self, _write_type: WriteType) -> usize {
        self.write_length
    }

    async fn write(
        &self,
        data: &[u8],
        characteristic: Uuid,
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| TransportError::WriteFailed {
                peer_id: self.peer_id.to_string(),
                reason: format!("characteristic {characteristic} not found"),
            })?;

        let write_type = match write_type {
            WriteType::WithResponse => BtleWriteType::WithResponse,
            WriteType::WithoutResponse => BtleWriteType::WithoutResponse,
        };

        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| TransportError::WriteFailed {
                peer_id: self.peer_id.to_string(),
                reason: e.to_string(),
            })
    }
}

// ----------------------------------------------------------------------------
// Notification Pump
// ----------------------------------------------------------------------------

/// Subscribe to `characteristic` and feed every notification into the layer
pub async fn spawn_notification_pump(
    layer: Arc<BleFramingLayer>,
    adapter: Arc<BtleplugPeripheral>,
    characteristic: Uuid,
) -> Result<JoinHandle<()>, TransportError> {
    let peer_id = adapter.identifier();
    let peripheral = adapter.peripheral().clone();

    let target = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic)
        .ok_or_else(|| TransportError::ChannelUnavailable {
            channel: characteristic.to_string(),
        })?;

    peripheral
        .subscribe(&target)
        .await
        .map_err(|e| TransportError::ChannelUnavailable {
            channel: format!("{characteristic}: {e}"),
        })?;

    let mut notifications =
        peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::ChannelUnavailable {
                channel: format!("{characteristic}: {e}"),
            })?;

    let handle = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != characteristic {
                continue;
            }
            if let Err(e) = layer
                .handle_incoming(&peer_id, &notification.value, notification.uuid)
                .await
            {
                warn!("Failed to process notification from {}: {}", peer_id, e);
                if !layer.is_connected(&peer_id) {
                    error!("Peer {} vanished, stopping notification pump", peer_id);
                    break;
                }
            }
        }
        debug!("Notification pump for peer {} ended", peer_id);
    });

    Ok(handle)
}
