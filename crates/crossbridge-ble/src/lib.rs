//! BLE framing layer for crossbridge
//!
//! Provides reliable, in-order message delivery on top of raw characteristic
//! writes to connected peripherals.
//!
//! ## Architecture
//!
//! - [`layer`] - fragmentation, per-peer reassembly and retransmission
//! - [`error`] - error types specific to the framing layer
//! - `peer` - per-peer link state and counters
//! - `btleplug_adapter` - (feature `btleplug`) adapter for real peripherals
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossbridge_ble::{BleFramingLayer, FramingEvent};
//! use crossbridge_core::{FramingConfig, PeripheralTransport, DATA_CHARACTERISTIC_UUID};
//!
//! # async fn example(peripheral: Arc<dyn PeripheralTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let (layer, mut events) = BleFramingLayer::new(FramingConfig::default());
//! let peer = layer.connect_peer(peripheral);
//!
//! layer.send_data(&[0u8; 600], &peer, DATA_CHARACTERISTIC_UUID).await?;
//!
//! while let Some(FramingEvent::DataReceived { data, .. }) = events.recv().await {
//!     println!("received {} bytes", data.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod layer;
mod peer;

#[cfg(feature = "btleplug")]
mod btleplug_adapter;

// Public API exports
pub use error::{BleError, BleResult};
pub use layer::{BleFramingLayer, FramingEvent};
pub use peer::{PeerLinkStats, ReassemblySnapshot};

#[cfg(feature = "btleplug")]
pub use btleplug_adapter::{spawn_notification_pump, BtleplugPeripheral, DEFAULT_WRITE_LENGTH};
