//! Channel Router
//!
//! Maps engine ids to their transport handles and delivers messages to one,
//! several or all registered engines. Envelopes are routed by type alone
//! through a static table.

use std::collections::HashMap;
use std::sync::Arc;

use crossbridge_core::{
    BridgeResult, EngineTransport, Envelope, MessageType, SharedTimeSource, Timestamp,
};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Method envelopes are delivered under
pub const ENVELOPE_METHOD: &str = "onBluetoothMessage";

pub const SCANNER_ENGINE: &str = "bluetooth_scanner";
pub const CONNECTION_ENGINE: &str = "bluetooth_connection";
pub const DATA_EXCHANGE_ENGINE: &str = "bluetooth_data_exchange";

const DEVICE_UPDATE_GROUP: &[&str] = &[SCANNER_ENGINE, CONNECTION_ENGINE];

// ----------------------------------------------------------------------------
// Routing Table
// ----------------------------------------------------------------------------

/// Where an envelope of a given type goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Single(&'static str),
    Group(&'static [&'static str]),
    Broadcast,
}

/// Static routing table
pub fn route_target(message_type: MessageType) -> RouteTarget {
    match message_type {
        MessageType::ScanStarted | MessageType::ScanStopped | MessageType::ScanResult => {
            RouteTarget::Single(SCANNER_ENGINE)
        }
        MessageType::Connecting
        | MessageType::Connected
        | MessageType::Disconnecting
        | MessageType::Disconnected => RouteTarget::Single(CONNECTION_ENGINE),
        MessageType::DataReceived | MessageType::DataSent | MessageType::Notification => {
            RouteTarget::Single(DATA_EXCHANGE_ENGINE)
        }
        MessageType::DevicesUpdated => RouteTarget::Group(DEVICE_UPDATE_GROUP),
        MessageType::StateChanged | MessageType::Error | MessageType::Custom => {
            RouteTarget::Broadcast
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Records
// ----------------------------------------------------------------------------

struct ChannelRecord {
    transport: Arc<dyn EngineTransport>,
    message_count: u64,
    last_message_at: Option<Timestamp>,
}

/// Delivery statistics for one registered engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub message_count: u64,
    pub last_message_time: Option<Timestamp>,
    pub seconds_since_last_message: Option<u64>,
}

// ----------------------------------------------------------------------------
// Channel Router
// ----------------------------------------------------------------------------

/// Registry of engine transports with send, broadcast and group delivery
pub struct ChannelRouter {
    channels: DashMap<String, ChannelRecord>,
    time_source: SharedTimeSource,
}

impl ChannelRouter {
    pub fn new(time_source: SharedTimeSource) -> Self {
        Self {
            channels: DashMap::new(),
            time_source,
        }
    }

    /// Register a transport; replaces any previous registration and its statistics
    pub fn register(&self, engine_id: impl Into<String>, transport: Arc<dyn EngineTransport>) {
        let engine_id = engine_id.into();
        info!(
            "Registered channel {} for engine {}",
            transport.name(),
            engine_id
        );
        self.channels.insert(
            engine_id,
            ChannelRecord {
                transport,
                message_count: 0,
                last_message_at: None,
            },
        );
    }

    pub fn unregister(&self, engine_id: &str) -> bool {
        let removed = self.channels.remove(engine_id).is_some();
        if removed {
            info!("Unregistered channel for engine {}", engine_id);
        }
        removed
    }

    pub fn is_registered(&self, engine_id: &str) -> bool {
        self.channels.contains_key(engine_id)
    }

    /// Registered engine ids, sorted
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn transport(&self, engine_id: &str) -> Option<Arc<dyn EngineTransport>> {
        self.channels
            .get(engine_id)
            .map(|record| record.transport.clone())
    }

    /// Invoke `method` on one engine; `false` when it is not registered
    pub fn send(&self, engine_id: &str, method: &str, arguments: Value) -> bool {
        let now = self.time_source.now();
        // the shard guard is dropped before the transport runs
        let transport = match self.channels.get_mut(engine_id) {
            Some(mut record) => {
                record.message_count += 1;
                record.last_message_at = Some(now);
                record.transport.clone()
            }
            None => {
                warn!("No channel registered for engine {}", engine_id);
                return false;
            }
        };
        transport.post(method, arguments);
        debug!("Sent {} to engine {}", method, engine_id);
        true
    }

    /// Send to every registered engine; returns how many were reached
    pub fn broadcast(&self, method: &str, arguments: Value) -> usize {
        let ids = self.registered_ids();
        if ids.is_empty() {
            warn!("Broadcast of {} with no registered engines", method);
            return 0;
        }
        ids.iter()
            .filter(|id| self.send(id, method, arguments.clone()))
            .count()
    }

    /// Send to each listed engine in order; a missing engine does not stop the rest
    pub fn send_to_group<I, S>(&self, engine_ids: I, method: &str, arguments: Value) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        engine_ids
            .into_iter()
            .filter(|id| self.send(id.as_ref(), method, arguments.clone()))
            .count()
    }

    /// Deliver an envelope to the engines its type routes to
    pub fn route_by_type(&self, envelope: &Envelope) -> BridgeResult<usize> {
        let arguments = Value::String(envelope.to_json()?);
        let delivered = match route_target(envelope.message_type()) {
            RouteTarget::Single(engine_id) => {
                usize::from(self.send(engine_id, ENVELOPE_METHOD, arguments))
            }
            RouteTarget::Group(engine_ids) => {
                self.send_to_group(engine_ids.iter(), ENVELOPE_METHOD, arguments)
            }
            RouteTarget::Broadcast => self.broadcast(ENVELOPE_METHOD, arguments),
        };
        Ok(delivered)
    }

    /// Per-engine delivery statistics
    pub fn get_stats(&self) -> HashMap<String, ChannelStats> {
        let now = self.time_source.now();
        self.channels
            .iter()
            .map(|entry| {
                let record = entry.value();
                let stats = ChannelStats {
                    message_count: record.message_count,
                    last_message_time: record.last_message_at,
                    seconds_since_last_message: record
                        .last_message_at
                        .map(|at| (now - at) / 1000),
                };
                (entry.key().clone(), stats)
            })
            .collect()
    }
}
