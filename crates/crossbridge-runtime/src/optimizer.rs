//! Outbound Message Optimizer
//!
//! Cuts the number of cross-runtime hops for chatty BLE state. High priority
//! messages go out immediately. Normal priority messages are batched and
//! coalesced so only the newest message of each type reaches an engine. Low
//! priority messages are debounced per key with restart-on-activity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::{engine::general_purpose, Engine as _};
use crossbridge_core::{
    compress, BridgeResult, Envelope, MessageType, OptimizerConfig, Payload, SharedTimeSource,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::router::ChannelRouter;

/// Debounce identifier used by [`OutboundMessageOptimizer::batch_device_updates`]
pub const DEVICE_UPDATES_KEY: &str = "deviceUpdates";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Priorities and Statistics
// ----------------------------------------------------------------------------

/// Delivery policy for one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Sent immediately
    High,
    /// Batched and coalesced by type
    #[default]
    Normal,
    /// Debounced per engine and message type
    Low,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerStats {
    /// Messages handed to the router successfully
    pub delivered: u64,
    /// Messages the router could not deliver
    pub undeliverable: u64,
    /// Queued messages superseded by a newer one of the same type
    pub coalesced: u64,
    /// Debounced messages superseded before their window closed
    pub debounced: u64,
    pub compressed: u64,
    pub last_compression_ratio: Option<f64>,
}

// ----------------------------------------------------------------------------
// Internal State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BatchQueue {
    pending: HashMap<String, Vec<Envelope>>,
    flush_scheduled: bool,
}

struct Debouncer {
    token: u64,
    task: JoinHandle<()>,
}

/// Keep the newest message of each type, ordered by when that message was queued
fn coalesce(messages: Vec<Envelope>) -> Vec<Envelope> {
    let mut seen: HashSet<MessageType> = HashSet::new();
    let mut latest: Vec<Envelope> = messages
        .into_iter()
        .rev()
        .filter(|message| seen.insert(message.message_type()))
        .collect();
    latest.reverse();
    latest
}

// ----------------------------------------------------------------------------
// Optimizer
// ----------------------------------------------------------------------------

pub struct OutboundMessageOptimizer {
    router: Arc<ChannelRouter>,
    config: OptimizerConfig,
    time_source: SharedTimeSource,
    queue: Mutex<BatchQueue>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    debouncers: Mutex<HashMap<String, Debouncer>>,
    next_token: AtomicU64,
    stats: Mutex<OptimizerStats>,
}

impl OutboundMessageOptimizer {
    pub fn new(
        router: Arc<ChannelRouter>,
        config: OptimizerConfig,
        time_source: SharedTimeSource,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            config,
            time_source,
            queue: Mutex::new(BatchQueue::default()),
            flush_task: Mutex::new(None),
            debouncers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            stats: Mutex::new(OptimizerStats::default()),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Send `message` to `engine_id` under the given priority
    pub fn send(self: &Arc<Self>, message: Envelope, engine_id: &str, priority: Priority) {
        match priority {
            Priority::High => {
                self.deliver(&message, engine_id);
            }
            Priority::Normal => self.enqueue(message, engine_id),
            Priority::Low => {
                let identifier = message.message_type().as_str();
                self.send_debounced(message, engine_id, identifier);
            }
        }
    }

    fn enqueue(self: &Arc<Self>, message: Envelope, engine_id: &str) {
        let start_cycle = {
            let mut queue = lock(&self.queue);
            queue
                .pending
                .entry(engine_id.to_string())
                .or_default()
                .push(message);
            !std::mem::replace(&mut queue.flush_scheduled, true)
        };

        if start_cycle {
            let optimizer = Arc::clone(self);
            let task = tokio::spawn(async move { optimizer.run_flush_cycle().await });
            *lock(&self.flush_task) = Some(task);
        }
    }

    async fn run_flush_cycle(&self) {
        loop {
            tokio::time::sleep(self.config.batch_interval).await;

            let drained: Vec<(String, Vec<Envelope>)> =
                lock(&self.queue).pending.drain().collect();
            for (engine_id, messages) in drained {
                self.deliver_batch(&engine_id, messages);
            }

            let mut queue = lock(&self.queue);
            if queue.pending.values().all(Vec::is_empty) {
                queue.flush_scheduled = false;
                debug!("Flush cycle finished");
                break;
            }
        }
    }

    fn deliver_batch(&self, engine_id: &str, messages: Vec<Envelope>) -> usize {
        let queued = messages.len();
        let latest = coalesce(messages);
        let superseded = (queued - latest.len()) as u64;
        if superseded > 0 {
            lock(&self.stats).coalesced += superseded;
            debug!(
                "Coalesced {} of {} message(s) for {}",
                superseded, queued, engine_id
            );
        }
        latest
            .iter()
            .filter(|message| self.deliver(message, engine_id))
            .count()
    }

    /// Deliver `engine_id`'s queued messages now; returns how many were sent
    pub fn flush(&self, engine_id: &str) -> usize {
        let messages = lock(&self.queue)
            .pending
            .remove(engine_id)
            .unwrap_or_default();
        if messages.is_empty() {
            return 0;
        }
        self.deliver_batch(engine_id, messages)
    }

    /// Send `message` once no other message with the same key arrived for a full window
    pub fn send_debounced(self: &Arc<Self>, message: Envelope, engine_id: &str, identifier: &str) {
        let key = format!("{engine_id}_{identifier}");
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.debounce_interval;

        let optimizer: Weak<Self> = Arc::downgrade(self);
        let engine_id = engine_id.to_string();
        let task_key = key.clone();

        // the timer cannot fire until the new token is in place
        let mut debouncers = lock(&self.debouncers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(optimizer) = optimizer.upgrade() {
                optimizer.fire_debounced(&task_key, token, &message, &engine_id);
            }
        });
        if let Some(previous) = debouncers.insert(key, Debouncer { token, task }) {
            previous.task.abort();
            lock(&self.stats).debounced += 1;
        }
    }

    fn fire_debounced(&self, key: &str, token: u64, message: &Envelope, engine_id: &str) {
        {
            let mut debouncers = lock(&self.debouncers);
            match debouncers.get(key) {
                Some(current) if current.token == token => {
                    debouncers.remove(key);
                }
                _ => return,
            }
        }
        self.deliver(message, engine_id);
    }

    /// Debounced `DevicesUpdated` envelope carrying the full device list
    pub fn batch_device_updates(self: &Arc<Self>, devices: Vec<Value>, engine_id: &str) {
        let mut data = Payload::new();
        data.insert("devices".to_string(), Value::Array(devices));
        let message = Envelope::new(
            MessageType::DevicesUpdated,
            Some(data),
            self.time_source.now(),
        );
        self.send_debounced(message, engine_id, DEVICE_UPDATES_KEY);
    }

    fn deliver(&self, message: &Envelope, engine_id: &str) -> bool {
        let arguments = match self.encode(message) {
            Ok(arguments) => arguments,
            Err(e) => {
                error!(
                    "Failed to encode {} for {}: {}",
                    message.message_type(),
                    engine_id,
                    e
                );
                return false;
            }
        };

        let sent = self
            .router
            .send(engine_id, &self.config.delivery_method, arguments);
        let mut stats = lock(&self.stats);
        if sent {
            stats.delivered += 1;
        } else {
            stats.undeliverable += 1;
            warn!(
                "Dropped {} message for engine {}",
                message.message_type(),
                engine_id
            );
        }
        sent
    }

    /// Envelope JSON string, or a deflate wrapper once it crosses the threshold
    fn encode(&self, message: &Envelope) -> BridgeResult<Value> {
        let json = message.to_json()?;
        if !self.config.compression_enabled {
            return Ok(Value::String(json));
        }

        let payload = compress(json.as_bytes(), self.config.compression_threshold)?;
        if !payload.compressed {
            return Ok(Value::String(json));
        }

        let ratio = payload.ratio();
        debug!(
            "Compressed {} message {} -> {} bytes (ratio {:.2})",
            message.message_type(),
            payload.original_len,
            payload.bytes.len(),
            ratio
        );
        {
            let mut stats = lock(&self.stats);
            stats.compressed += 1;
            stats.last_compression_ratio = Some(ratio);
        }
        Ok(json!({
            "encoding": "deflate",
            "data": general_purpose::STANDARD.encode(&payload.bytes),
        }))
    }

    pub fn pending_count(&self, engine_id: &str) -> usize {
        lock(&self.queue).pending.get(engine_id).map_or(0, Vec::len)
    }

    /// Debounce windows currently open
    pub fn active_debouncers(&self) -> usize {
        lock(&self.debouncers).len()
    }

    pub fn stats(&self) -> OptimizerStats {
        lock(&self.stats).clone()
    }

    /// Cancel timers and deliver whatever is still queued; returns how many were sent
    pub fn shutdown(&self) -> usize {
        let cancelled: Vec<Debouncer> = lock(&self.debouncers)
            .drain()
            .map(|(_, debouncer)| debouncer)
            .collect();
        for debouncer in &cancelled {
            debouncer.task.abort();
        }
        if let Some(task) = lock(&self.flush_task).take() {
            task.abort();
        }

        let drained: Vec<(String, Vec<Envelope>)> = {
            let mut queue = lock(&self.queue);
            queue.flush_scheduled = false;
            queue.pending.drain().collect()
        };
        let delivered = drained
            .into_iter()
            .map(|(engine_id, messages)| self.deliver_batch(&engine_id, messages))
            .sum();
        debug!(
            "Optimizer shut down, {} timer(s) cancelled, {} message(s) flushed",
            cancelled.len(),
            delivered
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbridge_core::testing::{MockTimeSource, RecordingTransport};
    use crossbridge_core::{decompress, Timestamp};
    use std::time::Duration;

    const ENGINE: &str = "bluetooth_scanner";

    fn optimizer(
        config: OptimizerConfig,
    ) -> (Arc<OutboundMessageOptimizer>, Arc<RecordingTransport>) {
        let clock: SharedTimeSource = Arc::new(MockTimeSource::new_at(5_000));
        let router = Arc::new(ChannelRouter::new(clock.clone()));
        let transport = RecordingTransport::shared(ENGINE);
        router.register(ENGINE, transport.clone());
        (OutboundMessageOptimizer::new(router, config, clock), transport)
    }

    fn envelope(message_type: MessageType, count: u64) -> Envelope {
        Envelope::from_value(message_type, json!({ "count": count }), Timestamp::new(count))
    }

    fn delivered(transport: &RecordingTransport) -> Vec<Envelope> {
        transport
            .posts_for("onBatchBluetoothUpdate")
            .into_iter()
            .map(|value| Envelope::from_json(value.as_str().unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_coalesce_keeps_latest_per_type_in_order() {
        let kept = coalesce(vec![
            envelope(MessageType::ScanResult, 1),
            envelope(MessageType::StateChanged, 2),
            envelope(MessageType::ScanResult, 3),
        ]);
        assert_eq!(
            kept,
            vec![
                envelope(MessageType::StateChanged, 2),
                envelope(MessageType::ScanResult, 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_high_priority_is_immediate() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::Error, 1), ENGINE, Priority::High);

        assert_eq!(delivered(&transport), vec![envelope(MessageType::Error, 1)]);
        assert_eq!(optimizer.stats().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_types_each_survive_a_batch() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::ScanResult, 1), ENGINE, Priority::Normal);
        optimizer.send(envelope(MessageType::ScanStarted, 2), ENGINE, Priority::Normal);
        assert_eq!(optimizer.pending_count(ENGINE), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(delivered(&transport).len(), 2);
        assert_eq!(optimizer.pending_count(ENGINE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_during_delivery_start_another_round() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::ScanResult, 1), ENGINE, Priority::Normal);
        tokio::time::sleep(Duration::from_millis(60)).await;
        optimizer.send(envelope(MessageType::ScanResult, 2), ENGINE, Priority::Normal);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            delivered(&transport),
            vec![
                envelope(MessageType::ScanResult, 1),
                envelope(MessageType::ScanResult, 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_delivers_immediately() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::ScanResult, 1), ENGINE, Priority::Normal);
        optimizer.send(envelope(MessageType::ScanResult, 2), ENGINE, Priority::Normal);

        assert_eq!(optimizer.flush(ENGINE), 1);
        assert_eq!(delivered(&transport), vec![envelope(MessageType::ScanResult, 2)]);
        assert_eq!(optimizer.flush(ENGINE), 0);
        assert_eq!(optimizer.stats().coalesced, 1);
    }

    #[tokio::test]
    async fn test_large_payloads_are_deflated() {
        let (optimizer, transport) =
            optimizer(OptimizerConfig::testing().with_compression_threshold(64));
        let devices = vec!["AA:BB:CC:DD:EE:FF"; 40];
        let message = Envelope::from_value(
            MessageType::DevicesUpdated,
            json!({ "devices": devices }),
            Timestamp::new(1),
        );
        optimizer.send(message.clone(), ENGINE, Priority::High);

        let posted = transport.posts_for("onBatchBluetoothUpdate");
        assert_eq!(posted[0]["encoding"], "deflate");
        let bytes = general_purpose::STANDARD
            .decode(posted[0]["data"].as_str().unwrap())
            .unwrap();
        let json = String::from_utf8(decompress(&bytes).unwrap()).unwrap();
        assert_eq!(Envelope::from_json(&json).unwrap(), message);

        let stats = optimizer.stats();
        assert_eq!(stats.compressed, 1);
        assert!(stats.last_compression_ratio.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn test_compression_can_be_disabled() {
        let (optimizer, transport) = optimizer(
            OptimizerConfig::testing()
                .with_compression_threshold(1)
                .with_compression(false),
        );
        optimizer.send(envelope(MessageType::ScanResult, 1), ENGINE, Priority::High);
        assert!(transport.posts_for("onBatchBluetoothUpdate")[0].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_updates_are_debounced() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.batch_device_updates(vec![json!({ "id": "a" })], ENGINE);
        optimizer.batch_device_updates(vec![json!({ "id": "a" }), json!({ "id": "b" })], ENGINE);
        assert_eq!(optimizer.active_debouncers(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;

        let sent = delivered(&transport);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type(), MessageType::DevicesUpdated);
        assert_eq!(sent[0].field("devices").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(optimizer.active_debouncers(), 0);
        assert_eq!(optimizer.stats().debounced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeliverable_messages_are_counted() {
        let (optimizer, _transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::ScanResult, 1), "missing", Priority::High);
        assert_eq!(optimizer.stats().undeliverable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers_and_flushes_queue() {
        let (optimizer, transport) = optimizer(OptimizerConfig::testing());
        optimizer.send(envelope(MessageType::ScanResult, 1), ENGINE, Priority::Normal);
        optimizer.send(envelope(MessageType::StateChanged, 2), ENGINE, Priority::Low);

        assert_eq!(optimizer.shutdown(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(delivered(&transport), vec![envelope(MessageType::ScanResult, 1)]);
        assert_eq!(optimizer.active_debouncers(), 0);
    }
}
