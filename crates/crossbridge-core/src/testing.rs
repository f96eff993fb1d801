//! Deterministic collaborators for tests
//!
//! Enabled with the `testing` feature. Every mock records what the bridge did
//! to it so tests can assert on calls instead of on side effects in a real
//! UI runtime or BLE stack.

use crate::errors::{BridgeError, BridgeResult, TransportError};
use crate::transport::{
    BundleLoader, BundleSource, EngineFactory, EngineHandle, EngineTransport, EventHandler,
    PeripheralTransport, WriteType,
};
use crate::types::{PeerId, TimeSource, Timestamp};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Manually advanced clock
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_at(start_millis: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.current_time
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Engine Transport
// ----------------------------------------------------------------------------

type PostHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Engine channel that records posts and invocations
pub struct RecordingTransport {
    name: String,
    posts: Mutex<Vec<(String, Value)>>,
    invocations: Mutex<Vec<(String, Value)>>,
    replies: Mutex<HashMap<String, Result<Value, TransportError>>>,
    listeners: Mutex<HashMap<String, Vec<EventHandler>>>,
    post_hook: Mutex<Option<PostHook>>,
    reply_delay: Mutex<Option<Duration>>,
    valid: AtomicBool,
}

impl RecordingTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            posts: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            post_hook: Mutex::new(None),
            reply_delay: Mutex::new(None),
            valid: AtomicBool::new(true),
        }
    }

    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Script the reply returned for `method`; unscripted methods reply `null`
    pub fn set_reply(&self, method: &str, reply: Result<Value, TransportError>) {
        lock(&self.replies).insert(method.to_string(), reply);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        *lock(&self.reply_delay) = Some(delay);
    }

    /// Run `hook` synchronously on every post, after it is recorded
    pub fn on_post(&self, hook: impl Fn(&str, &Value) + Send + Sync + 'static) {
        *lock(&self.post_hook) = Some(Arc::new(hook));
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        lock(&self.posts).clone()
    }

    /// Arguments of every post made with `method`
    pub fn posts_for(&self, method: &str) -> Vec<Value> {
        lock(&self.posts)
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn post_count(&self) -> usize {
        lock(&self.posts).len()
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        lock(&self.invocations).clone()
    }

    pub fn clear(&self) {
        lock(&self.posts).clear();
        lock(&self.invocations).clear();
    }

    /// Deliver an event to every handler listening on `channel`; returns how many ran
    pub fn emit(&self, channel: &str, event: Value) -> usize {
        let handlers = lock(&self.listeners)
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        lock(&self.listeners).get(channel).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EngineTransport for RecordingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke_method(&self, method: &str, arguments: Value) -> Result<Value, TransportError> {
        lock(&self.invocations).push((method.to_string(), arguments));
        let delay = *lock(&self.reply_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_valid() {
            return Err(TransportError::Closed);
        }
        lock(&self.replies)
            .get(method)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }

    fn post(&self, method: &str, arguments: Value) {
        lock(&self.posts).push((method.to_string(), arguments.clone()));
        let hook = lock(&self.post_hook).clone();
        if let Some(hook) = hook {
            hook(method, &arguments);
        }
    }

    fn listen(&self, channel: &str, handler: EventHandler) {
        lock(&self.listeners)
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Engines
// ----------------------------------------------------------------------------

/// Engine whose channels are [`RecordingTransport`]s
pub struct MockEngineHandle {
    id: String,
    entrypoint: Option<String>,
    channels: Mutex<Vec<Arc<RecordingTransport>>>,
    destroyed: AtomicBool,
    fail_channels: bool,
}

impl MockEngineHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entrypoint: None,
            channels: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            fail_channels: false,
        }
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> Vec<Arc<RecordingTransport>> {
        lock(&self.channels).clone()
    }

    /// Most recently opened channel
    pub fn channel(&self) -> Option<Arc<RecordingTransport>> {
        lock(&self.channels).last().cloned()
    }
}

impl EngineHandle for MockEngineHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn open_channel(&self, name: &str) -> Result<Arc<dyn EngineTransport>, TransportError> {
        if self.fail_channels || self.is_destroyed() {
            return Err(TransportError::ChannelUnavailable {
                channel: name.to_string(),
            });
        }
        let channel = RecordingTransport::shared(name);
        lock(&self.channels).push(channel.clone());
        Ok(channel)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        for channel in lock(&self.channels).iter() {
            channel.set_valid(false);
        }
    }
}

/// Factory producing [`MockEngineHandle`]s and remembering each one
#[derive(Default)]
pub struct MockEngineFactory {
    created: Mutex<Vec<Arc<MockEngineHandle>>>,
    fail_creation: AtomicBool,
    fail_channels: AtomicBool,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// New engines refuse to open channels
    pub fn set_fail_channels(&self, fail: bool) {
        self.fail_channels.store(fail, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    /// Every engine built for `module_id`, oldest first
    pub fn engines_for(&self, module_id: &str) -> Vec<Arc<MockEngineHandle>> {
        lock(&self.created)
            .iter()
            .filter(|engine| engine.id == module_id)
            .cloned()
            .collect()
    }

    pub fn last_engine(&self, module_id: &str) -> Option<Arc<MockEngineHandle>> {
        self.engines_for(module_id).pop()
    }
}

impl EngineFactory for MockEngineFactory {
    fn make_engine(
        &self,
        module_id: &str,
        entrypoint: Option<&str>,
    ) -> BridgeResult<Arc<dyn EngineHandle>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(BridgeError::engine_creation(module_id, "factory refused"));
        }
        let engine = Arc::new(MockEngineHandle {
            id: module_id.to_string(),
            entrypoint: entrypoint.map(str::to_string),
            channels: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            fail_channels: self.fail_channels.load(Ordering::SeqCst),
        });
        lock(&self.created).push(engine.clone());
        Ok(engine)
    }
}

// ----------------------------------------------------------------------------
// BLE Peripheral
// ----------------------------------------------------------------------------

/// One write captured by [`MockPeripheral`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub data: Vec<u8>,
    pub characteristic: Uuid,
    pub write_type: WriteType,
}

/// Peripheral with a fixed MTU that records writes
pub struct MockPeripheral {
    id: PeerId,
    mtu: usize,
    writes: Mutex<Vec<RecordedWrite>>,
    fail_writes: AtomicBool,
}

impl MockPeripheral {
    pub fn new(id: impl Into<PeerId>, mtu: usize) -> Self {
        Self {
            id: id.into(),
            mtu,
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn shared(id: impl Into<PeerId>, mtu: usize) -> Arc<Self> {
        Arc::new(Self::new(id, mtu))
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.writes).clone()
    }

    /// Writes made on `characteristic`, payload bytes only
    pub fn writes_on(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        lock(&self.writes)
            .iter()
            .filter(|write| write.characteristic == characteristic)
            .map(|write| write.data.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.writes).clear();
    }
}

#[async_trait]
impl PeripheralTransport for MockPeripheral {
    fn identifier(&self) -> PeerId {
        self.id.clone()
    }

    fn maximum_write_length(&self, _write_type: WriteType) -> usize {
        self.mtu
    }

    async fn write(
        &self,
        data: &[u8],
        characteristic: Uuid,
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed {
                peer_id: self.id.to_string(),
                reason: "mock write failure".to_string(),
            });
        }
        lock(&self.writes).push(RecordedWrite {
            data: data.to_vec(),
            characteristic,
            write_type,
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Bundle Loading
// ----------------------------------------------------------------------------

/// Loader that always yields the same outcome, optionally after a delay
pub struct StaticBundleLoader {
    outcome: Result<BundleSource, String>,
    delay: Option<Duration>,
    loads: AtomicUsize,
}

impl StaticBundleLoader {
    pub fn ok(bundle_url: impl Into<String>, transport: Arc<dyn EngineTransport>) -> Self {
        Self {
            outcome: Ok(BundleSource {
                bundle_url: bundle_url.into(),
                transport,
            }),
            delay: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(reason.into()),
            delay: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleLoader for StaticBundleLoader {
    async fn load(&self) -> Result<BundleSource, String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}
