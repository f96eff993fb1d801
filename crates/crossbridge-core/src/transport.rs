//! Collaborator abstractions
//!
//! The bridge core never looks inside a UI runtime or the platform BLE stack.
//! Both are reached through the traits in this module, which hosts implement
//! over Flutter method channels, React Native bridges, WebView script handlers
//! or CoreBluetooth peripherals.

use crate::errors::{BridgeResult, TransportError};
use crate::types::PeerId;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback invoked once per inbound event on a listened channel
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

// ----------------------------------------------------------------------------
// Engine Transport
// ----------------------------------------------------------------------------

/// A method channel into one embedded UI runtime
#[async_trait]
pub trait EngineTransport: Send + Sync {
    /// Channel name, used only for diagnostics
    fn name(&self) -> &str;

    /// Invoke a method on the runtime and await its reply
    async fn invoke_method(&self, method: &str, arguments: Value) -> Result<Value, TransportError>;

    /// Invoke a method without waiting for a reply
    fn post(&self, method: &str, arguments: Value);

    /// Register a handler for events the runtime emits on `channel`
    fn listen(&self, channel: &str, handler: EventHandler);

    /// Whether the underlying runtime is still attached
    fn is_valid(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------------
// Engines
// ----------------------------------------------------------------------------

/// One live UI-runtime instance
pub trait EngineHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Open a named method channel on this engine
    fn open_channel(&self, name: &str) -> Result<Arc<dyn EngineTransport>, TransportError>;

    /// Tear the runtime down; further channel use is invalid
    fn destroy(&self);
}

/// Constructs engines on demand for the registry
pub trait EngineFactory: Send + Sync {
    fn make_engine(
        &self,
        module_id: &str,
        entrypoint: Option<&str>,
    ) -> BridgeResult<Arc<dyn EngineHandle>>;
}

// ----------------------------------------------------------------------------
// Bundle Loading
// ----------------------------------------------------------------------------

/// A successfully loaded script bundle and the bridge transport built from it
#[derive(Clone)]
pub struct BundleSource {
    pub bundle_url: String,
    pub transport: Arc<dyn EngineTransport>,
}

impl fmt::Debug for BundleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSource")
            .field("bundle_url", &self.bundle_url)
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Locates a script bundle and boots a bridge over it
#[async_trait]
pub trait BundleLoader: Send + Sync {
    /// Resolve the bundle; the error is a human readable failure reason
    async fn load(&self) -> Result<BundleSource, String>;
}

// ----------------------------------------------------------------------------
// BLE Peripheral
// ----------------------------------------------------------------------------

/// Acknowledgement mode of a characteristic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// A connected BLE peripheral as exposed by the platform stack
#[async_trait]
pub trait PeripheralTransport: Send + Sync {
    fn identifier(&self) -> PeerId;

    /// Largest single write the link accepts for `write_type`
    fn maximum_write_length(&self, write_type: WriteType) -> usize;

    async fn write(
        &self,
        data: &[u8],
        characteristic: Uuid,
        write_type: WriteType,
    ) -> Result<(), TransportError>;
}
