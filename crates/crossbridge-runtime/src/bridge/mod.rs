//! Bridge facades
//!
//! One uniform call/listen contract over each embedded UI runtime's native
//! transport. Callers hold an `Arc<dyn Bridge>` and never learn whether the
//! other side is a Flutter engine, a WebView page or a React Native bridge.

use async_trait::async_trait;
use crossbridge_core::{BridgeResult, EventHandler, TechStack};
use serde_json::Value;

pub mod flutter;
pub mod hybrid;
pub mod react_native;

pub use flutter::FlutterBridge;
pub use hybrid::{HybridBridge, HybridStatus};
pub use react_native::ReactNativeBridge;

/// Method a runtime receives native events on, with `{ channel, data }`
pub const NATIVE_EVENT_METHOD: &str = "receiveNativeEvent";

/// Method used to hand data from one runtime to another
pub const SHARED_DATA_METHOD: &str = "receiveSharedData";

#[async_trait]
pub trait Bridge: Send + Sync {
    fn tech_stack(&self) -> TechStack;

    /// Whether calls can currently reach the runtime
    fn is_available(&self) -> bool;

    /// Invoke a method in the runtime and await its reply
    async fn call_method(&self, method: &str, arguments: Value) -> BridgeResult<Value>;

    /// Invoke `handler` for every event the runtime emits on `channel`
    fn listen(&self, channel: &str, handler: EventHandler) -> BridgeResult<()>;

    /// Push an event into the runtime; `false` when it could not be posted
    fn send_event(&self, channel: &str, data: Value) -> bool;
}

pub(crate) fn native_event(channel: &str, data: Value) -> Value {
    serde_json::json!({ "channel": channel, "data": data })
}
