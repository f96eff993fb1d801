use std::sync::Arc;

use async_trait::async_trait;
use crossbridge_core::{BridgeError, BridgeResult, EventHandler, TechStack};
use serde_json::Value;
use tracing::debug;

use super::{native_event, Bridge, NATIVE_EVENT_METHOD};
use crate::lifecycle::BridgeLifecycle;

/// Facade over a React Native bridge; only usable while its lifecycle is `Ready`
pub struct ReactNativeBridge {
    lifecycle: Arc<BridgeLifecycle>,
}

impl ReactNativeBridge {
    pub fn new(lifecycle: Arc<BridgeLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<BridgeLifecycle> {
        &self.lifecycle
    }
}

#[async_trait]
impl Bridge for ReactNativeBridge {
    fn tech_stack(&self) -> TechStack {
        TechStack::ReactNative
    }

    fn is_available(&self) -> bool {
        self.lifecycle.is_ready()
    }

    async fn call_method(&self, method: &str, arguments: Value) -> BridgeResult<Value> {
        let transport = self
            .lifecycle
            .transport()
            .ok_or_else(BridgeError::not_available)?;
        debug!("React Native call {}", method);
        transport
            .invoke_method(method, arguments)
            .await
            .map_err(|e| BridgeError::method_failed(method, e.to_string()))
    }

    fn listen(&self, channel: &str, handler: EventHandler) -> BridgeResult<()> {
        let transport = self
            .lifecycle
            .transport()
            .ok_or_else(BridgeError::not_available)?;
        transport.listen(channel, handler);
        Ok(())
    }

    fn send_event(&self, channel: &str, data: Value) -> bool {
        match self.lifecycle.transport() {
            Some(transport) => {
                transport.post(NATIVE_EVENT_METHOD, native_event(channel, data));
                true
            }
            None => false,
        }
    }
}
