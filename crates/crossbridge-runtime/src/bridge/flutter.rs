use std::sync::Arc;

use async_trait::async_trait;
use crossbridge_core::{BridgeError, BridgeResult, EngineTransport, EventHandler, TechStack};
use serde_json::Value;
use tracing::{debug, warn};

use super::{native_event, Bridge, NATIVE_EVENT_METHOD};

/// Facade over a Flutter engine's method channel
pub struct FlutterBridge {
    transport: Arc<dyn EngineTransport>,
}

impl FlutterBridge {
    pub fn new(transport: Arc<dyn EngineTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn EngineTransport> {
        &self.transport
    }
}

#[async_trait]
impl Bridge for FlutterBridge {
    fn tech_stack(&self) -> TechStack {
        TechStack::Flutter
    }

    fn is_available(&self) -> bool {
        self.transport.is_valid()
    }

    async fn call_method(&self, method: &str, arguments: Value) -> BridgeResult<Value> {
        if !self.is_available() {
            return Err(BridgeError::not_available());
        }
        debug!("Flutter call {} on {}", method, self.transport.name());
        self.transport
            .invoke_method(method, arguments)
            .await
            .map_err(|e| BridgeError::method_failed(method, e.to_string()))
    }

    fn listen(&self, channel: &str, handler: EventHandler) -> BridgeResult<()> {
        if !self.is_available() {
            return Err(BridgeError::not_available());
        }
        self.transport.listen(channel, handler);
        Ok(())
    }

    fn send_event(&self, channel: &str, data: Value) -> bool {
        if !self.is_available() {
            warn!("Dropping event {} for detached Flutter engine", channel);
            return false;
        }
        self.transport
            .post(NATIVE_EVENT_METHOD, native_event(channel, data));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbridge_core::testing::RecordingTransport;
    use crossbridge_core::TransportError;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_call_returns_runtime_reply() {
        let transport = RecordingTransport::shared("flutter");
        transport.set_reply("getDevices", Ok(json!(["a", "b"])));
        let bridge = FlutterBridge::new(transport.clone());

        let reply = bridge.call_method("getDevices", json!({"limit": 2})).await;
        assert_eq!(reply.unwrap(), json!(["a", "b"]));
        assert_eq!(
            transport.invocations(),
            vec![("getDevices".to_string(), json!({"limit": 2}))]
        );
    }

    #[tokio::test]
    async fn test_transport_error_becomes_method_failure() {
        let transport = RecordingTransport::shared("flutter");
        transport.set_reply(
            "connect",
            Err(TransportError::InvokeFailed {
                method: "connect".into(),
                reason: "no such device".into(),
            }),
        );
        let bridge = FlutterBridge::new(transport);

        match bridge.call_method("connect", Value::Null).await {
            Err(BridgeError::MethodCallFailed { method, reason }) => {
                assert_eq!(method, "connect");
                assert!(reason.contains("no such device"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detached_engine_is_not_available() {
        let transport = RecordingTransport::shared("flutter");
        transport.set_valid(false);
        let bridge = FlutterBridge::new(transport.clone());

        let result = bridge.call_method("ping", Value::Null).await;
        assert!(matches!(result, Err(BridgeError::BridgeNotAvailable)));
        assert!(!bridge.send_event("scan", json!({})));
        assert!(transport.invocations().is_empty());
    }

    #[test]
    fn test_events_flow_both_ways() {
        let transport = RecordingTransport::shared("flutter");
        let bridge = FlutterBridge::new(transport.clone());
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        bridge
            .listen(
                "scanEvents",
                Arc::new(move |event| sink.lock().unwrap().push(event)),
            )
            .unwrap();
        transport.emit("scanEvents", json!({"rssi": -60}));
        assert_eq!(*received.lock().unwrap(), vec![json!({"rssi": -60})]);

        assert!(bridge.send_event("state", json!("poweredOn")));
        assert_eq!(
            transport.posts_for(NATIVE_EVENT_METHOD),
            vec![json!({"channel": "state", "data": "poweredOn"})]
        );
    }
}
