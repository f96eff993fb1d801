//! WebView JS bridge
//!
//! Calls are posted into the page as `window.<method>(params, callbackId)` and
//! resolved when the page posts a `methodCallback` message back to the script
//! message handler. Page events and page logs arrive on the same handler.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use crossbridge_core::{
    BridgeError, BridgeResult, EngineTransport, EventHandler, HybridConfig, TechStack,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{native_event, Bridge, NATIVE_EVENT_METHOD, SHARED_DATA_METHOD};

/// Page function that receives data shared from another runtime
const RECEIVE_NATIVE_DATA: &str = "receiveNativeData";
/// Local event fired when shared data arrives
const DATA_RECEIVED_EVENT: &str = "dataReceived";

type CallbackSender = oneshot::Sender<Result<Value, String>>;

// ----------------------------------------------------------------------------
// Script Messages
// ----------------------------------------------------------------------------

/// Messages the page posts to the native script message handler
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ScriptMessage {
    #[serde(rename_all = "camelCase")]
    MethodCallback {
        callback_id: String,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        event_name: String,
        #[serde(default)]
        data: Value,
    },
    Log {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Diagnostic snapshot of a hybrid bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridStatus {
    pub available: bool,
    pub active_event_handlers: usize,
    pub pending_callbacks: usize,
}

// ----------------------------------------------------------------------------
// Hybrid Bridge
// ----------------------------------------------------------------------------

pub struct HybridBridge {
    transport: Arc<dyn EngineTransport>,
    config: HybridConfig,
    pending: DashMap<String, CallbackSender>,
    event_handlers: DashMap<String, EventHandler>,
}

impl HybridBridge {
    /// Attach to a page transport and start listening on its script message handler
    pub fn new(transport: Arc<dyn EngineTransport>, config: HybridConfig) -> Arc<Self> {
        let bridge = Arc::new(Self {
            transport: transport.clone(),
            config,
            pending: DashMap::new(),
            event_handlers: DashMap::new(),
        });

        let weak: Weak<Self> = Arc::downgrade(&bridge);
        transport.listen(
            &bridge.config.handler_name,
            Arc::new(move |message| {
                if let Some(bridge) = weak.upgrade() {
                    bridge.handle_script_message(message);
                }
            }),
        );
        info!(
            "Hybrid bridge listening on handler {}",
            bridge.config.handler_name
        );
        bridge
    }

    /// Dispatch one message posted by the page
    pub fn handle_script_message(&self, message: Value) {
        let message: ScriptMessage = match serde_json::from_value(message) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unrecognized web message: {}", e);
                return;
            }
        };

        match message {
            ScriptMessage::MethodCallback {
                callback_id,
                result,
                error,
            } => {
                let Some((_, sender)) = self.pending.remove(&callback_id) else {
                    debug!("Late or unknown callback {} ignored", callback_id);
                    return;
                };
                let outcome = match error {
                    Some(reason) => Err(reason),
                    None => Ok(result),
                };
                // the caller may have stopped waiting
                let _ = sender.send(outcome);
            }
            ScriptMessage::Event { event_name, data } => self.dispatch_event(&event_name, data),
            ScriptMessage::Log { level, message } => {
                let message = message.unwrap_or_else(|| "Unknown log".to_string());
                match level.as_deref() {
                    Some("error") => error!(target: "web", "{}", message),
                    Some("warn") => warn!(target: "web", "{}", message),
                    Some("debug") => debug!(target: "web", "{}", message),
                    _ => info!(target: "web", "{}", message),
                }
            }
        }
    }

    fn dispatch_event(&self, event_name: &str, data: Value) {
        // clone out of the map so the handler may call back into the bridge
        let handler = self
            .event_handlers
            .get(event_name)
            .map(|entry| entry.value().clone());
        match handler {
            Some(handler) => handler(data),
            None => debug!("No handler for web event {}", event_name),
        }
    }

    /// Forward shared data to the page and notify local listeners
    fn receive_shared_data(&self, arguments: Value) -> BridgeResult<Value> {
        let (Some(data), Some(source)) = (
            arguments.get("data").filter(|data| data.is_object()),
            arguments
                .get("source")
                .and_then(Value::as_str)
                .and_then(TechStack::from_name),
        ) else {
            return Err(BridgeError::invalid_arguments(
                "receiveSharedData needs an object `data` and a known `source` stack",
            ));
        };
        let source = source.as_str();

        info!("Hybrid received shared data from {}", source);
        self.transport.post(
            RECEIVE_NATIVE_DATA,
            json!({ "data": data, "source": source }),
        );
        self.dispatch_event(
            DATA_RECEIVED_EVENT,
            json!({ "data": data, "source": source }),
        );
        Ok(json!({ "received": true }))
    }

    pub fn status(&self) -> HybridStatus {
        HybridStatus {
            available: self.is_available(),
            active_event_handlers: self.event_handlers.len(),
            pending_callbacks: self.pending.len(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }
}

#[async_trait]
impl Bridge for HybridBridge {
    fn tech_stack(&self) -> TechStack {
        TechStack::Hybrid
    }

    fn is_available(&self) -> bool {
        self.transport.is_valid()
    }

    async fn call_method(&self, method: &str, arguments: Value) -> BridgeResult<Value> {
        if !self.is_available() {
            return Err(BridgeError::not_available());
        }
        if method == SHARED_DATA_METHOD {
            return self.receive_shared_data(arguments);
        }

        let callback_id = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(callback_id.clone(), sender);
        self.transport.post(
            method,
            json!({ "params": arguments, "callbackId": callback_id }),
        );

        match tokio::time::timeout(self.config.call_timeout, receiver).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(BridgeError::method_failed(method, reason)),
            Ok(Err(_)) => Err(BridgeError::method_failed(method, "callback dropped")),
            Err(_) => {
                // stop waiting; a reply arriving later finds no pending entry
                self.pending.remove(&callback_id);
                warn!("Web method {} timed out", method);
                let duration_ms =
                    u64::try_from(self.config.call_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(BridgeError::timeout(duration_ms))
            }
        }
    }

    fn listen(&self, channel: &str, handler: EventHandler) -> BridgeResult<()> {
        self.event_handlers.insert(channel.to_string(), handler);
        debug!("Hybrid listening to event {}", channel);
        Ok(())
    }

    fn send_event(&self, channel: &str, data: Value) -> bool {
        if !self.is_available() {
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
    use std::sync::Mutex;

    fn bridge() -> (Arc<HybridBridge>, Arc<RecordingTransport>) {
        let transport = RecordingTransport::shared("webview");
        let bridge = HybridBridge::new(transport.clone(), HybridConfig::testing());
        (bridge, transport)
    }

    /// Page stub that answers every call through the script handler
    fn answer_with(
        transport: &Arc<RecordingTransport>,
        reply: impl Fn(&str) -> Value + Send + Sync + 'static,
    ) {
        let page = transport.clone();
        transport.on_post(move |_method, arguments| {
            if let Some(callback_id) = arguments.get("callbackId").and_then(Value::as_str) {
                let mut message = reply(callback_id);
                message["type"] = json!("methodCallback");
                message["callbackId"] = json!(callback_id);
                page.emit("nativeBridge", message);
            }
        });
    }

    #[test]
    fn test_listens_on_handler_name() {
        let (_bridge, transport) = bridge();
        assert_eq!(transport.listener_count("nativeBridge"), 1);
    }

    #[tokio::test]
    async fn test_call_resolves_from_callback() {
        let (bridge, transport) = bridge();
        answer_with(&transport, |_| json!({ "result": { "items": 3 } }));

        let reply = bridge
            .call_method("getProductList", json!({ "category": "ble" }))
            .await
            .unwrap();

        assert_eq!(reply, json!({ "items": 3 }));
        let posted = transport.posts_for("getProductList");
        assert_eq!(posted[0]["params"], json!({ "category": "ble" }));
        assert_eq!(bridge.status().pending_callbacks, 0);
    }

    #[tokio::test]
    async fn test_callback_error_becomes_method_failure() {
        let (bridge, transport) = bridge();
        answer_with(&transport, |_| json!({ "error": "payment declined" }));

        match bridge.call_method("processPayment", json!({})).await {
            Err(BridgeError::MethodCallFailed { method, reason }) => {
                assert_eq!(method, "processPayment");
                assert_eq!(reason, "payment declined");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out_and_late_reply_is_ignored() {
        let (bridge, transport) = bridge();

        let result = bridge.call_method("slowMethod", json!({})).await;
        assert!(matches!(
            result,
            Err(BridgeError::CommunicationTimeout { duration_ms: 200 })
        ));
        assert_eq!(bridge.status().pending_callbacks, 0);

        let callback_id = transport.posts_for("slowMethod")[0]["callbackId"].clone();
        transport.emit(
            "nativeBridge",
            json!({ "type": "methodCallback", "callbackId": callback_id, "result": 1 }),
        );
        assert_eq!(bridge.status().pending_callbacks, 0);
    }

    #[test]
    fn test_page_events_reach_listeners() {
        let (bridge, transport) = bridge();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge
            .listen("cartUpdated", Arc::new(move |data| sink.lock().unwrap().push(data)))
            .unwrap();

        transport.emit(
            "nativeBridge",
            json!({ "type": "event", "eventName": "cartUpdated", "data": { "count": 2 } }),
        );
        transport.emit("nativeBridge", json!({ "type": "log", "level": "warn", "message": "hi" }));
        transport.emit("nativeBridge", json!({ "type": "mystery" }));

        assert_eq!(*seen.lock().unwrap(), vec![json!({ "count": 2 })]);
        assert_eq!(bridge.status().active_event_handlers, 1);
    }

    #[tokio::test]
    async fn test_shared_data_is_handled_natively() {
        let (bridge, transport) = bridge();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge
            .listen("dataReceived", Arc::new(move |data| sink.lock().unwrap().push(data)))
            .unwrap();

        let reply = bridge
            .call_method(
                SHARED_DATA_METHOD,
                json!({ "data": { "user": "ada" }, "source": "flutter" }),
            )
            .await
            .unwrap();

        assert_eq!(reply, json!({ "received": true }));
        assert_eq!(
            transport.posts_for(RECEIVE_NATIVE_DATA),
            vec![json!({ "data": { "user": "ada" }, "source": "flutter" })]
        );
        assert_eq!(seen.lock().unwrap().len(), 1);

        let bad = bridge
            .call_method(SHARED_DATA_METHOD, json!({ "data": 1 }))
            .await;
        assert!(matches!(bad, Err(BridgeError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_shared_data_from_unknown_stack_is_rejected() {
        let (bridge, transport) = bridge();

        let result = bridge
            .call_method(
                SHARED_DATA_METHOD,
                json!({ "data": { "user": "ada" }, "source": "xamarin" }),
            )
            .await;

        assert!(matches!(result, Err(BridgeError::InvalidArguments { .. })));
        assert!(transport.posts_for(RECEIVE_NATIVE_DATA).is_empty());
    }

    #[test]
    fn test_send_event_posts_to_page() {
        let (bridge, transport) = bridge();
        assert!(bridge.send_event("scanState", json!(true)));
        assert_eq!(
            transport.posts_for(NATIVE_EVENT_METHOD),
            vec![json!({ "channel": "scanState", "data": true })]
        );
    }
}
