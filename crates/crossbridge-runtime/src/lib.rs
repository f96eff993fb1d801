//! crossbridge runtime
//!
//! The native side of a multi-runtime app: a registry of embedded UI engines,
//! a router that addresses them by id or by message type, bridge facades with
//! one call/listen contract per technology stack, the React Native lifecycle
//! state machine and an optimizer that batches and debounces outbound traffic.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossbridge_core::{BridgeConfig, EngineFactory, Envelope, MessageType};
//! use crossbridge_runtime::{BridgeRuntime, Priority};
//!
//! # async fn example(factory: Arc<dyn EngineFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = BridgeRuntime::builder(factory)
//!     .with_config(BridgeConfig::default())
//!     .with_logging(tracing::Level::INFO)
//!     .build()?;
//! runtime.start()?;
//!
//! runtime.attach_flutter("bluetooth_scanner", Some("scannerMain"))?;
//! let envelope = Envelope::now(MessageType::ScanStarted, None);
//! runtime.send(envelope, "bluetooth_scanner", Priority::High);
//!
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod coordinator;
pub mod lifecycle;
pub mod optimizer;
pub mod pump;
pub mod registry;
pub mod router;
mod runtime;

pub use bridge::{Bridge, FlutterBridge, HybridBridge, HybridStatus, ReactNativeBridge};
pub use coordinator::BridgeCoordinator;
pub use lifecycle::{BridgeLifecycle, BridgeState};
pub use optimizer::{OptimizerStats, OutboundMessageOptimizer, Priority};
pub use pump::{framing_event_envelope, spawn_framing_pump};
pub use registry::{EngineInfo, EngineRegistry, EngineState};
pub use router::{route_target, ChannelRouter, ChannelStats, RouteTarget, ENVELOPE_METHOD};
pub use runtime::{BridgeRuntime, BridgeRuntimeBuilder};

// Re-export the layers below for convenience
pub use crossbridge_ble::{BleError, BleFramingLayer, FramingEvent};
pub use crossbridge_core::{BridgeConfig, BridgeError, BridgeResult, Envelope, MessageType};
