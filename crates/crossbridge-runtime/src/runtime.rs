//! Runtime Builder API
//!
//! Assembles router, registry, optimizer, framing layer and coordinator into
//! one owned runtime so hosts never reach for process-wide singletons.

use std::sync::{Arc, Mutex, PoisonError};

use crossbridge_ble::{BleFramingLayer, FramingEvent};
use crossbridge_core::{
    BridgeConfig, BridgeError, BridgeResult, BundleLoader, EngineFactory, EngineTransport,
    Envelope, SharedTimeSource, SystemTimeSource,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info, Level};

use crate::bridge::{FlutterBridge, HybridBridge, ReactNativeBridge};
use crate::coordinator::BridgeCoordinator;
use crate::lifecycle::BridgeLifecycle;
use crate::optimizer::{OutboundMessageOptimizer, Priority};
use crate::pump::spawn_framing_pump;
use crate::registry::EngineRegistry;
use crate::router::ChannelRouter;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a [`BridgeRuntime`]
pub struct BridgeRuntimeBuilder {
    factory: Arc<dyn EngineFactory>,
    config: BridgeConfig,
    time_source: Option<SharedTimeSource>,
    log_level: Option<Level>,
}

impl BridgeRuntimeBuilder {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            config: BridgeConfig::default(),
            time_source: None,
            log_level: None,
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for engine idleness, channel statistics and envelope stamps
    pub fn with_time_source(mut self, time_source: SharedTimeSource) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Install a console subscriber at `level` when the runtime is built
    pub fn with_logging(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn with_no_logging(mut self) -> Self {
        self.log_level = None;
        self
    }

    pub fn build(self) -> BridgeResult<BridgeRuntime> {
        self.config.validate()?;

        if let Some(level) = self.log_level {
            // a subscriber installed by the host wins
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .try_init();
        }

        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemTimeSource::new()));
        let router = Arc::new(ChannelRouter::new(time_source.clone()));
        let registry = Arc::new(EngineRegistry::new(
            self.factory,
            router.clone(),
            time_source.clone(),
            self.config.registry.clone(),
        ));
        let optimizer = OutboundMessageOptimizer::new(
            router.clone(),
            self.config.optimizer.clone(),
            time_source.clone(),
        );
        let (framing, framing_events) = BleFramingLayer::new(self.config.framing.clone());

        info!("Bridge runtime built");
        Ok(BridgeRuntime {
            config: self.config,
            time_source,
            router,
            registry,
            optimizer,
            framing: Arc::new(framing),
            coordinator: Arc::new(BridgeCoordinator::new()),
            framing_events: Mutex::new(Some(framing_events)),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

// ----------------------------------------------------------------------------
// Bridge Runtime
// ----------------------------------------------------------------------------

/// Owner of every bridge component and the background tasks driving them
pub struct BridgeRuntime {
    config: BridgeConfig,
    time_source: SharedTimeSource,
    router: Arc<ChannelRouter>,
    registry: Arc<EngineRegistry>,
    optimizer: Arc<OutboundMessageOptimizer>,
    framing: Arc<BleFramingLayer>,
    coordinator: Arc<BridgeCoordinator>,
    framing_events: Mutex<Option<UnboundedReceiver<FramingEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeRuntime {
    pub fn builder(factory: Arc<dyn EngineFactory>) -> BridgeRuntimeBuilder {
        BridgeRuntimeBuilder::new(factory)
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Spawn the maintenance sweep and the framing pump; call once inside a tokio runtime
    pub fn start(&self) -> BridgeResult<()> {
        let events = self
            .framing_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BridgeError::config_error("runtime already started"))?;

        let registry_config = self.registry.config();
        self.track(self.registry.spawn_maintenance(
            registry_config.maintenance_interval,
            registry_config.max_idle,
        ));
        self.track(spawn_framing_pump(
            events,
            self.router.clone(),
            self.time_source.clone(),
        ));
        info!("Bridge runtime started");
        Ok(())
    }

    /// Flutter facade over the registry engine for `module_id`
    pub fn attach_flutter(
        &self,
        module_id: &str,
        entrypoint: Option<&str>,
    ) -> BridgeResult<Arc<FlutterBridge>> {
        self.registry.get_or_create(module_id, entrypoint)?;
        let transport = self
            .router
            .transport(module_id)
            .ok_or_else(BridgeError::not_available)?;
        let bridge = Arc::new(FlutterBridge::new(transport));
        self.coordinator.register(bridge.clone());
        Ok(bridge)
    }

    /// WebView facade over a page transport
    pub fn attach_hybrid(&self, transport: Arc<dyn EngineTransport>) -> Arc<HybridBridge> {
        let bridge = HybridBridge::new(transport, self.config.hybrid.clone());
        self.coordinator.register(bridge.clone());
        bridge
    }

    /// React Native facade with its own lifecycle and health monitor
    pub fn attach_react_native(&self, loader: Arc<dyn BundleLoader>) -> Arc<ReactNativeBridge> {
        let lifecycle = BridgeLifecycle::new(loader, self.config.lifecycle.clone());
        self.track(lifecycle.spawn_health_monitor(self.config.lifecycle.health_check_interval));
        let bridge = Arc::new(ReactNativeBridge::new(lifecycle));
        self.coordinator.register(bridge.clone());
        bridge
    }

    /// Route an envelope by its type right away
    pub fn route(&self, envelope: &Envelope) -> BridgeResult<usize> {
        self.router.route_by_type(envelope)
    }

    /// Send an envelope to one engine through the optimizer
    pub fn send(&self, envelope: Envelope, engine_id: &str, priority: Priority) {
        self.optimizer.send(envelope, engine_id, priority);
    }

    /// Abort background tasks, flush queued messages and release every engine
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        let flushed = self.optimizer.shutdown();
        let released = self.registry.release_all();
        info!(
            "Bridge runtime shut down ({} message(s) flushed, {} engine(s) released)",
            flushed, released
        );
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn optimizer(&self) -> &Arc<OutboundMessageOptimizer> {
        &self.optimizer
    }

    pub fn framing(&self) -> &Arc<BleFramingLayer> {
        &self.framing
    }

    pub fn coordinator(&self) -> &Arc<BridgeCoordinator> {
        &self.coordinator
    }

    pub fn time_source(&self) -> &SharedTimeSource {
        &self.time_source
    }
}
