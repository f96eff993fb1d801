//! Bridge Lifecycle State Machine
//!
//! Tracks whether a bundle-backed bridge can take calls. Load failures and
//! health check failures never surface as errors; they are states, observable
//! through [`BridgeLifecycle::state`], [`BridgeLifecycle::watch`] and
//! [`BridgeLifecycle::subscribe`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crossbridge_core::{BundleLoader, BundleSource, EngineTransport, LifecycleConfig};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Method posted to the runtime on reload
const RELOAD_METHOD: &str = "reload";

// ----------------------------------------------------------------------------
// Bridge State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    NotInitialized,
    Initializing,
    Ready,
    Failed(String),
    Invalidated,
}

impl BridgeState {
    pub fn is_ready(&self) -> bool {
        matches!(self, BridgeState::Ready)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::NotInitialized => write!(f, "notInitialized"),
            BridgeState::Initializing => write!(f, "initializing"),
            BridgeState::Ready => write!(f, "ready"),
            BridgeState::Failed(reason) => write!(f, "failed({reason})"),
            BridgeState::Invalidated => write!(f, "invalidated"),
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

struct LifecycleInner {
    state: BridgeState,
    bundle_url: Option<String>,
    transport: Option<Arc<dyn EngineTransport>>,
    /// Bumped by every initialize and cleanup; stale loads compare against it
    generation: u64,
}

pub struct BridgeLifecycle {
    loader: Arc<dyn BundleLoader>,
    config: LifecycleConfig,
    inner: Mutex<LifecycleInner>,
    state_tx: watch::Sender<BridgeState>,
    events: broadcast::Sender<BridgeState>,
}

impl BridgeLifecycle {
    pub fn new(loader: Arc<dyn BundleLoader>, config: LifecycleConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(BridgeState::NotInitialized);
        let (events, _) = broadcast::channel(config.state_channel_capacity.max(1));
        Arc::new(Self {
            loader,
            config,
            inner: Mutex::new(LifecycleInner {
                state: BridgeState::NotInitialized,
                bundle_url: None,
                transport: None,
                generation: 0,
            }),
            state_tx,
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut LifecycleInner, state: BridgeState) {
        info!("Bridge state {} -> {}", inner.state, state);
        inner.state = state.clone();
        self.state_tx.send_replace(state.clone());
        // no subscribers is fine
        let _ = self.events.send(state);
    }

    /// Start loading the bundle; `false` unless the bridge is `NotInitialized`
    pub fn initialize(self: &Arc<Self>) -> bool {
        let generation = {
            let mut inner = self.lock();
            if inner.state != BridgeState::NotInitialized {
                info!("Initialize ignored while bridge is {}", inner.state);
                return false;
            }
            inner.generation += 1;
            self.transition(&mut inner, BridgeState::Initializing);
            inner.generation
        };

        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = lifecycle.loader.load().await;
            lifecycle.complete_load(generation, outcome);
        });
        true
    }

    fn complete_load(&self, generation: u64, outcome: Result<BundleSource, String>) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != BridgeState::Initializing {
            debug!(
                "Discarding bundle load from generation {} (now {}, {})",
                generation, inner.generation, inner.state
            );
            return;
        }
        match outcome {
            Ok(source) => {
                info!("Bundle loaded from {}", source.bundle_url);
                inner.bundle_url = Some(source.bundle_url);
                inner.transport = Some(source.transport);
                self.transition(&mut inner, BridgeState::Ready);
            }
            Err(reason) => {
                warn!("Bundle load failed: {}", reason);
                self.transition(&mut inner, BridgeState::Failed(reason));
            }
        }
    }

    /// Ask a ready runtime to reload its bundle
    pub fn reload(&self) -> bool {
        let inner = self.lock();
        match (&inner.state, &inner.transport) {
            (BridgeState::Ready, Some(transport)) => {
                info!("Reloading bridge bundle");
                transport.post(RELOAD_METHOD, Value::Null);
                true
            }
            _ => {
                info!("Reload ignored while bridge is {}", inner.state);
                false
            }
        }
    }

    /// Drop the transport and return to `NotInitialized`
    pub fn cleanup(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == BridgeState::NotInitialized {
            debug!("Cleanup ignored, bridge not initialized");
            return false;
        }
        inner.generation += 1;
        inner.transport = None;
        inner.bundle_url = None;
        self.transition(&mut inner, BridgeState::NotInitialized);
        true
    }

    /// Wait until the bridge is `Ready`; `false` on timeout
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut receiver = self.state_tx.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, receiver.wait_for(BridgeState::is_ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// [`wait_for_ready`](Self::wait_for_ready) with the configured `ready_timeout`
    pub async fn wait_until_ready(&self) -> bool {
        self.wait_for_ready(self.config.ready_timeout).await
    }

    /// Check the bridge can take calls; any failure invalidates it
    pub fn perform_health_check(&self) -> bool {
        let mut inner = self.lock();
        let failure = match &inner.transport {
            None => Some("no transport".to_string()),
            Some(transport) if !transport.is_valid() => Some("transport invalid".to_string()),
            Some(_) if inner.state != BridgeState::Ready => {
                Some(format!("state is {}", inner.state))
            }
            Some(_) if inner.bundle_url.is_none() => Some("bundle URL missing".to_string()),
            Some(_) => None,
        };

        match failure {
            None => {
                debug!("Health check passed");
                true
            }
            Some(reason) => {
                warn!("Health check failed: {}", reason);
                if inner.state != BridgeState::Invalidated {
                    self.transition(&mut inner, BridgeState::Invalidated);
                }
                false
            }
        }
    }

    /// Clean up, wait `reinitialize_delay`, then initialize again
    pub async fn force_reinitialize(self: &Arc<Self>) -> bool {
        info!("Forcing bridge reinitialization");
        self.cleanup();
        tokio::time::sleep(self.config.reinitialize_delay).await;
        self.initialize()
    }

    /// Run the health check every `interval` while the bridge is `Ready`
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let lifecycle: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(lifecycle) = lifecycle.upgrade() else {
                    break;
                };
                if lifecycle.state().is_ready() {
                    lifecycle.perform_health_check();
                }
            }
        })
    }

    pub fn state(&self) -> BridgeState {
        self.lock().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().state.is_ready()
    }

    /// Transport of a `Ready` bridge
    pub fn transport(&self) -> Option<Arc<dyn EngineTransport>> {
        let inner = self.lock();
        if inner.state.is_ready() {
            inner.transport.clone()
        } else {
            None
        }
    }

    pub fn bundle_url(&self) -> Option<String> {
        self.lock().bundle_url.clone()
    }

    /// Every state written from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeState> {
        self.events.subscribe()
    }

    /// Latest state, updated in place
    pub fn watch(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbridge_core::testing::{RecordingTransport, StaticBundleLoader};

    fn ready_loader() -> (Arc<StaticBundleLoader>, Arc<RecordingTransport>) {
        let transport = RecordingTransport::shared("rn");
        let loader = Arc::new(StaticBundleLoader::ok(
            "file:///main.jsbundle",
            transport.clone(),
        ));
        (loader, transport)
    }

    #[tokio::test]
    async fn test_successful_load_reaches_ready() {
        let (loader, _transport) = ready_loader();
        let lifecycle = BridgeLifecycle::new(loader, LifecycleConfig::testing());
        let mut events = lifecycle.subscribe();

        assert!(lifecycle.initialize());
        assert!(lifecycle.wait_for_ready(Duration::from_secs(1)).await);

        assert_eq!(events.recv().await.unwrap(), BridgeState::Initializing);
        assert_eq!(events.recv().await.unwrap(), BridgeState::Ready);
        assert_eq!(
            lifecycle.bundle_url().as_deref(),
            Some("file:///main.jsbundle")
        );
        assert!(lifecycle.perform_health_check());
    }

    #[tokio::test]
    async fn test_reload_only_when_ready() {
        let (loader, transport) = ready_loader();
        let lifecycle = BridgeLifecycle::new(loader, LifecycleConfig::testing());
        assert!(!lifecycle.reload());

        lifecycle.initialize();
        lifecycle.wait_for_ready(Duration::from_secs(1)).await;
        assert!(lifecycle.reload());
        assert_eq!(transport.posts_for(RELOAD_METHOD).len(), 1);
        assert_eq!(lifecycle.state(), BridgeState::Ready);
    }

    #[tokio::test]
    async fn test_cleanup_returns_to_not_initialized() {
        let (loader, _transport) = ready_loader();
        let lifecycle = BridgeLifecycle::new(loader, LifecycleConfig::testing());
        assert!(!lifecycle.cleanup());

        lifecycle.initialize();
        lifecycle.wait_for_ready(Duration::from_secs(1)).await;
        assert!(lifecycle.cleanup());
        assert_eq!(lifecycle.state(), BridgeState::NotInitialized);
        assert!(lifecycle.transport().is_none());
        assert!(lifecycle.bundle_url().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_finishing_after_cleanup_is_discarded() {
        let transport = RecordingTransport::shared("rn");
        let loader = Arc::new(
            StaticBundleLoader::ok("file:///main.jsbundle", transport)
                .with_delay(Duration::from_millis(200)),
        );
        let lifecycle = BridgeLifecycle::new(loader, LifecycleConfig::testing());

        lifecycle.initialize();
        assert!(lifecycle.cleanup());
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(lifecycle.state(), BridgeState::NotInitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reinitialize_loads_again() {
        let (loader, _transport) = ready_loader();
        let lifecycle = BridgeLifecycle::new(loader.clone(), LifecycleConfig::testing());
        lifecycle.initialize();
        lifecycle.wait_for_ready(Duration::from_secs(1)).await;

        assert!(lifecycle.force_reinitialize().await);
        assert!(lifecycle.wait_for_ready(Duration::from_secs(1)).await);
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_invalidates_detached_bridge() {
        let (loader, transport) = ready_loader();
        let lifecycle = BridgeLifecycle::new(loader, LifecycleConfig::testing());
        lifecycle.initialize();
        lifecycle.wait_for_ready(Duration::from_secs(1)).await;

        let monitor = lifecycle.spawn_health_monitor(Duration::from_millis(100));
        transport.set_valid(false);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(lifecycle.state(), BridgeState::Invalidated);
        monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_uses_configured_timeout() {
        let loader = Arc::new(StaticBundleLoader::failing("bundle not found"));
        let config = LifecycleConfig::testing().with_ready_timeout(Duration::from_millis(300));
        let lifecycle = BridgeLifecycle::new(loader, config);
        lifecycle.initialize();

        let started = tokio::time::Instant::now();
        assert!(!lifecycle.wait_until_ready().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            BridgeState::Failed("bundle not found".into()).to_string(),
            "failed(bundle not found)"
        );
        assert_eq!(BridgeState::NotInitialized.to_string(), "notInitialized");
    }
}
