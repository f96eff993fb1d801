//! Engine Registry
//!
//! Owns one embedded UI runtime per module id, creating them lazily through an
//! [`EngineFactory`] and evicting the ones nobody has touched for a while.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crossbridge_core::{
    BridgeResult, EngineFactory, EngineHandle, RegistryConfig, SharedTimeSource, Timestamp,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::router::ChannelRouter;

// ----------------------------------------------------------------------------
// Engine Records
// ----------------------------------------------------------------------------

/// Usage state of a cached engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Preloaded, not yet handed out
    Idle,
    Active,
    Paused,
}

struct EngineRecord {
    handle: Arc<dyn EngineHandle>,
    entrypoint: Option<String>,
    channel_name: String,
    state: EngineState,
    created_at: Timestamp,
    last_used_at: Timestamp,
}

/// Read-only view of one cached engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub module_id: String,
    pub entrypoint: Option<String>,
    pub channel_name: String,
    pub state: EngineState,
    pub created_at: Timestamp,
    pub last_used_at: Timestamp,
}

impl EngineInfo {
    fn from_record(module_id: &str, record: &EngineRecord) -> Self {
        Self {
            module_id: module_id.to_string(),
            entrypoint: record.entrypoint.clone(),
            channel_name: record.channel_name.clone(),
            state: record.state,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Registry
// ----------------------------------------------------------------------------

/// Cache of live engines keyed by module id
pub struct EngineRegistry {
    engines: Mutex<HashMap<String, EngineRecord>>,
    factory: Arc<dyn EngineFactory>,
    router: Arc<ChannelRouter>,
    time_source: SharedTimeSource,
    config: RegistryConfig,
}

impl EngineRegistry {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        router: Arc<ChannelRouter>,
        time_source: SharedTimeSource,
        config: RegistryConfig,
    ) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            factory,
            router,
            time_source,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, EngineRecord>> {
        self.engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached engine for `module_id`, creating it on first use
    pub fn get_or_create(
        &self,
        module_id: &str,
        entrypoint: Option<&str>,
    ) -> BridgeResult<Arc<dyn EngineHandle>> {
        self.obtain(module_id, entrypoint, EngineState::Active)
    }

    /// Create an engine ahead of use; it stays `Idle` until first handed out
    pub fn preload(&self, module_id: &str, entrypoint: Option<&str>) -> BridgeResult<()> {
        self.obtain(module_id, entrypoint, EngineState::Idle)
            .map(|_| ())
    }

    fn obtain(
        &self,
        module_id: &str,
        entrypoint: Option<&str>,
        state: EngineState,
    ) -> BridgeResult<Arc<dyn EngineHandle>> {
        let now = self.time_source.now();
        // held across creation so concurrent callers share one engine
        let mut engines = self.lock();

        if let Some(record) = engines.get_mut(module_id) {
            if state == EngineState::Active {
                record.last_used_at = now;
                record.state = EngineState::Active;
            }
            return Ok(record.handle.clone());
        }

        let handle = self.factory.make_engine(module_id, entrypoint)?;
        let channel_name = self.config.channel_name(module_id);
        let transport = match handle.open_channel(&channel_name) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Engine {} could not open {}: {}", module_id, channel_name, e);
                handle.destroy();
                return Err(e.into());
            }
        };
        self.router.register(module_id, transport);

        engines.insert(
            module_id.to_string(),
            EngineRecord {
                handle: handle.clone(),
                entrypoint: entrypoint.map(str::to_string),
                channel_name,
                state,
                created_at: now,
                last_used_at: now,
            },
        );
        info!(module_id, ?state, "engine created");
        Ok(handle)
    }

    /// Mark an engine paused; `false` when the id is unknown
    pub fn pause(&self, module_id: &str) -> bool {
        self.set_state(module_id, EngineState::Paused)
    }

    pub fn resume(&self, module_id: &str) -> bool {
        self.set_state(module_id, EngineState::Active)
    }

    fn set_state(&self, module_id: &str, state: EngineState) -> bool {
        match self.lock().get_mut(module_id) {
            Some(record) => {
                record.state = state;
                debug!("Engine {} is now {:?}", module_id, state);
                true
            }
            None => false,
        }
    }

    /// Unregister and destroy an engine; `false` when it was not cached
    pub fn release(&self, module_id: &str) -> bool {
        let record = self.lock().remove(module_id);
        match record {
            Some(record) => {
                self.teardown(module_id, record);
                true
            }
            None => false,
        }
    }

    fn teardown(&self, module_id: &str, record: EngineRecord) {
        self.router.unregister(module_id);
        record.handle.destroy();
        info!("Released engine {}", module_id);
    }

    /// Release every engine idle for longer than `max_idle`; returns their ids
    pub fn perform_maintenance(&self, max_idle: Duration) -> Vec<String> {
        let now = self.time_source.now();
        let max_idle_ms = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX);

        let evicted: Vec<(String, EngineRecord)> = {
            let mut engines = self.lock();
            let stale: Vec<String> = engines
                .iter()
                .filter(|(_, record)| now - record.last_used_at > max_idle_ms)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| engines.remove(&id).map(|record| (id, record)))
                .collect()
        };

        let mut released = Vec::with_capacity(evicted.len());
        for (module_id, record) in evicted {
            info!(
                "Evicting engine {} idle for {}s",
                module_id,
                (now - record.last_used_at) / 1000
            );
            self.teardown(&module_id, record);
            released.push(module_id);
        }
        released.sort();
        released
    }

    /// Run [`perform_maintenance`](Self::perform_maintenance) every `interval`
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let released = registry.perform_maintenance(max_idle);
                if !released.is_empty() {
                    debug!("Maintenance released {} engine(s)", released.len());
                }
            }
        })
    }

    pub fn engine_info(&self, module_id: &str) -> Option<EngineInfo> {
        self.lock()
            .get(module_id)
            .map(|record| EngineInfo::from_record(module_id, record))
    }

    /// Snapshots of every cached engine, sorted by id
    pub fn all_engine_info(&self) -> Vec<EngineInfo> {
        let mut infos: Vec<EngineInfo> = self
            .lock()
            .iter()
            .map(|(id, record)| EngineInfo::from_record(id, record))
            .collect();
        infos.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        infos
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Release every cached engine
    pub fn release_all(&self) -> usize {
        let drained: Vec<(String, EngineRecord)> = self.lock().drain().collect();
        let count = drained.len();
        for (module_id, record) in drained {
            self.teardown(&module_id, record);
        }
        count
    }
}
