//! Bridge Coordinator
//!
//! Single entry point for native code that needs to reach a UI runtime by
//! technology stack, or to hand data from one runtime to another.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crossbridge_core::{BridgeError, BridgeResult, TechStack};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::bridge::{Bridge, SHARED_DATA_METHOD};

#[derive(Default)]
pub struct BridgeCoordinator {
    bridges: RwLock<HashMap<TechStack, Arc<dyn Bridge>>>,
}

impl BridgeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a facade under its own stack; returns the one it replaced
    pub fn register(&self, bridge: Arc<dyn Bridge>) -> Option<Arc<dyn Bridge>> {
        let stack = bridge.tech_stack();
        info!("Registered {} bridge", stack);
        self.bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stack, bridge)
    }

    pub fn unregister(&self, stack: TechStack) -> Option<Arc<dyn Bridge>> {
        self.bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&stack)
    }

    pub fn bridge(&self, stack: TechStack) -> Option<Arc<dyn Bridge>> {
        self.bridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stack)
            .cloned()
    }

    /// Call a method on the runtime behind `target`
    pub async fn call(
        &self,
        target: TechStack,
        method: &str,
        arguments: Value,
    ) -> BridgeResult<Value> {
        let bridge = self.bridge(target).ok_or_else(BridgeError::not_available)?;
        debug!("Coordinator call {} on {}", method, target);
        bridge.call_method(method, arguments).await
    }

    /// Hand `data` from `source` to `target`; native targets accept it locally
    pub async fn share_data(
        &self,
        data: Value,
        source: TechStack,
        target: TechStack,
    ) -> BridgeResult<()> {
        if target == TechStack::Native {
            debug!("Native received shared data from {}", source);
            return Ok(());
        }
        self.call(
            target,
            SHARED_DATA_METHOD,
            json!({ "data": data, "source": source.as_str() }),
        )
        .await?;
        info!("Shared data from {} to {}", source, target);
        Ok(())
    }

    /// Availability of every stack; native is always available
    pub fn bridge_status(&self) -> HashMap<TechStack, bool> {
        let bridges = self.bridges.read().unwrap_or_else(PoisonError::into_inner);
        TechStack::ALL
            .iter()
            .map(|stack| {
                let available = match stack {
                    TechStack::Native => true,
                    other => bridges.get(other).is_some_and(|b| b.is_available()),
                };
                (*stack, available)
            })
            .collect()
    }
}
