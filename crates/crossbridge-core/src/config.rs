//! Centralized configuration
//!
//! One section per component plus `BridgeConfig` tying them together. Every
//! section has a `Default` matching production behaviour and a `testing()`
//! preset with short timers.

use crate::errors::{BridgeError, BridgeResult};
use crate::framing::CONTROL_CHARACTERISTIC_UUID;
use crate::transport::WriteType;
use std::time::Duration;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Engine Registry Configuration
// ----------------------------------------------------------------------------

/// Configuration for the engine registry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegistryConfig {
    /// Prefix of each engine's default method channel, joined with `.{module_id}`
    pub channel_prefix: String,
    /// Engines idle longer than this are evicted by maintenance
    pub max_idle: Duration,
    /// Period of the background maintenance sweep
    pub maintenance_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "com.crossbridge.bluetooth".to_string(),
            max_idle: Duration::from_secs(300), // 5 minutes
            maintenance_interval: Duration::from_secs(300),
        }
    }
}

impl RegistryConfig {
    /// Keep engines around longer, sweep less often
    pub fn conservative() -> Self {
        Self {
            max_idle: Duration::from_secs(900),
            maintenance_interval: Duration::from_secs(600),
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            max_idle: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Full channel name for an engine
    pub fn channel_name(&self, module_id: &str) -> String {
        format!("{}.{}", self.channel_prefix, module_id)
    }
}

// ----------------------------------------------------------------------------
// Outbound Optimizer Configuration
// ----------------------------------------------------------------------------

/// Configuration for batching, debouncing and compression of outbound traffic
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OptimizerConfig {
    /// Delay before a flush cycle drains pending Normal messages
    pub batch_interval: Duration,
    /// Quiet period a Low priority key needs before it fires
    pub debounce_interval: Duration,
    /// Payloads at or above this size are deflate-compressed
    pub compression_threshold: usize,
    /// Whether compression is applied at all
    pub compression_enabled: bool,
    /// Method invoked on the engine for optimized deliveries
    pub delivery_method: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(50),
            debounce_interval: Duration::from_millis(500),
            compression_threshold: 1024,
            compression_enabled: true,
            delivery_method: "onBatchBluetoothUpdate".to_string(),
        }
    }
}

impl OptimizerConfig {
    /// Shorter windows for interactive screens
    pub fn low_latency() -> Self {
        Self {
            batch_interval: Duration::from_millis(16),
            debounce_interval: Duration::from_millis(150),
            ..Self::default()
        }
    }

    /// Larger windows, fewer cross-runtime hops
    pub fn conservative() -> Self {
        Self {
            batch_interval: Duration::from_millis(200),
            debounce_interval: Duration::from_secs(1),
            compression_threshold: 512,
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self::default()
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval = interval;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }
}

// ----------------------------------------------------------------------------
// Bridge Lifecycle Configuration
// ----------------------------------------------------------------------------

/// Configuration for the React Native style bridge lifecycle
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LifecycleConfig {
    /// Pause between cleanup and initialize in `force_reinitialize`
    pub reinitialize_delay: Duration,
    /// Default readiness timeout used by callers that do not pass one
    pub ready_timeout: Duration,
    /// Period of the background health monitor
    pub health_check_interval: Duration,
    /// Capacity of the state notification channel
    pub state_channel_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reinitialize_delay: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            state_channel_capacity: 32,
        }
    }
}

impl LifecycleConfig {
    pub fn testing() -> Self {
        Self {
            reinitialize_delay: Duration::from_millis(10),
            ready_timeout: Duration::from_secs(1),
            health_check_interval: Duration::from_millis(100),
            state_channel_capacity: 32,
        }
    }

    pub fn with_reinitialize_delay(mut self, delay: Duration) -> Self {
        self.reinitialize_delay = delay;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }
}

// ----------------------------------------------------------------------------
// BLE Framing Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE framing layer
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FramingConfig {
    /// Characteristic that carries retransmission requests back to a peer
    pub control_characteristic: Uuid,
    /// Write mode used for data fragments
    pub write_type: WriteType,
    /// Consecutive sequence mismatches tolerated before a partial message is dropped
    pub max_retransmit_requests: u32,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            control_characteristic: CONTROL_CHARACTERISTIC_UUID,
            write_type: WriteType::WithResponse,
            max_retransmit_requests: 3,
        }
    }
}

impl FramingConfig {
    pub fn testing() -> Self {
        Self::default()
    }

    pub fn with_control_characteristic(mut self, characteristic: Uuid) -> Self {
        self.control_characteristic = characteristic;
        self
    }

    pub fn with_write_type(mut self, write_type: WriteType) -> Self {
        self.write_type = write_type;
        self
    }

    pub fn with_max_retransmit_requests(mut self, max: u32) -> Self {
        self.max_retransmit_requests = max;
        self
    }
}

// ----------------------------------------------------------------------------
// WebView Hybrid Configuration
// ----------------------------------------------------------------------------

/// Configuration for the WebView JS bridge
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HybridConfig {
    /// Script message handler name the page posts to
    pub handler_name: String,
    /// How long a call waits for its callback before timing out
    pub call_timeout: Duration,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            handler_name: "nativeBridge".to_string(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl HybridConfig {
    pub fn testing() -> Self {
        Self {
            call_timeout: Duration::from_millis(200),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

// ----------------------------------------------------------------------------
// Unified Configuration
// ----------------------------------------------------------------------------

/// Configuration for the whole bridge runtime
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BridgeConfig {
    pub registry: RegistryConfig,
    pub optimizer: OptimizerConfig,
    pub lifecycle: LifecycleConfig,
    pub framing: FramingConfig,
    pub hybrid: HybridConfig,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timers throughout, for deterministic tests
    pub fn testing() -> Self {
        Self {
            registry: RegistryConfig::testing(),
            optimizer: OptimizerConfig::testing(),
            lifecycle: LifecycleConfig::testing(),
            framing: FramingConfig::testing(),
            hybrid: HybridConfig::testing(),
        }
    }

    pub fn low_latency() -> Self {
        Self {
            optimizer: OptimizerConfig::low_latency(),
            ..Self::default()
        }
    }

    pub fn conservative() -> Self {
        Self {
            registry: RegistryConfig::conservative(),
            optimizer: OptimizerConfig::conservative(),
            ..Self::default()
        }
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_framing(mut self, framing: FramingConfig) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_hybrid(mut self, hybrid: HybridConfig) -> Self {
        self.hybrid = hybrid;
        self
    }

    /// Reject configurations the components cannot run with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.registry.channel_prefix.is_empty() {
            return Err(BridgeError::config_error("Channel prefix cannot be empty"));
        }
        if self.registry.max_idle.is_zero() {
            return Err(BridgeError::config_error("Engine max idle cannot be zero"));
        }
        if self.registry.maintenance_interval.is_zero() {
            return Err(BridgeError::config_error(
                "Maintenance interval cannot be zero",
            ));
        }

        if self.optimizer.batch_interval.is_zero() {
            return Err(BridgeError::config_error("Batch interval cannot be zero"));
        }
        if self.optimizer.debounce_interval.is_zero() {
            return Err(BridgeError::config_error("Debounce interval cannot be zero"));
        }
        if self.optimizer.delivery_method.is_empty() {
            return Err(BridgeError::config_error("Delivery method cannot be empty"));
        }

        if self.lifecycle.state_channel_capacity == 0 {
            return Err(BridgeError::config_error(
                "State channel capacity cannot be zero",
            ));
        }
        if self.lifecycle.health_check_interval.is_zero() {
            return Err(BridgeError::config_error(
                "Health check interval cannot be zero",
            ));
        }

        if self.framing.max_retransmit_requests == 0 {
            return Err(BridgeError::config_error(
                "Retransmit request bound cannot be zero",
            ));
        }

        if self.hybrid.call_timeout.is_zero() {
            return Err(BridgeError::config_error("Hybrid call timeout cannot be zero"));
        }

        Ok(())
    }
}
