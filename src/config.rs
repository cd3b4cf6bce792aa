//! Engine-level configuration types.
//!
//! Plain structs with `Default` impls carrying the engine's numeric
//! defaults, flat fields, no builder, defaults asserted by tests.

use std::time::Duration;

/// Top-level configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL applied to entries in the process-local cache (C1).
    pub memory_ttl: Duration,
    /// Circuit breaker wrapping Remote Store writes (C4).
    pub circuit_breaker: CircuitBreakerConfig,
    /// When true, Remote Store writes are dispatched on a background task
    /// rather than awaited inline.
    pub async_updates: bool,
    /// In-hot-path metrics pipeline (C8).
    pub metrics: MetricsConfig,
    /// Emit a deprecation signal when a deprecated flag evaluates true for a
    /// caller that didn't opt into `allow_deprecated`.
    pub warn_on_deprecated: bool,
    /// Remote Store (C2) connection settings.
    pub remote: RemoteStoreConfig,
    /// Durable Store (C3) connection settings.
    pub durable: DurableStoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_ttl: Duration::from_secs(3600),
            circuit_breaker: CircuitBreakerConfig::default(),
            async_updates: false,
            metrics: MetricsConfig::default(),
            warn_on_deprecated: false,
            remote: RemoteStoreConfig::default(),
            durable: DurableStoreConfig::default(),
        }
    }
}

/// Circuit breaker thresholds for Remote Store writes (C4).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Metrics pipeline batching configuration (C8).
#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    /// Whether the pipeline records and flushes at all.
    pub enabled: bool,
    /// Flush when `pending` across all flags reaches this count.
    pub batch_size: usize,
    /// Flush when this much time has elapsed since the last flush, even if
    /// `batch_size` hasn't been reached.
    pub flush_interval: Duration,
    /// Whether flushed counters are also tracked in the Remote Store.
    pub remote_tracking: RemoteTracking,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            flush_interval: Duration::from_secs(60),
            remote_tracking: RemoteTracking::Auto,
        }
    }
}

/// Whether metrics are mirrored into the Remote Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTracking {
    Enabled,
    Disabled,
    /// Follow whatever the Storage Registry's Remote Store availability is.
    Auto,
}

/// Remote Store (C2) connection settings.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub url: String,
    pub namespace: String,
    /// Database index, kept distinct from any general-purpose application
    /// cache to avoid collateral eviction.
    pub db: u32,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "magick:features".to_string(),
            db: 1,
        }
    }
}

/// Durable Store (C3) connection settings.
#[derive(Debug, Clone)]
pub struct DurableStoreConfig {
    pub url: String,
    pub table: String,
}

impl Default for DurableStoreConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/magick".to_string(),
            table: "magick_features".to_string(),
        }
    }
}
