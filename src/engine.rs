//! Engine Façade (C9): the process-wide name -> [`Flag`] registry plus the
//! entry points callers actually use (§4.9). A name-keyed `DashMap` sits at
//! the center, much like a service registry, but entries are flags rather
//! than managed services.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use dashmap::DashMap;
use tracing::warn;

use crate::config::EngineConfig;
use crate::context::{ContextSource, EvalContext};
use crate::error::{FeatureNotFoundError, FlagError};
use crate::flag::{Flag, FlagOptions, FlagState};
use crate::metrics::{MetricsPipeline, Operation};
use crate::observer::{FlagChangeObserver, NoopFlagChangeObserver};
use crate::storage::durable::{DurableStore, NullDurableStore};
use crate::storage::registry::StorageRegistry;
use crate::storage::remote::{NullRemoteStore, RemoteStore};
use crate::value::{FlagType, FlagValue};

/// Shared state behind the [`Engine`] handle. A [`Flag`] holds only a
/// [`Weak`] pointer back into this (Design Notes §9), so the cascade-disable
/// and dependency-check paths never create an ownership cycle.
pub struct EngineInner {
    pub(crate) flags: DashMap<String, Arc<Flag>>,
    pub(crate) storage: Arc<StorageRegistry>,
    metrics: MetricsPipeline,
}

/// An explicit, constructible engine value (Design Notes §9: no implicit
/// process-wide singleton). Cheap to clone; every clone shares the same
/// registry, storage tiers, and metrics pipeline.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

static DEFAULT_ENGINE: OnceLock<Engine> = OnceLock::new();

impl Engine {
    /// Builds an engine wired to the given Remote/Durable adapters.
    #[must_use]
    pub fn new(config: EngineConfig, remote: Arc<dyn RemoteStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self::new_with_observer(config, remote, durable, Arc::new(NoopFlagChangeObserver))
    }

    /// Same as [`Engine::new`], but every write, delete, and
    /// invalidation-driven cache drop also notifies `observer` (SPEC_FULL
    /// §E) -- the extension point an audit-log sink would hang off.
    #[must_use]
    pub fn new_with_observer(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        durable: Arc<dyn DurableStore>,
        observer: Arc<dyn FlagChangeObserver>,
    ) -> Self {
        let metrics = MetricsPipeline::spawn(config.metrics, Arc::clone(&remote));
        let storage = Arc::new(StorageRegistry::new(&config, remote, durable).with_observer(observer));
        let inner = Arc::new(EngineInner {
            flags: DashMap::new(),
            storage,
            metrics,
        });

        let weak_inner = Arc::downgrade(&inner);
        inner.storage.spawn_invalidation_subscriber(move |flag_name| {
            let Some(inner) = weak_inner.upgrade() else { return };
            if let Some(flag) = inner.flags.get(&flag_name) {
                let flag = Arc::clone(&flag);
                tokio::spawn(async move {
                    if let Err(err) = flag.reload().await {
                        warn!(flag = %flag.name(), error = %err, "reload after invalidation failed");
                    }
                });
            }
        });

        Self { inner }
    }

    /// An engine with no external backends: Local cache only, Durable and
    /// Remote are no-ops. Suitable for tests and single-process embedding
    /// without infrastructure.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(EngineConfig::default(), Arc::new(NullRemoteStore), Arc::new(NullDurableStore))
    }

    /// A process-wide default instance for ergonomic call sites (Design
    /// Notes §9). Not a hidden singleton -- `Engine::new` remains the normal
    /// construction path; this is purely a convenience accessor.
    pub fn shared() -> &'static Engine {
        DEFAULT_ENGINE.get_or_init(Engine::in_memory)
    }

    /// Registers a flag. Idempotent by name: if the flag is already
    /// registered (in-memory or previously persisted), its metadata
    /// (description, display name, group, dependencies, variants) is
    /// rebound to `opts` while its current status/value/targeting carry
    /// over; otherwise a fresh flag is created from `opts.default_value`
    /// and persisted.
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` if the Durable Store write fails.
    pub async fn register(&self, name: impl Into<String>, opts: FlagOptions) -> Result<Arc<Flag>, FlagError> {
        let name = name.into();
        let existing = self.inner.storage.read_flag(&name).await?;

        let state = match existing {
            Some(mut state) => {
                state.description = opts.description.clone();
                state.display_name = opts.display_name.clone();
                state.group = opts.group.clone();
                state.dependencies = opts.dependencies.clone();
                state.variants = opts.variants.clone();
                state
            }
            None => FlagState {
                status: opts.status,
                default_value: opts.default_value.clone(),
                value: opts.default_value.clone(),
                description: opts.description.clone(),
                display_name: opts.display_name.clone(),
                group: opts.group.clone(),
                dependencies: opts.dependencies.clone(),
                targeting: crate::targeting::TargetingMap::default(),
                variants: opts.variants.clone(),
            },
        };

        self.inner.storage.write_flag(&name, &state).await?;

        let flag = Arc::new(Flag::from_state(
            name.clone(),
            opts.flag_type,
            state,
            Arc::downgrade(&self.inner),
        ));
        self.inner.flags.insert(name, Arc::clone(&flag));
        Ok(flag)
    }

    /// Returns the registered flag, or a transient, unregistered
    /// defaults-bearing boolean flag (default `false`) if `name` was never
    /// registered -- callers requiring strict lookup should check
    /// [`Engine::is_registered`] first.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<Flag> {
        if let Some(flag) = self.inner.flags.get(name) {
            return Arc::clone(&flag);
        }
        Arc::new(Flag::new(name.to_string(), FlagOptions::new(FlagType::Boolean), Weak::new()))
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.flags.contains_key(name)
    }

    /// Strict lookup: unlike [`Engine::get`], never fabricates a transient
    /// default-valued flag. Returns `FlagError::NotFound` if `name` was never
    /// registered.
    ///
    /// # Errors
    /// Returns `FlagError::NotFound` if `name` is not registered.
    pub fn get_strict(&self, name: &str) -> Result<Arc<Flag>, FlagError> {
        self.inner
            .flags
            .get(name)
            .map(|flag| Arc::clone(&flag))
            .ok_or_else(|| FeatureNotFoundError(name.to_string()).into())
    }

    /// `enabled?(name, ctx)` (§4.9): never raises; any internal failure
    /// surfaces through [`Flag::enabled`]'s own fail-safe behavior.
    #[must_use]
    pub fn enabled(&self, name: &str, ctx: &EvalContext) -> bool {
        let start = Instant::now();
        let flag = self.get(name);
        let result = flag.enabled(ctx);
        self.inner
            .metrics
            .record(name, Operation::Enabled, start.elapsed(), true);
        result
    }

    #[must_use]
    pub fn disabled(&self, name: &str, ctx: &EvalContext) -> bool {
        !self.enabled(name, ctx)
    }

    #[must_use]
    pub fn value(&self, name: &str, ctx: &EvalContext) -> FlagValue {
        let start = Instant::now();
        let flag = self.get(name);
        let result = flag.value(ctx);
        self.inner.metrics.record(name, Operation::Value, start.elapsed(), true);
        result
    }

    #[must_use]
    pub fn enabled_for(&self, name: &str, source: &dyn ContextSource, extra: Option<&EvalContext>) -> bool {
        let ctx = EvalContext::from_source(source, extra);
        self.enabled(name, &ctx)
    }

    /// Enables every named flag that is boolean-typed and currently
    /// registered; non-boolean or unregistered names are skipped (§4.9).
    pub async fn bulk_enable(&self, names: &[String]) {
        for name in names {
            if let Some(flag) = self.inner.flags.get(name).map(|f| Arc::clone(&f)) {
                if flag.flag_type() == FlagType::Boolean {
                    if let Err(err) = flag.enable().await {
                        warn!(flag = %name, error = %err, "bulk_enable failed");
                    }
                }
            }
        }
    }

    pub async fn bulk_disable(&self, names: &[String]) {
        for name in names {
            if let Some(flag) = self.inner.flags.get(name).map(|f| Arc::clone(&f)) {
                if flag.flag_type() == FlagType::Boolean {
                    if let Err(err) = flag.disable().await {
                        warn!(flag = %name, error = %err, "bulk_disable failed");
                    }
                }
            }
        }
    }

    /// Forces a re-read of `name`'s projection from storage.
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` if the Durable Store read fails.
    pub async fn reload(&self, name: &str) -> Result<(), FlagError> {
        if let Some(flag) = self.inner.flags.get(name).map(|f| Arc::clone(&f)) {
            flag.reload().await?;
        }
        Ok(())
    }

    /// Deletes `name` from the registry and every storage tier. Subsequent
    /// lookups return a transient default-valued flag (§3 Lifecycle).
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` if the Durable Store delete fails.
    pub async fn delete(&self, name: &str) -> Result<(), FlagError> {
        self.inner.flags.remove(name);
        self.inner.storage.delete_flag(name).await
    }

    /// Drops the in-memory registry and the Local cache (testing only; does
    /// not truncate the Durable table or a shared Remote Store).
    pub fn reset(&self) {
        self.inner.flags.clear();
        self.inner.storage.local().clear();
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsPipeline {
        &self.inner.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let engine = Engine::in_memory();
        engine
            .register("dark_mode", FlagOptions::new(FlagType::Boolean))
            .await
            .unwrap();
        assert!(engine.is_registered("dark_mode"));
        assert!(!engine.enabled("dark_mode", &EvalContext::new()));
    }

    #[tokio::test]
    async fn unregistered_flag_defaults_to_false() {
        let engine = Engine::in_memory();
        assert!(!engine.enabled("never_registered", &EvalContext::new()));
        assert!(!engine.is_registered("never_registered"));
    }

    #[tokio::test]
    async fn scenario_s1_register_set_value_enable() {
        let engine = Engine::in_memory();
        let flag = engine
            .register(
                "dark_mode",
                FlagOptions::new(FlagType::Boolean).with_default(FlagValue::Boolean(false)),
            )
            .await
            .unwrap();
        assert!(!engine.enabled("dark_mode", &EvalContext::new()));
        flag.set_value(FlagValue::Boolean(true)).await.unwrap();
        assert!(engine.enabled("dark_mode", &EvalContext::new()));
    }

    #[tokio::test]
    async fn scenario_s2_enable_for_role() {
        let engine = Engine::in_memory();
        let flag = engine.register("premium", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        flag.enable_for_role("admin").await.unwrap();

        let admin_ctx = EvalContext::new().with_role("admin");
        let user_ctx = EvalContext::new().with_role("user");
        assert!(engine.enabled("premium", &admin_ctx));
        assert!(!engine.enabled("premium", &user_ctx));
    }

    #[tokio::test]
    async fn scenario_s4_dependency_blocks_enable() {
        let engine = Engine::in_memory();
        engine
            .register(
                "base",
                FlagOptions::new(FlagType::Boolean),
            )
            .await
            .unwrap();
        let advanced = engine
            .register(
                "advanced",
                FlagOptions::new(FlagType::Boolean).with_dependencies(vec!["base".to_string()]),
            )
            .await
            .unwrap();
        advanced.disable().await.unwrap();

        let base = engine.get("base");
        assert!(!base.enable().await.unwrap());
    }

    #[tokio::test]
    async fn scenario_s5_string_flag_enabled_tracks_non_empty() {
        let engine = Engine::in_memory();
        let flag = engine
            .register(
                "api_version",
                FlagOptions::new(FlagType::String).with_default(FlagValue::String("v1".to_string())),
            )
            .await
            .unwrap();
        assert!(engine.enabled("api_version", &EvalContext::new()));
        flag.disable().await.unwrap();
        assert!(!engine.enabled("api_version", &EvalContext::new()));
    }

    #[tokio::test]
    async fn disable_cascades_to_dependents() {
        let engine = Engine::in_memory();
        let base = engine.register("base", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        base.enable().await.unwrap();
        let advanced = engine
            .register(
                "advanced",
                FlagOptions::new(FlagType::Boolean).with_dependencies(vec!["base".to_string()]),
            )
            .await
            .unwrap();
        advanced.enable().await.unwrap();
        assert!(advanced.enabled(&EvalContext::new()));

        base.disable().await.unwrap();
        assert!(!base.enabled(&EvalContext::new()));
        assert!(!advanced.enabled(&EvalContext::new()));
    }

    #[tokio::test]
    async fn bulk_enable_skips_non_boolean() {
        let engine = Engine::in_memory();
        engine.register("b", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        engine
            .register(
                "s",
                FlagOptions::new(FlagType::String).with_default(FlagValue::String(String::new())),
            )
            .await
            .unwrap();

        engine.bulk_enable(&["b".to_string(), "s".to_string()]).await;
        assert!(engine.enabled("b", &EvalContext::new()));
        assert!(!engine.enabled("s", &EvalContext::new()));
    }

    #[tokio::test]
    async fn reset_clears_registry() {
        let engine = Engine::in_memory();
        engine.register("f", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        assert!(engine.is_registered("f"));
        engine.reset();
        assert!(!engine.is_registered("f"));
    }

    #[tokio::test]
    async fn register_is_idempotent_and_rebinds_metadata() {
        let engine = Engine::in_memory();
        let flag = engine.register("f", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        flag.enable().await.unwrap();

        let rebound = engine
            .register(
                "f",
                FlagOptions::new(FlagType::Boolean).with_default(FlagValue::Boolean(false)),
            )
            .await
            .unwrap();
        // metadata re-registration preserves the already-enabled state.
        assert_eq!(rebound.raw_value(), FlagValue::Boolean(true));
    }

    #[tokio::test]
    async fn delete_removes_from_registry() {
        let engine = Engine::in_memory();
        engine.register("f", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        engine.delete("f").await.unwrap();
        assert!(!engine.is_registered("f"));
    }

    #[test]
    fn shared_engine_is_reachable() {
        assert!(!Engine::shared().is_registered("anything"));
    }

    #[tokio::test]
    async fn get_strict_errors_on_unregistered_flag() {
        let engine = Engine::in_memory();
        let err = engine.get_strict("never_registered").unwrap_err();
        assert!(matches!(err, FlagError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_strict_returns_registered_flag() {
        let engine = Engine::in_memory();
        engine.register("f", FlagOptions::new(FlagType::Boolean)).await.unwrap();
        let flag = engine.get_strict("f").unwrap();
        assert_eq!(flag.name(), "f");
    }
}
