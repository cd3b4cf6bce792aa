//! Storage Registry (C5): read-through/write-through composition of Local,
//! Remote, and Durable, plus the invalidation subscriber (§4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::error::FlagError;
use crate::flag::{attributes_from_state, state_from_attributes, FlagState};
use crate::observer::{FlagChangeObserver, NoopFlagChangeObserver};
use crate::value::FlagType;

use super::circuit_breaker::CircuitBreaker;
use super::durable::DurableStore;
use super::local::LocalStore;
use super::remote::RemoteStore;

/// Per-flag debounce window for the invalidation subscriber (§4.5a): a
/// second message for the same flag within this window is dropped.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Delay before the invalidation subscriber task restarts after an error
/// (§4.5: "self-restarts after 5 s").
const SUBSCRIBER_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Composition of the three storage tiers (C1-C3) behind one read/write API.
/// Reads fall through Local -> Remote -> Durable, warming only Local on a
/// lower-tier hit (§4.5: "Remote is not written from a Durable hit"). Writes
/// go to all three tiers; the Remote write is wrapped in a [`CircuitBreaker`]
/// and may be dispatched off the write path when `async_updates` is set.
pub struct StorageRegistry {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    durable: Arc<dyn DurableStore>,
    breaker: CircuitBreaker,
    async_updates: bool,
    observer: Arc<dyn FlagChangeObserver>,
}

impl StorageRegistry {
    #[must_use]
    pub fn new(config: &EngineConfig, remote: Arc<dyn RemoteStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            local: LocalStore::new(config.memory_ttl),
            remote,
            durable,
            breaker: CircuitBreaker::new(config.circuit_breaker.threshold, config.circuit_breaker.timeout),
            async_updates: config.async_updates,
            observer: Arc::new(NoopFlagChangeObserver),
        }
    }

    /// Replaces the default no-op [`FlagChangeObserver`] with `observer`,
    /// invoked on every successful write, delete, and invalidation-driven
    /// cache drop (SPEC_FULL §E).
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FlagChangeObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Read-through Local -> Remote -> Durable (§4.5). Any tier that
    /// satisfies the read backfills Local only.
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` only if the Durable Store itself fails;
    /// a Remote Store failure is swallowed and treated as a miss, since
    /// Durable remains authoritative.
    pub async fn read_flag(&self, name: &str) -> Result<Option<FlagState>, FlagError> {
        if let Some(attrs) = self.local.get(name) {
            return Ok(Some(state_from_attributes(&attrs)?));
        }

        if let Ok(Some(attrs)) = self.remote.get_all(name).await {
            self.local.set(name, attrs.clone());
            return Ok(Some(state_from_attributes(&attrs)?));
        }

        if let Some(attrs) = self.durable.load(name).await? {
            self.local.set(name, attrs.clone());
            return Ok(Some(state_from_attributes(&attrs)?));
        }

        Ok(None)
    }

    /// Write-through to all tiers (§4.5). Local and Durable are always
    /// synchronous; the Remote write is synchronous unless `async_updates`,
    /// in which case it is dispatched on a background task. The invalidation
    /// publish precedes or overlaps an async Remote write (§9 Open Question:
    /// "publish-after-Remote-ack when possible, before-ack acceptable").
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` if the Durable write fails; the caller's
    /// write is otherwise considered best-effort on Remote.
    pub async fn write_flag(&self, name: &str, state: &FlagState) -> Result<(), FlagError> {
        let attrs = attributes_from_state(flag_type_of(state), state);

        self.local.set(name, attrs.clone());
        self.durable.store(name, &attrs).await?;

        if self.async_updates {
            let remote = Arc::clone(&self.remote);
            let name = name.to_string();
            let attrs_for_remote = attrs.clone();
            tokio::spawn(async move {
                if let Err(err) = remote.set_all(&name, &attrs_for_remote).await {
                    warn!(flag = %name, error = %err, "async remote write failed");
                }
            });
        } else {
            let remote = Arc::clone(&self.remote);
            let attrs_for_remote = attrs.clone();
            let name_owned = name.to_string();
            let _ = self
                .breaker
                .call(|| async move { remote.set_all(&name_owned, &attrs_for_remote).await })
                .await;
        }

        if let Err(err) = self.remote.publish_invalidate(name).await {
            warn!(flag = %name, error = %err, "failed to publish invalidation");
        }

        self.observer.on_write(name, state);
        Ok(())
    }

    /// Removes `name` from all three tiers.
    ///
    /// # Errors
    /// Returns `FlagError::Adapter` if the Durable delete fails.
    pub async fn delete_flag(&self, name: &str) -> Result<(), FlagError> {
        self.local.delete(name);
        let _ = self.remote.delete(name).await;
        self.durable.delete(name).await?;
        let _ = self.remote.publish_invalidate(name).await;
        self.observer.on_delete(name);
        Ok(())
    }

    /// Spawns the invalidation subscriber (§4.5 "Subscriber"). For each
    /// message received on the Remote Store's pub/sub channel: debounces
    /// duplicates within [`DEBOUNCE_WINDOW`], drops the flag from Local, and
    /// invokes `on_invalidate` so the caller (the Engine façade) can reload
    /// any in-memory projection it holds for that flag. Restarts the
    /// subscription after [`SUBSCRIBER_RESTART_DELAY`] if it errors out.
    ///
    /// Returns a [`SubscriberHandle`] whose `stop()` ends the task at the
    /// next wakeup instead of letting it run for the process lifetime.
    pub fn spawn_invalidation_subscriber(
        self: &Arc<Self>,
        on_invalidate: impl Fn(String) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        let registry = Arc::clone(self);
        let on_invalidate = Arc::new(on_invalidate);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let debounce: DashMap<String, Instant> = DashMap::new();
            loop {
                if *stop_rx.borrow() {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                    subscribed = registry.remote.subscribe_invalidations() => {
                        match subscribed {
                            Ok(mut rx) => loop {
                                tokio::select! {
                                    biased;
                                    _ = stop_rx.changed() => {
                                        if *stop_rx.borrow() {
                                            return;
                                        }
                                    }
                                    message = rx.recv() => {
                                        let Some(flag_name) = message else {
                                            warn!("invalidation subscription stream ended; restarting");
                                            break;
                                        };
                                        let now = Instant::now();
                                        let recently_processed = debounce
                                            .get(&flag_name)
                                            .is_some_and(|last| now.duration_since(*last) < DEBOUNCE_WINDOW);
                                        if recently_processed {
                                            continue;
                                        }
                                        debounce.insert(flag_name.clone(), now);
                                        registry.local.delete(&flag_name);
                                        registry.observer.on_invalidate(&flag_name);
                                        (on_invalidate)(flag_name);
                                    }
                                }
                            },
                            Err(err) => {
                                error!(error = %err, "invalidation subscription failed; restarting");
                            }
                        }
                    }
                }
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                    () = tokio::time::sleep(SUBSCRIBER_RESTART_DELAY) => {}
                }
            }
        });
        SubscriberHandle { join, stop: stop_tx }
    }
}

/// Handle to a spawned background task that can be asked to end gracefully:
/// a `watch`-based stop signal, without health-state tracking or in-flight
/// draining, since nothing here serves requests that need draining.
pub struct SubscriberHandle {
    join: tokio::task::JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl SubscriberHandle {
    /// Signals the task to stop at its next wakeup. Does not block.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Waits for the task to end. Intended for tests and orderly shutdown
    /// paths; callers that only need fire-and-forget should use [`Self::stop`].
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

fn flag_type_of(state: &FlagState) -> FlagType {
    state.value.flag_type()
}
