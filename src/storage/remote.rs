//! Remote Store (C2): a networked key/value adapter with hash-per-flag
//! layout and a pub/sub invalidation channel (§4.2).
//!
//! [`RemoteStore`] is the capability interface; [`NullRemoteStore`] is the
//! always-available no-op used when no backend is configured, and
//! [`RedisStore`] (feature `redis-store`) is the production adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AdapterError;

pub const INVALIDATION_CHANNEL: &str = "magick:cache:invalidate";

/// Capability interface for the shared network cache.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_all(&self, flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError>;
    async fn set_all(&self, flag_name: &str, attributes: &HashMap<String, String>) -> Result<(), AdapterError>;
    async fn delete(&self, flag_name: &str) -> Result<(), AdapterError>;

    /// Publishes `flag_name` on [`INVALIDATION_CHANNEL`].
    async fn publish_invalidate(&self, flag_name: &str) -> Result<(), AdapterError>;

    /// Opens a long-lived subscription to [`INVALIDATION_CHANNEL`], delivering
    /// each received flag name on the returned channel. [`NullRemoteStore`]
    /// returns a receiver that never yields -- there is nothing to subscribe
    /// to, and the sender half is kept alive for the receiver's lifetime.
    ///
    /// # Errors
    /// Returns `AdapterError` if the subscription cannot be established.
    async fn subscribe_invalidations(&self) -> Result<mpsc::UnboundedReceiver<String>, AdapterError>;

    async fn incr_count(&self, key: &str, by: i64) -> Result<(), AdapterError>;
    async fn incr_float(&self, key: &str, by: f64) -> Result<(), AdapterError>;
    async fn get_string(&self, key: &str) -> Result<Option<String>, AdapterError>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AdapterError>;

    /// True for a real backend; [`NullRemoteStore`] reports `false` so
    /// callers (the Storage Registry, the metrics pipeline) can skip
    /// pointless round-trips.
    fn is_available(&self) -> bool {
        true
    }
}

/// No-op Remote Store used when no backend is configured. Reads always miss
/// (Durable remains authoritative); writes, deletes, and publishes succeed
/// immediately without side effects.
#[derive(Default)]
pub struct NullRemoteStore;

#[async_trait]
impl RemoteStore for NullRemoteStore {
    async fn get_all(&self, _flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError> {
        Ok(None)
    }

    async fn set_all(&self, _flag_name: &str, _attributes: &HashMap<String, String>) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn delete(&self, _flag_name: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn publish_invalidate(&self, _flag_name: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn subscribe_invalidations(&self) -> Result<mpsc::UnboundedReceiver<String>, AdapterError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Leak the sender deliberately: a `NullRemoteStore` subscription is
        // meant to sit idle for the process lifetime, never firing.
        std::mem::forget(tx);
        Ok(rx)
    }

    async fn incr_count(&self, _key: &str, _by: i64) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn incr_float(&self, _key: &str, _by: f64) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn get_string(&self, _key: &str) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(feature = "redis-store")]
mod redis_store {
    use super::{AdapterError, HashMap, RemoteStore, INVALIDATION_CHANNEL};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    /// Redis-backed [`RemoteStore`]. One key per flag (`{namespace}:{name}`),
    /// hash fields = attribute names; metrics keys live under `magick:stats:*`
    /// and `magick:duration:*` with a 7-day TTL, set by callers after writing.
    pub struct RedisStore {
        manager: ConnectionManager,
        /// Kept alongside the connection manager so a subscriber can open its
        /// own dedicated pub/sub connection on demand.
        client: redis::Client,
        namespace: String,
    }

    impl RedisStore {
        /// # Errors
        /// Returns `AdapterError::Redis` if the initial connection fails.
        pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, AdapterError> {
            let client = redis::Client::open(url)?;
            let manager = client.get_connection_manager().await?;
            Ok(Self {
                manager,
                client,
                namespace: namespace.into(),
            })
        }

        fn key(&self, flag_name: &str) -> String {
            format!("{}:{flag_name}", self.namespace)
        }
    }

    #[async_trait]
    impl RemoteStore for RedisStore {
        async fn get_all(&self, flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError> {
            let mut conn = self.manager.clone();
            let map: HashMap<String, String> = conn.hgetall(self.key(flag_name)).await?;
            Ok(if map.is_empty() { None } else { Some(map) })
        }

        async fn set_all(&self, flag_name: &str, attributes: &HashMap<String, String>) -> Result<(), AdapterError> {
            let mut conn = self.manager.clone();
            let pairs: Vec<(String, String)> = attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            conn.hset_multiple(self.key(flag_name), &pairs).await?;
            Ok(())
        }

        async fn delete(&self, flag_name: &str) -> Result<(), AdapterError> {
            let mut conn = self.manager.clone();
            conn.del(self.key(flag_name)).await?;
            Ok(())
        }

        async fn publish_invalidate(&self, flag_name: &str) -> Result<(), AdapterError> {
            let mut conn = self.manager.clone();
            conn.publish(INVALIDATION_CHANNEL, flag_name).await?;
            Ok(())
        }

        /// Opens a dedicated pub/sub connection and forwards every message on
        /// [`INVALIDATION_CHANNEL`] to the returned channel. The forwarding
        /// task runs for the lifetime of the receiver; it exits silently once
        /// the receiver (and thus the `Storage Registry`'s subscriber) drops.
        async fn subscribe_invalidations(&self) -> Result<super::mpsc::UnboundedReceiver<String>, AdapterError> {
            use futures_util::StreamExt as _;

            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(INVALIDATION_CHANNEL).await?;

            let (tx, rx) = super::mpsc::unbounded_channel();
            tokio::spawn(async move {
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    if tx.send(payload).is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        async fn incr_count(&self, key: &str, by: i64) -> Result<(), AdapterError> {
            let mut conn = self.manager.clone();
            conn.incr(key, by).await?;
            conn.expire(key, 7 * 24 * 3600).await?;
            Ok(())
        }

        async fn incr_float(&self, key: &str, by: f64) -> Result<(), AdapterError> {
            let mut conn = self.manager.clone();
            redis::cmd("INCRBYFLOAT")
                .arg(key)
                .arg(by)
                .query_async::<()>(&mut conn)
                .await?;
            conn.expire(key, 7 * 24 * 3600).await?;
            Ok(())
        }

        async fn get_string(&self, key: &str) -> Result<Option<String>, AdapterError> {
            let mut conn = self.manager.clone();
            Ok(conn.get(key).await?)
        }

        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
            let mut conn = self.manager.clone();
            let pattern = format!("{prefix}*");
            Ok(conn.keys(pattern).await?)
        }
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
