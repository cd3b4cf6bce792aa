//! Local Store (C1): thread-safe in-memory flag cache with TTL eviction.
//!
//! A [`DashMap`] fronting opaque per-key payloads, keyed by flag name, with
//! one expiry timestamp per flag rather than per attribute (§4.1).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// One flag's cached attribute set plus its expiry instant.
struct Entry {
    attributes: HashMap<String, String>,
    expires_at: Instant,
}

/// In-memory, TTL-evicting cache of flag attribute maps.
///
/// All operations are wait-free for readers/writers beyond `DashMap`'s
/// internal sharding; expiry is swept lazily on access, never by a
/// background timer (§4.1: "expiry is lazily swept on each read/write").
pub struct LocalStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl LocalStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached attribute map for `name`, or `None` if absent or
    /// expired (an expired entry is removed as a side effect).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<HashMap<String, String>> {
        let expired = self
            .entries
            .get(name)
            .is_some_and(|entry| entry.expires_at <= Instant::now());
        if expired {
            self.entries.remove(name);
            return None;
        }
        self.entries.get(name).map(|entry| entry.attributes.clone())
    }

    /// Replaces `name`'s full attribute map and refreshes its expiry.
    pub fn set(&self, name: &str, attributes: HashMap<String, String>) {
        self.entries.insert(
            name.to_string(),
            Entry {
                attributes,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn delete(&self, name: &str) {
        self.entries.remove(name);
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        self.sweep_expired();
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for name in expired {
            self.entries.remove(&name);
        }
    }
}
