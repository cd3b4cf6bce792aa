//! Flag change observer: the extension point an audit-log sink (named out of
//! scope in §1) would hang off (SPEC_FULL §E).
//!
//! Mirrors the teacher's `storage::mutation_observer` shape -- a trait
//! invoked on mutation, plus a composite fan-out -- generalized from record
//! puts/removes/evictions to the two events this engine actually has: a
//! successful write to the Storage Registry, and a cache drop triggered by
//! the invalidation subscriber. The crate ships the trait and a no-op
//! default only; a concrete sink (audit log, webhook, ...) is the embedding
//! application's concern.

use std::sync::Arc;

use crate::flag::FlagState;

/// Observer for flag mutations and cache invalidations (C5).
///
/// Implementations can track statistics, write an audit log, or broadcast
/// change events. Used as `Arc<dyn FlagChangeObserver>`; both methods default
/// to no-ops so implementers only override what they actually need.
pub trait FlagChangeObserver: Send + Sync {
    /// Called after [`crate::storage::StorageRegistry::write_flag`] has
    /// written to every tier and published the invalidation.
    fn on_write(&self, _flag_name: &str, _state: &FlagState) {}

    /// Called by the invalidation subscriber after it drops `flag_name` from
    /// the Local store, whether or not a registered [`crate::flag::Flag`]
    /// reload followed.
    fn on_invalidate(&self, _flag_name: &str) {}

    /// Called after [`crate::storage::StorageRegistry::delete_flag`] has
    /// removed `flag_name` from every tier.
    fn on_delete(&self, _flag_name: &str) {}
}

/// The default observer: every event is dropped. Distinct from
/// `CompositeFlagChangeObserver::default()` (an empty fan-out) purely for
/// clarity at call sites that want to name "no observer" explicitly.
#[derive(Debug, Default)]
pub struct NoopFlagChangeObserver;

impl FlagChangeObserver for NoopFlagChangeObserver {}

/// Fans out every event to a fixed list of observers, in registration order.
#[derive(Default)]
pub struct CompositeFlagChangeObserver {
    observers: Vec<Arc<dyn FlagChangeObserver>>,
}

impl CompositeFlagChangeObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn FlagChangeObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn FlagChangeObserver>) {
        self.observers.push(observer);
    }
}

impl FlagChangeObserver for CompositeFlagChangeObserver {
    fn on_write(&self, flag_name: &str, state: &FlagState) {
        for observer in &self.observers {
            observer.on_write(flag_name, state);
        }
    }

    fn on_invalidate(&self, flag_name: &str) {
        for observer in &self.observers {
            observer.on_invalidate(flag_name);
        }
    }

    fn on_delete(&self, flag_name: &str) {
        for observer in &self.observers {
            observer.on_delete(flag_name);
        }
    }
}
