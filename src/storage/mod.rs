//! Storage tiers for the flag engine: Local (C1), Remote (C2), Durable (C3),
//! the Circuit Breaker wrapping Remote writes (C4), and the Storage Registry
//! (C5) composing all three behind one read/write API.

pub mod circuit_breaker;
pub mod durable;
pub mod local;
pub mod registry;
pub mod remote;

pub use circuit_breaker::CircuitBreaker;
pub use durable::{DurableStore, NullDurableStore};
pub use local::LocalStore;
pub use registry::StorageRegistry;
pub use remote::{NullRemoteStore, RemoteStore};

#[cfg(feature = "redis-store")]
pub use remote::RedisStore;

#[cfg(any(feature = "postgres-store", feature = "sqlite-store", feature = "mysql-store"))]
pub use durable::SqlxDurableStore;
