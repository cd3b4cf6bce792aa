//! Error taxonomy for the flag engine.
//!
//! Evaluation paths (`Flag::enabled`, `Flag::value`, `Engine::enabled`, ...)
//! never return these -- they catch and fall back to a safe default. Mutation
//! paths surface them to the caller.

use thiserror::Error;

/// The declared type of a flag did not match an expected value or was unknown.
#[derive(Debug, Error)]
#[error("invalid feature type: {0}")]
pub struct FlagTypeError(pub String);

/// A value did not match the flag's declared type, or a type-specific
/// mutator (`enable`/`disable`) was misused on the wrong type.
#[derive(Debug, Error)]
pub enum FlagValueError {
    #[error("feature `{name}` is type {expected} but got a {actual} value")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("enable()/disable() only mutate boolean features; `{name}` is {flag_type}")]
    NotBoolean { name: String, flag_type: &'static str },
}

/// A failure originating in the Remote or Durable storage tier.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("durable store error: {0}")]
    Durable(String),
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[cfg(any(feature = "postgres-store", feature = "sqlite-store", feature = "mysql-store"))]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Reserved for callers requiring strict lookup; the internal fallback path
/// returns a transient default-valued flag instead of this error.
#[derive(Debug, Error)]
#[error("feature not found: {0}")]
pub struct FeatureNotFoundError(pub String);

/// A dependent flag blocked an `enable()` call (I3). Returned only from the
/// "checked" mutator variants; the plain mutators just return `false`.
#[derive(Debug, Error)]
#[error("cannot enable `{flag}`: dependency `{blocking_dependent}` is disabled")]
pub struct DependencyBlockedError {
    pub flag: String,
    pub blocking_dependent: String,
}

/// Top-level error composing the taxonomy for call sites that want one type.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error(transparent)]
    Type(#[from] FlagTypeError),
    #[error(transparent)]
    Value(#[from] FlagValueError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    NotFound(#[from] FeatureNotFoundError),
    #[error(transparent)]
    DependencyBlocked(#[from] DependencyBlockedError),
}
