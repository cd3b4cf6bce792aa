//! Durable Store (C3): one row per flag in a relational table with a JSON
//! payload column (§4.3).
//!
//! [`DurableStore`] is the capability interface; [`NullDurableStore`] is the
//! always-available no-op, and [`SqlxDurableStore`] (feature-gated per
//! backend) is the production adapter, retrying on transient errors with
//! the fixed backoff schedule from §4.3.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AdapterError;

/// Fixed backoff schedule (ms) for retrying a write that failed with a
/// "busy"/"locked"/"timeout" error: 10, 20, 30, 40, 50 (§4.3).
const RETRY_BACKOFF_MS: [u64; 5] = [10, 20, 30, 40, 50];

/// Capability interface for the backing relational store. A flag's full
/// attribute set round-trips through `data` as opaque key/value pairs,
/// matching the JSON payload column described in §4.3/§6.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError>;
    async fn store(&self, flag_name: &str, attributes: &HashMap<String, String>) -> Result<(), AdapterError>;
    async fn delete(&self, flag_name: &str) -> Result<(), AdapterError>;
    async fn load_all_names(&self) -> Result<Vec<String>, AdapterError>;

    /// Idempotent table creation, guarded by a one-shot process lock in the
    /// concrete implementation.
    async fn initialize(&self) -> Result<(), AdapterError>;
}

/// No-op Durable Store for tests and ephemeral engines. Reads always miss;
/// writes and deletes succeed without side effects.
#[derive(Default)]
pub struct NullDurableStore;

#[async_trait]
impl DurableStore for NullDurableStore {
    async fn load(&self, _flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError> {
        Ok(None)
    }

    async fn store(&self, _flag_name: &str, _attributes: &HashMap<String, String>) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn delete(&self, _flag_name: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn load_all_names(&self) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Retries `op` up to `RETRY_BACKOFF_MS.len()` extra times on a transient
/// error, sleeping the fixed schedule between attempts. `is_transient`
/// decides whether a given error is retryable ("busy"/"locked"/"timeout").
pub(crate) async fn with_retry<F, Fut, T>(
    mut op: F,
    is_transient: impl Fn(&AdapterError) -> bool,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_BACKOFF_MS.len() && is_transient(&err) => {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS[attempt])).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(any(
    feature = "postgres-store",
    feature = "sqlite-store",
    feature = "mysql-store"
))]
mod sqlx_store {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use sqlx::any::AnyPoolOptions;
    use sqlx::AnyPool;

    use super::{with_retry, AdapterError, DurableStore, HashMap};
    use async_trait::async_trait;

    /// Which wire dialect is behind the `Any` pool. `sqlx::Any` abstracts
    /// connection and bind-parameter handling (bare `?` is rewritten per
    /// backend) but not DDL or upsert syntax, so those still have to branch
    /// on the backend the connection URL names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SqlBackend {
        Postgres,
        MySql,
        Sqlite,
    }

    impl SqlBackend {
        fn from_url(url: &str) -> Self {
            if url.starts_with("postgres://") || url.starts_with("postgresql://") {
                SqlBackend::Postgres
            } else if url.starts_with("mysql://") {
                SqlBackend::MySql
            } else {
                SqlBackend::Sqlite
            }
        }
    }

    /// `sqlx`-backed [`DurableStore`] using the `Any` driver, so the same
    /// adapter serves Postgres, SQLite, and MySQL per §4.3's "SQLite/
    /// Postgres/MySQL are supported" depending on which `*-store` feature
    /// selected the underlying driver at link time.
    pub struct SqlxDurableStore {
        pool: AnyPool,
        table: String,
        backend: SqlBackend,
        initialized: Arc<AtomicBool>,
    }

    impl SqlxDurableStore {
        /// # Errors
        /// Returns `AdapterError::Sql` if the pool cannot be established.
        pub async fn connect(url: &str, table: impl Into<String>) -> Result<Self, AdapterError> {
            sqlx::any::install_default_drivers();
            let pool = AnyPoolOptions::new().max_connections(10).connect(url).await?;
            Ok(Self {
                pool,
                table: table.into(),
                backend: SqlBackend::from_url(url),
                initialized: Arc::new(AtomicBool::new(false)),
            })
        }

        fn is_transient(err: &AdapterError) -> bool {
            let AdapterError::Sql(inner) = err else {
                return false;
            };
            let Some(db_err) = inner.as_database_error() else {
                return false;
            };
            let message = db_err.message().to_ascii_lowercase();
            message.contains("busy") || message.contains("locked") || message.contains("timeout")
        }

        /// The `data` column's textual projection: Postgres stores it as
        /// native `jsonb` (§4.3 "on Postgres prefer a native JSON column"),
        /// so it has to be cast back to text to decode uniformly with the
        /// other two backends, which already store `data` as text/JSON text.
        fn select_data_column(&self) -> &'static str {
            match self.backend {
                SqlBackend::Postgres => "data::text",
                SqlBackend::MySql | SqlBackend::Sqlite => "data",
            }
        }

        fn upsert_sql(&self) -> String {
            match self.backend {
                SqlBackend::Postgres => format!(
                    "INSERT INTO {table} (feature_name, data, created_at, updated_at) \
                     VALUES (?, ?::jsonb, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP) \
                     ON CONFLICT (feature_name) DO UPDATE SET data = ?::jsonb, updated_at = CURRENT_TIMESTAMP",
                    table = self.table
                ),
                SqlBackend::Sqlite => format!(
                    "INSERT INTO {table} (feature_name, data, created_at, updated_at) \
                     VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP) \
                     ON CONFLICT (feature_name) DO UPDATE SET data = ?, updated_at = CURRENT_TIMESTAMP",
                    table = self.table
                ),
                SqlBackend::MySql => format!(
                    "INSERT INTO {table} (feature_name, data, created_at, updated_at) \
                     VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP) \
                     ON DUPLICATE KEY UPDATE data = ?, updated_at = CURRENT_TIMESTAMP",
                    table = self.table
                ),
            }
        }

        fn create_table_sql(&self) -> String {
            match self.backend {
                SqlBackend::Postgres => format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                        id SERIAL PRIMARY KEY, \
                        feature_name TEXT NOT NULL UNIQUE, \
                        data JSONB NOT NULL, \
                        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\
                    )",
                    self.table
                ),
                SqlBackend::MySql => format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                        id INT AUTO_INCREMENT PRIMARY KEY, \
                        feature_name VARCHAR(255) NOT NULL UNIQUE, \
                        data JSON NOT NULL, \
                        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\
                    )",
                    self.table
                ),
                SqlBackend::Sqlite => format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                        id INTEGER PRIMARY KEY AUTOINCREMENT, \
                        feature_name TEXT NOT NULL UNIQUE, \
                        data TEXT NOT NULL, \
                        created_at TIMESTAMP NOT NULL, \
                        updated_at TIMESTAMP NOT NULL\
                    )",
                    self.table
                ),
            }
        }
    }

    #[async_trait]
    impl DurableStore for SqlxDurableStore {
        async fn load(&self, flag_name: &str) -> Result<Option<HashMap<String, String>>, AdapterError> {
            let row: Option<(String,)> = sqlx::query_as(&format!(
                "SELECT {} FROM {} WHERE feature_name = ?",
                self.select_data_column(),
                self.table
            ))
            .bind(flag_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|(data,)| serde_json::from_str(&data).unwrap_or_default()))
        }

        async fn store(&self, flag_name: &str, attributes: &HashMap<String, String>) -> Result<(), AdapterError> {
            let data = serde_json::to_string(attributes).unwrap_or_default();
            let sql = self.upsert_sql();
            with_retry(
                || {
                    let data = data.clone();
                    let sql = sql.clone();
                    async move {
                        sqlx::query(&sql)
                            .bind(flag_name)
                            .bind(&data)
                            .bind(&data)
                            .execute(&self.pool)
                            .await
                            .map(|_| ())
                            .map_err(AdapterError::from)
                    }
                },
                Self::is_transient,
            )
            .await
        }

        async fn delete(&self, flag_name: &str) -> Result<(), AdapterError> {
            sqlx::query(&format!("DELETE FROM {} WHERE feature_name = ?", self.table))
                .bind(flag_name)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn load_all_names(&self) -> Result<Vec<String>, AdapterError> {
            let rows: Vec<(String,)> =
                sqlx::query_as(&format!("SELECT feature_name FROM {}", self.table))
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(|(n,)| n).collect())
        }

        /// Idempotent; guarded by a process-local flag so concurrent callers
        /// within the same process issue `CREATE TABLE IF NOT EXISTS` once.
        async fn initialize(&self) -> Result<(), AdapterError> {
            if self.initialized.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            sqlx::query(&self.create_table_sql()).execute(&self.pool).await?;
            Ok(())
        }
    }

}

#[cfg(any(
    feature = "postgres-store",
    feature = "sqlite-store",
    feature = "mysql-store"
))]
pub use sqlx_store::SqlxDurableStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_reads_miss_and_writes_succeed() {
        let store = NullDurableStore;
        assert_eq!(store.load("f").await.unwrap(), None);
        assert!(store.store("f", &HashMap::new()).await.is_ok());
        assert!(store.delete("f").await.is_ok());
        assert_eq!(store.load_all_names().await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn with_retry_succeeds_without_retry_when_op_succeeds_first_try() {
        let mut calls = 0;
        let result: Result<u32, AdapterError> = with_retry(
            || {
                calls += 1;
                async { Ok(42) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_non_transient_error() {
        let mut calls = 0;
        let result: Result<(), AdapterError> = with_retry(
            || {
                calls += 1;
                async { Err(AdapterError::Durable("permanent".to_string())) }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn with_retry_exhausts_schedule_on_persistent_transient_error() {
        let mut calls = 0;
        let result: Result<(), AdapterError> = with_retry(
            || {
                calls += 1;
                async { Err(AdapterError::Durable("locked".to_string())) }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, RETRY_BACKOFF_MS.len() + 1);
    }
}
