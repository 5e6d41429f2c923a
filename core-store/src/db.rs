//! SQLite pool setup for [`SqliteBackend`].
//!
//! Files are opened in WAL mode so the background sync can write while the
//! UI reads. Tables are not created here; the backend derives them from the
//! store schema on `initialize`.
//!
//! [`SqliteBackend`]: crate::adapters::SqliteBackend

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const STATEMENT_CACHE: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Private to one connection; gone when the pool closes
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked file before `SQLITE_BUSY`
    pub busy_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: DatabaseLocation::File(path.as_ref().to_path_buf()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }

    /// In-memory database for tests. Each `:memory:` connection is its own
    /// database, so the pool holds exactly one connection and never drops it.
    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            max_connections: 1,
            idle_timeout: None,
            ..Self::new("")
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            DatabaseLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            DatabaseLocation::Memory => SqliteConnectOptions::new().in_memory(true),
        };
        options
            .busy_timeout(self.busy_timeout)
            .statement_cache_capacity(STATEMENT_CACHE)
    }

    fn describe(&self) -> String {
        match &self.location {
            DatabaseLocation::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            DatabaseLocation::Memory => ":memory:".to_string(),
        }
    }
}

/// Open a pool and check that it answers a query.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let database = config.describe();
    debug!(database = %database, max_connections = config.max_connections, "Opening SQLite pool");

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);
    if config.location == DatabaseLocation::Memory {
        pool_options = pool_options.min_connections(1).max_lifetime(None);
    }

    let pool = match pool_options.connect_with(config.connect_options()).await {
        Ok(pool) => pool,
        Err(err) => {
            warn!(database = %database, error = %err, "Could not open SQLite database");
            return Err(err.into());
        }
    };

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(database = %database, "SQLite pool ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_answers_queries() {
        let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_file_config() {
        let config = DatabaseConfig::new("/tmp/logbody.db")
            .max_connections(0)
            .busy_timeout(Duration::from_secs(1));

        assert_eq!(
            config.location,
            DatabaseLocation::File(PathBuf::from("/tmp/logbody.db"))
        );
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
        assert_eq!(config.describe(), "logbody.db");
    }

    #[test]
    fn test_memory_config_keeps_single_connection() {
        let config = DatabaseConfig::in_memory();
        assert_eq!(config.location, DatabaseLocation::Memory);
        assert_eq!(config.max_connections, 1);
        assert!(config.idle_timeout.is_none());
    }
}
