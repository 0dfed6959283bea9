//! Database manager implementation
//!
//! This module provides the pooled connection source used by every
//! repository:
//! - SQLite connection pool using r2d2, sized from `PoolConfig`
//! - Pre-warming of `initial_size` connections at startup
//! - Closing of surplus idle connections on release (`max_idle`)
//! - Async wrapper running blocking statements off the runtime

use crate::core::config::{DatabaseConfig, DatabaseTarget, PoolConfig};
use crate::core::error::{ErrorContext, LibraryError, Result};
use r2d2::{ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;
use tokio::task;
use tracing::{debug, info};

/// A pooled SQLite connection plus a flag asking the pool to close it
/// instead of parking it as idle
pub struct ManagedConnection {
    conn: Connection,
    retire: bool,
}

/// r2d2 manager delegating to `SqliteConnectionManager` and honouring the
/// retire flag when a connection comes back
pub struct LibraryConnectionManager {
    inner: SqliteConnectionManager,
}

impl ManageConnection for LibraryConnectionManager {
    type Connection = ManagedConnection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<ManagedConnection, rusqlite::Error> {
        self.inner.connect().map(|conn| ManagedConnection { conn, retire: false })
    }

    fn is_valid(&self, conn: &mut ManagedConnection) -> std::result::Result<(), rusqlite::Error> {
        self.inner.is_valid(&mut conn.conn)
    }

    fn has_broken(&self, conn: &mut ManagedConnection) -> bool {
        conn.retire || self.inner.has_broken(&mut conn.conn)
    }
}

/// A connection checked out of the pool. Returned to the pool on drop, or
/// closed if the pool already holds `max_idle` idle connections.
///
/// `max_idle` is a soft bound: the idle count is read before the connection
/// is parked, so connections released at the same moment may each see room
/// and leave the pool briefly holding more than `max_idle` idle.
pub struct PooledConnection {
    inner: r2d2::PooledConnection<LibraryConnectionManager>,
    pool: Pool<LibraryConnectionManager>,
    max_idle: u32,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.inner.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let idle = self.pool.state().idle_connections;
        if idle >= self.max_idle {
            debug!(idle, max_idle = self.max_idle, "Closing surplus connection on release");
            self.inner.retire = true;
        }
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: u32,
    pub connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// Pooled connection provider shared by all repositories
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<LibraryConnectionManager>,
    target: DatabaseTarget,
    max_idle: u32,
}

impl DatabaseManager {
    /// Build the pool described by `config` and pre-warm it. Fails if the
    /// configuration is invalid or the initial connections cannot be opened.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let target = config.target()?;

        if config.username.is_some() || config.password.is_some() {
            debug!("SQLite ignores username/password; credentials not used");
        }

        let busy_timeout = config.busy_timeout();
        let sqlite = match &target {
            DatabaseTarget::File(path) => {
                ensure_parent_dir(path)?;
                SqliteConnectionManager::file(path).with_init(move |conn| {
                    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                    conn.busy_timeout(busy_timeout)?;
                    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                    Ok(())
                })
            }
            DatabaseTarget::Memory => SqliteConnectionManager::memory().with_init(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                Ok(())
            }),
        };

        let pool_config = match target {
            // Every in-memory connection is a separate database, so the pool
            // must hold exactly one and never recycle it.
            DatabaseTarget::Memory => PoolConfig {
                initial_size: 1,
                max_total: 1,
                max_idle: 1,
                min_idle: 1,
                max_wait_ms: config.pool.max_wait_ms,
            },
            DatabaseTarget::File(_) => config.pool.clone(),
        };

        Self::build(sqlite, target, &pool_config)
    }

    /// Single-connection in-memory database with the schema applied
    pub fn new_in_memory() -> Result<Self> {
        let sqlite = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool_config = PoolConfig {
            initial_size: 1,
            max_total: 1,
            max_idle: 1,
            min_idle: 1,
            max_wait_ms: 30_000,
        };

        let manager = Self::build(sqlite, DatabaseTarget::Memory, &pool_config)?;
        manager.migrate()?;
        Ok(manager)
    }

    fn build(
        sqlite: SqliteConnectionManager,
        target: DatabaseTarget,
        pool_config: &PoolConfig,
    ) -> Result<Self> {
        let mut builder = Pool::builder()
            .max_size(pool_config.max_total)
            .min_idle(Some(pool_config.min_idle))
            .connection_timeout(pool_config.max_wait());

        if target == DatabaseTarget::Memory {
            builder = builder.idle_timeout(None).max_lifetime(None);
        }

        // build() waits for min_idle connections and fails if they cannot be opened
        let pool = builder.build(LibraryConnectionManager { inner: sqlite })?;

        let manager = Self {
            pool,
            target,
            max_idle: pool_config.max_idle,
        };
        manager.prewarm(pool_config.initial_size)?;

        info!(
            database = ?manager.target,
            max_total = pool_config.max_total,
            min_idle = pool_config.min_idle,
            max_idle = pool_config.max_idle,
            max_wait_ms = pool_config.max_wait_ms,
            connections = manager.pool.state().connections,
            "Connection pool ready"
        );

        Ok(manager)
    }

    /// Open `initial_size` connections by holding that many at once
    fn prewarm(&self, initial_size: u32) -> Result<()> {
        let held = (0..initial_size)
            .map(|_| self.get_connection())
            .collect::<Result<Vec<_>>>()?;
        debug!(count = held.len(), "Pre-warmed connections");
        Ok(())
    }

    /// Acquire a connection, blocking up to the configured wait bound
    pub fn get_connection(&self) -> Result<PooledConnection> {
        let inner = self.pool.get()?;
        Ok(PooledConnection {
            inner,
            pool: self.pool.clone(),
            max_idle: self.max_idle,
        })
    }

    /// Acquire a connection, blocking up to `timeout` instead of the configured bound
    pub fn get_connection_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        let inner = self.pool.get_timeout(timeout)?;
        Ok(PooledConnection {
            inner,
            pool: self.pool.clone(),
            max_idle: self.max_idle,
        })
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Run a database operation on the blocking thread pool
    ///
    /// The connection is acquired inside the blocking task and released when
    /// the closure returns, whether it succeeded or failed.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.clone();

        task::spawn_blocking(move || {
            let conn = manager.get_connection()?;
            f(&conn)
        })
        .await
        .map_err(|e| LibraryError::TaskError(format!("Database task panicked: {}", e)))?
    }

    /// Apply pending schema migrations; returns how many were applied
    pub fn migrate(&self) -> Result<usize> {
        let mut conn = self.get_connection()?;
        crate::db::migrations::run_migrations(&mut conn)
    }

    /// Current schema version recorded in the database
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.get_connection()?;
        crate::db::migrations::current_version(&conn)
    }

    /// Where this pool's database lives
    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    /// Get the maximum pool size
    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Get the number of idle connections in the pool
    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }

    /// Get the number of connections currently checked out
    pub fn active_connections(&self) -> u32 {
        let state = self.pool.state();
        state.connections - state.idle_connections
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            max_size: self.pool.max_size(),
            connections: state.connections,
            idle_connections: state.idle_connections,
            active_connections: state.connections - state.idle_connections,
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create database directory {}", parent.display()))?;
    }
    Ok(())
}
