//! Database connection pool.
//!
//! Supports multiple backends:
//! - Local SQLite file: `path/to/db.sqlite` or `file:path` or `sqlite://path`
//! - In-memory: `:memory:`
//! - Remote Turso: `libsql://...` or `https://...` (requires TURSO_AUTH_TOKEN env var)

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use libsql::{Builder, Connection, Database};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use crate::config::Db as DbConfig;
use crate::{Error, Result};

const MEMORY: &str = ":memory:";

/// Open the database described by `config`.
///
/// # URL formats
/// - Local file: `mydata.db`, `file:path/to/db.sqlite`, `sqlite://path`
/// - In-memory: `:memory:`
/// - Remote Turso: `libsql://your-db.turso.io` (requires `TURSO_AUTH_TOKEN` env var)
pub async fn connect(config: &DbConfig) -> Result<Pool> {
    match config.driver.as_str() {
        "sqlite" | "sqlite3" | "libsql" => {}
        other => {
            return Err(Error::Config(format!("Unsupported database driver: {other}")));
        }
    }

    let url = config.dsn.as_str();
    let db = if url.starts_with("libsql://") || url.starts_with("https://") {
        let token = std::env::var("TURSO_AUTH_TOKEN").map_err(|_| {
            Error::Config("TURSO_AUTH_TOKEN not set for remote database".into())
        })?;
        Builder::new_remote(url.to_string(), token).build().await?
    } else if url == MEMORY {
        Builder::new_local(MEMORY).build().await?
    } else {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("file:"))
            .unwrap_or(url);
        Builder::new_local(path).build().await?
    };

    let mut max_open = match config.max_open_conns {
        0 => crate::config::default_max_open_conns(),
        n => n,
    };
    let mut max_idle = config.max_idle_conns.min(max_open);
    // Every in-memory connection would be its own database
    if url == MEMORY {
        max_open = 1;
        max_idle = 1;
    }

    let first = db.connect()?;
    tracing::debug!("Connected to {} database (max open {max_open}, max idle {max_idle})", config.driver);

    let pool = Pool {
        inner: Arc::new(PoolInner {
            db,
            permits: Arc::new(Semaphore::new(max_open)),
            idle: Mutex::new(Vec::new()),
            max_open,
            max_idle,
        }),
    };
    pool.inner.release(first);
    Ok(pool)
}

struct PoolInner {
    db: Database,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
    max_open: usize,
    max_idle: usize,
}

impl PoolInner {
    fn take_idle(&self) -> Option<Connection> {
        self.idle.lock().ok()?.pop()
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock()
            && idle.len() < self.max_idle
        {
            idle.push(conn);
        }
    }
}

/// A bounded set of connections to one database. Cloning shares the pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("max_open", &self.inner.max_open)
            .field("max_idle", &self.inner.max_idle)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl Pool {
    /// Wait for a free slot and hand out a connection, reusing an idle one
    /// when available.
    pub async fn get(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::database("Database Error - pool closed"))?;

        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => self.inner.db.connect()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn max_open(&self) -> usize {
        self.inner.max_open
    }

    pub fn max_idle(&self) -> usize {
        self.inner.max_idle
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A connection checked out of a [`Pool`]. Returned on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// Re-export commonly used libsql types for convenience
pub use libsql::{Connection as DbConnection, Row, Transaction, params};
