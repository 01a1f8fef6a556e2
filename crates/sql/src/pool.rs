//! Bounded connection pool.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::Observers;
use crate::options::ConnectOptions;

/// Hands out exclusively-owned connections, at most `pool_size` at a time.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    options: ConnectOptions,
    observers: Observers,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
}

impl Pool {
    /// Creates an empty pool; connections are opened on demand.
    #[must_use]
    pub fn new(options: ConnectOptions, observers: Observers) -> Self {
        let permits = Arc::new(Semaphore::new(options.pool_size.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                options,
                observers,
                permits,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Options the pool opens connections with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Waits for a free slot and returns a connection, reusing an idle one if available.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is closed or a new connection cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::Pool(e.to_string()))?;

        let reused = self.inner.idle.lock().pop();
        let conn = if let Some(conn) = reused {
            conn
        } else {
            let options = self.inner.options.clone();
            let observers = self.inner.observers.clone();
            tokio::task::spawn_blocking(move || Connection::open_with(&options, observers))
                .await
                .map_err(|e| Error::Pool(e.to_string()))??
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Stops handing out connections; waiting and future `acquire` calls fail.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }
}

/// A connection checked out of a [`Pool`]. Returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` during drop.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.pool.permits.is_closed() {
            return;
        }
        if !conn.is_autocommit() {
            tracing::warn!("discarding pooled connection left inside a transaction");
            return;
        }
        conn.set_max_parameters(self.pool.options.max_parameters);
        self.pool.idle.lock().push(conn);
    }
}
