//! Asynchronous database handle.
//!
//! Driver calls block, so every operation runs on the blocking thread pool with
//! an exclusively-owned pooled connection. Dropping the returned future
//! interrupts the engine so an in-flight statement is abandoned promptly.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::task::{Context as TaskContext, Poll};

use anyhow::Context;
use futures::Stream;
use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::{ExecutionObserver, Observers};
use crate::options::ConnectOptions;
use crate::pool::{Pool, PooledConnection};
use crate::statement::Statement;
use crate::transaction::Transaction;
use crate::value::Row;

/// Cloneable, pooled handle to the embedded database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool,
    observers: Observers,
}

impl Database {
    /// Connects using options loaded from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be loaded or the database cannot be opened.
    pub async fn connect() -> anyhow::Result<Self> {
        let options = ConnectOptions::load()?;
        Self::connect_with(options).await
    }

    /// Connects using `options`, opening one connection up front to validate them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    #[instrument]
    pub async fn connect_with(options: ConnectOptions) -> anyhow::Result<Self> {
        tracing::debug!("initializing SQLite pool for: {}", options.database);

        let observers = Observers::default();
        let pool = Pool::new(options, observers.clone());
        drop(pool.acquire().await.context("failed to open SQLite database")?);

        Ok(Self { pool, observers })
    }

    /// Adds an observer notified for every statement run through this handle.
    pub fn subscribe(&self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.subscribe(observer);
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Checks out a connection for exclusive use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if no connection can be provided.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.pool.acquire().await
    }

    /// Runs `f` against a pooled connection on the blocking thread pool.
    ///
    /// Each statement `f` executes without an explicit transaction is its own
    /// implicit unit of work.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or [`Error::Cancelled`] if the task was aborted.
    pub async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = self.pool.acquire().await?;
        let guard = InterruptOnDrop::new(conn.interrupt_handle());
        let done = guard.done();

        let task = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            *done.lock() = true;
            drop(conn);
            result
        });

        let joined = task.await;
        guard.disarm();
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Runs `f` inside a transaction, committing if it returns `Ok` and rolling
    /// back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from the commit.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run(move |conn| {
            let tx = conn.begin()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Executes a statement and returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns any preparation or stepping error.
    pub async fn execute(&self, statement: Statement) -> Result<usize> {
        self.run(move |conn| conn.execute(statement)).await
    }

    /// Executes a query and materializes at most `max_rows` rows.
    ///
    /// # Errors
    ///
    /// Returns any preparation, stepping, or decoding error.
    pub async fn query(&self, statement: Statement, max_rows: Option<usize>) -> Result<Vec<Row>> {
        self.run(move |conn| conn.query(statement, max_rows)).await
    }

    /// Streams the rows of a query.
    ///
    /// Preparation happens before this returns, so malformed SQL fails here
    /// rather than on the first poll. The engine is stepped only when the
    /// consumer asks for the next row.
    ///
    /// # Errors
    ///
    /// Returns any error raised while acquiring a connection or preparing the statement.
    pub async fn stream(&self, statement: Statement) -> Result<RowStream> {
        let conn = self.pool.acquire().await?;
        let guard = InterruptOnDrop::new(conn.interrupt_handle());
        let done = guard.done();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (demand_tx, demand_rx) = std_mpsc::channel();
        let (row_tx, row_rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || {
            produce(&conn, statement, ready_tx, &demand_rx, &row_tx);
            *done.lock() = true;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(RowStream {
                rows: row_rx,
                demand: demand_tx,
                requested: false,
                _guard: guard,
            }),
            Ok(Err(e)) => {
                guard.disarm();
                Err(e)
            }
            Err(_) => {
                guard.disarm();
                Err(Error::Cancelled)
            }
        }
    }
}

fn produce(
    conn: &Connection, statement: Statement, ready: oneshot::Sender<Result<()>>,
    demand: &std_mpsc::Receiver<()>, rows: &mpsc::Sender<Result<Row>>,
) {
    let mut prepared = match conn.prepare(statement) {
        Ok(prepared) => prepared,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut iter = match prepared.rows() {
        Ok(iter) => iter,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    // Each demand signal steps the engine exactly once.
    while demand.recv().is_ok() {
        let Some(item) = iter.next() else {
            break;
        };
        let failed = item.is_err();
        if rows.blocking_send(item).is_err() || failed {
            break;
        }
    }
    tracing::trace!("row stream producer finished");
}

/// Lazy, forward-only stream of rows.
///
/// At most one decoded row exists ahead of the consumer. Dropping the stream
/// stops the producer, interrupting an in-flight step, and finalizes the statement.
#[derive(Debug)]
pub struct RowStream {
    rows: mpsc::Receiver<Result<Row>>,
    demand: std_mpsc::Sender<()>,
    requested: bool,
    _guard: InterruptOnDrop,
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if !self.requested {
            if self.demand.send(()).is_err() {
                // Producer already finished; drain whatever it left behind.
                return self.rows.poll_recv(cx);
            }
            self.requested = true;
        }
        let polled = self.rows.poll_recv(cx);
        if polled.is_ready() {
            self.requested = false;
        }
        polled
    }
}

/// Interrupts the connection's running statement when dropped, unless the
/// blocking work has already completed or the guard was disarmed.
pub(crate) struct InterruptOnDrop {
    handle: Option<InterruptHandle>,
    done: Arc<Mutex<bool>>,
}

impl std::fmt::Debug for InterruptOnDrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptOnDrop").field("armed", &self.handle.is_some()).finish()
    }
}

impl InterruptOnDrop {
    fn new(handle: InterruptHandle) -> Self {
        Self {
            handle: Some(handle),
            done: Arc::new(Mutex::new(false)),
        }
    }

    fn done(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.done)
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Holding the lock keeps the connection from returning to the pool mid-interrupt.
        let done = self.done.lock();
        if !*done {
            tracing::debug!("interrupting in-flight statement");
            handle.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::error::DriverErrorKind;

    async fn database(dir: &tempfile::TempDir) -> Database {
        let path = dir.path().join("db.sqlite");
        let db = Database::connect_with(ConnectOptions::new(path.to_string_lossy()))
            .await
            .expect("connect");
        db.run(|conn| {
            conn.execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
                 INSERT INTO items (label) VALUES ('a'), ('b'), ('c');",
            )
        })
        .await
        .expect("seed");
        db
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        let rows = db.query(Statement::sql("SELECT label FROM items ORDER BY id"), None).await;
        assert_eq!(rows.unwrap().len(), 3);

        let affected = db.execute(Statement::sql("DELETE FROM items WHERE id = 1")).await;
        assert_eq!(affected.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute("DELETE FROM items")?;
                Err(Error::NoRows)
            })
            .await;
        assert_eq!(result.unwrap_err(), Error::NoRows);

        let rows = db.query(Statement::sql("SELECT id FROM items"), None).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_yields_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        let stream = db.stream(Statement::sql("SELECT label FROM items ORDER BY id")).await.unwrap();
        let labels: Vec<_> = stream.map(|r| r.unwrap().into_values().remove(0)).collect().await;
        assert_eq!(labels.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_reports_prepare_errors_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        let err = db.stream(Statement::sql("SELECT missing FROM items")).await.unwrap_err();
        assert_eq!(err.driver_kind(), Some(DriverErrorKind::Syntax));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_stream_releases_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir).await;

        let mut stream = db.stream(Statement::sql("SELECT id FROM items")).await.unwrap();
        assert!(stream.next().await.is_some());
        drop(stream);

        // Every slot is usable again once the producer has finished.
        for _ in 0..db.pool().options().pool_size {
            db.query(Statement::sql("SELECT 1"), None).await.unwrap();
        }
    }
}
