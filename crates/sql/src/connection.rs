//! Synchronous engine connection.

use std::fmt;
use std::sync::Arc;

use rusqlite::{InterruptHandle, OpenFlags};

use crate::error::{DriverErrorKind, Error, Result};
use crate::events::{ExecutionObserver, Observers};
use crate::options::ConnectOptions;
use crate::statement::{Prepared, Statement};
use crate::transaction::Transaction;
use crate::value::Row;

/// An open connection to the embedded database.
///
/// A connection is owned by one caller at a time; it is `Send` but not `Sync`.
pub struct Connection {
    inner: rusqlite::Connection,
    max_parameters: usize,
    observers: Observers,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.inner.path())
            .field("max_parameters", &self.max_parameters)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens a connection using `options`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverErrorKind::Open`] if the database cannot be opened.
    pub fn open(options: &ConnectOptions) -> Result<Self> {
        Self::open_with(options, Observers::default())
    }

    /// Opens a private in-memory database with default options.
    ///
    /// # Errors
    ///
    /// Returns [`DriverErrorKind::Open`] if the engine cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let inner = rusqlite::Connection::open_in_memory()
            .map_err(|e| Error::driver(DriverErrorKind::Open, &e, None))?;
        Ok(Self {
            inner,
            max_parameters: ConnectOptions::default().max_parameters,
            observers: Observers::default(),
        })
    }

    pub(crate) fn open_with(options: &ConnectOptions, observers: Observers) -> Result<Self> {
        tracing::debug!("opening SQLite connection to: {}", options.database);

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let inner = rusqlite::Connection::open_with_flags(&options.database, flags)
            .map_err(|e| Error::driver(DriverErrorKind::Open, &e, None))?;
        inner
            .busy_timeout(options.busy_timeout)
            .map_err(|e| Error::driver(DriverErrorKind::Open, &e, None))?;

        Ok(Self {
            inner,
            max_parameters: options.max_parameters,
            observers,
        })
    }

    /// Sets the maximum number of parameters a statement may bind.
    pub const fn set_max_parameters(&mut self, limit: usize) {
        self.max_parameters = limit;
    }

    /// The maximum number of parameters a statement may bind.
    #[must_use]
    pub const fn max_parameters(&self) -> usize {
        self.max_parameters
    }

    /// Adds an execution observer to this connection.
    pub fn subscribe(&self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.subscribe(observer);
    }

    /// Prepares and binds a statement for stepping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyParameters`] before preparation if the statement
    /// binds more parameters than allowed, or a syntax error from the engine.
    pub fn prepare(&self, statement: impl Into<Statement>) -> Result<Prepared<'_>> {
        Prepared::prepare(&self.inner, statement.into(), self.max_parameters, &self.observers)
    }

    /// Executes a statement and returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns any preparation or stepping error.
    pub fn execute(&self, statement: impl Into<Statement>) -> Result<usize> {
        let statement = statement.into();
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing statement");
        self.prepare(statement)?.execute()
    }

    /// Executes a statement and materializes at most `max_rows` rows.
    ///
    /// # Errors
    ///
    /// Returns any preparation, stepping, or decoding error.
    pub fn query(&self, statement: impl Into<Statement>, max_rows: Option<usize>) -> Result<Vec<Row>> {
        let statement = statement.into();
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing query");
        self.prepare(statement)?.collect(max_rows)
    }

    /// Runs one or more parameterless statements, such as schema DDL.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for the first failing statement.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!(sql, "executing batch");
        self.inner
            .execute_batch(sql)
            .map_err(|e| Error::driver(DriverErrorKind::Runtime, &e, Some(sql)))
    }

    /// Begins a transaction scoped to the returned guard.
    ///
    /// The engine allows one active transaction per connection, so calling this
    /// while a transaction is open fails with the engine's error.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the transaction cannot be started.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self)
    }

    /// Whether the connection is outside any explicit transaction.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.inner.is_autocommit()
    }

    /// Handle that aborts whatever the connection is currently stepping.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.inner.get_interrupt_handle()
    }

    /// Rowid of the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.inner.last_insert_rowid()
    }

    pub(crate) fn control(&self, sql: &'static str) -> Result<()> {
        self.prepare(sql)?.execute().map(|_| ())
    }
}
