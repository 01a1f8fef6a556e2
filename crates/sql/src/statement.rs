//! Statements and the per-call prepare/bind/step lifecycle.

use std::sync::Arc;
use std::time::Instant;

use crate::error::{DriverErrorKind, Error, Result};
use crate::events::Observers;
use crate::value::{BoundParameter, RawValue, Row, TypedValue};

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order, ordinals starting at 1.
    pub params: Vec<BoundParameter>,
}

impl Statement {
    /// Creates a statement, numbering `params` from 1 in the order given.
    #[must_use]
    pub fn new(sql: impl Into<String>, params: impl IntoIterator<Item = TypedValue>) -> Self {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(i, p)| BoundParameter {
                ordinal: i + 1,
                kind: p.kind,
                value: p.value,
            })
            .collect();
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters.
    #[must_use]
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::sql(sql)
    }
}

/// Lifecycle phase of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Compiled by the engine, nothing bound.
    Prepared,
    /// Parameters bound, not yet stepped.
    Bound,
    /// At least one step taken.
    Stepping,
    /// Done; the statement can no longer be used.
    Finalized,
}

/// A statement compiled by the engine.
///
/// Tracks its [`Phase`] so that a failure is classified by where it happened:
/// preparation failures are [`DriverErrorKind::Syntax`], stepping failures are
/// [`DriverErrorKind::Constraint`] or [`DriverErrorKind::Runtime`].
pub struct Prepared<'conn> {
    inner: rusqlite::Statement<'conn>,
    tracker: Tracker,
}

struct Tracker {
    statement: Statement,
    phase: Phase,
    observers: Observers,
    started: Instant,
    reported: bool,
}

impl Tracker {
    fn fail(&mut self, err: Error) -> Error {
        tracing::debug!(sql = %self.statement.sql, phase = ?self.phase, error = %err, "statement failed");
        self.finish(Some(&err));
        err
    }

    fn finish(&mut self, error: Option<&Error>) {
        if self.phase != Phase::Finalized {
            tracing::trace!(sql = %self.statement.sql, "statement finalized");
        }
        self.phase = Phase::Finalized;
        if !self.reported {
            self.reported = true;
            self.observers.after(&self.statement.sql, self.started.elapsed(), error);
        }
    }

    fn driver_error(&mut self, kind: DriverErrorKind, err: &rusqlite::Error) -> Error {
        let err = Error::driver(kind, err, Some(&self.statement.sql));
        self.fail(err)
    }
}

impl<'conn> Prepared<'conn> {
    pub(crate) fn prepare(
        conn: &'conn rusqlite::Connection, statement: Statement, max_parameters: usize,
        observers: &Observers,
    ) -> Result<Self> {
        let count = statement.params.len();
        if count > max_parameters {
            return Err(Error::TooManyParameters {
                count,
                limit: max_parameters,
            });
        }

        observers.before(&statement.sql, &statement.params);
        let started = Instant::now();

        let inner = match conn.prepare(&statement.sql) {
            Ok(inner) => inner,
            Err(e) => {
                let err = Error::driver(DriverErrorKind::Syntax, &e, Some(&statement.sql));
                tracing::debug!(sql = %statement.sql, error = %err, "prepare failed");
                observers.after(&statement.sql, started.elapsed(), Some(&err));
                return Err(err);
            }
        };
        tracing::trace!(sql = %statement.sql, "statement prepared");

        let mut prepared = Self {
            inner,
            tracker: Tracker {
                statement,
                phase: Phase::Prepared,
                observers: observers.clone(),
                started,
                reported: false,
            },
        };
        prepared.bind()?;
        Ok(prepared)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.tracker.phase
    }

    /// SQL text of the statement.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.tracker.statement.sql
    }

    fn bind(&mut self) -> Result<()> {
        let expected = self.inner.parameter_count();
        let supplied = self.tracker.statement.params.len();
        if expected != supplied {
            let err = Error::Driver {
                kind: DriverErrorKind::Syntax,
                code: rusqlite::ffi::SQLITE_RANGE,
                message: format!("statement expects {expected} parameters, {supplied} supplied"),
                sql: Some(self.tracker.statement.sql.clone()),
            };
            return Err(self.tracker.fail(err));
        }

        let bound = self
            .tracker
            .statement
            .params
            .iter()
            .try_for_each(|p| self.inner.raw_bind_parameter(p.ordinal, &p.value));
        if let Err(e) = bound {
            return Err(self.tracker.driver_error(DriverErrorKind::Runtime, &e));
        }
        self.tracker.phase = Phase::Bound;
        tracing::trace!(sql = %self.tracker.statement.sql, supplied, "parameters bound");
        Ok(())
    }

    /// Steps the statement to completion and returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns a driver error if the engine rejects the statement.
    pub fn execute(mut self) -> Result<usize> {
        self.tracker.phase = Phase::Stepping;
        match self.inner.raw_execute() {
            Ok(affected) => {
                self.tracker.finish(None);
                Ok(affected)
            }
            Err(e) => Err(self.tracker.driver_error(DriverErrorKind::Runtime, &e)),
        }
    }

    /// Starts stepping through result rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement has already been finalized.
    pub fn rows(&mut self) -> Result<RowIter<'_>> {
        if self.tracker.phase == Phase::Finalized {
            return Err(Error::Driver {
                kind: DriverErrorKind::Runtime,
                code: rusqlite::ffi::SQLITE_MISUSE,
                message: "statement already finalized".to_string(),
                sql: Some(self.tracker.statement.sql.clone()),
            });
        }
        let columns: Arc<[String]> =
            self.inner.column_names().iter().map(ToString::to_string).collect();
        self.tracker.phase = Phase::Stepping;
        Ok(RowIter {
            rows: self.inner.raw_query(),
            tracker: &mut self.tracker,
            columns,
            done: false,
        })
    }

    /// Reads at most `max_rows` rows, then finalizes.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while stepping or decoding.
    pub fn collect(mut self, max_rows: Option<usize>) -> Result<Vec<Row>> {
        let limit = max_rows.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        {
            let mut rows = self.rows()?;
            while out.len() < limit {
                match rows.next() {
                    Some(row) => out.push(row?),
                    None => break,
                }
            }
        }
        self.tracker.finish(None);
        Ok(out)
    }
}

impl Drop for Prepared<'_> {
    fn drop(&mut self) {
        self.tracker.finish(None);
    }
}

/// Forward-only iterator over result rows. Each call to `next` steps the
/// engine once; rows are decoded only as they are requested.
pub struct RowIter<'stmt> {
    rows: rusqlite::Rows<'stmt>,
    tracker: &'stmt mut Tracker,
    columns: Arc<[String]>,
    done: bool,
}

impl RowIter<'_> {
    /// Column names of the result set.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn step(&mut self) -> Result<Option<Row>> {
        let row = match self.rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(Error::driver(DriverErrorKind::Runtime, &e, None)),
        };

        let mut values = Vec::with_capacity(self.columns.len());
        for (i, name) in self.columns.iter().enumerate() {
            let value = row
                .get_ref(i)
                .map_err(|e| Error::decode(name.as_str(), e))
                .and_then(|v| RawValue::from_sqlite(v, name))?;
            values.push(value);
        }
        Ok(Some(Row::new(Arc::clone(&self.columns), values)))
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                self.tracker.finish(None);
                None
            }
            Err(err) => {
                self.done = true;
                let err = match err {
                    Error::Driver { kind, code, message, sql: None } => Error::Driver {
                        kind,
                        code,
                        message,
                        sql: Some(self.tracker.statement.sql.clone()),
                    },
                    other => other,
                };
                Some(Err(self.tracker.fail(err)))
            }
        }
    }
}
