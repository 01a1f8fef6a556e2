//! Caller-managed transaction scope.

use std::ops::Deref;

use crate::connection::Connection;
use crate::error::Result;

/// An open transaction.
///
/// Operations run through the transaction share its connection. The
/// transaction rolls back when dropped unless [`Transaction::commit`] was called.
#[derive(Debug)]
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    active: bool,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn begin(conn: &'conn Connection) -> Result<Self> {
        conn.control("BEGIN")?;
        tracing::trace!("transaction started");
        Ok(Self { conn, active: true })
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns the engine's error; the transaction is then rolled back on drop.
    pub fn commit(mut self) -> Result<()> {
        self.conn.control("COMMIT")?;
        self.active = false;
        tracing::trace!("transaction committed");
        Ok(())
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the rollback fails.
    pub fn rollback(mut self) -> Result<()> {
        self.active = false;
        self.conn.control("ROLLBACK")?;
        tracing::trace!("transaction rolled back");
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.active
            && !self.conn.is_autocommit()
            && let Err(e) = self.conn.control("ROLLBACK")
        {
            tracing::warn!(error = %e, "implicit rollback failed");
        }
    }
}
