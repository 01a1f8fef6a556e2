//! # Ember SQL
//!
//! Execution runtime for the Ember ORM over an embedded `SQLite` engine.
//!
//! The runtime prepares, binds, and steps statements through `rusqlite`,
//! materializes rows, manages transaction scope and pooled connections, and
//! notifies [`ExecutionObserver`]s before and after every statement.
//!
//! ```ignore
//! let db = Database::connect_with(ConnectOptions::new("app.db")).await?;
//! let rows = db.query(Statement::sql("SELECT id, name FROM users"), None).await?;
//! ```

#![forbid(unsafe_code)]

mod connection;
mod database;
mod error;
mod events;
mod options;
mod pool;
mod statement;
mod transaction;
mod value;

pub use connection::Connection;
pub use database::{Database, RowStream};
pub use error::{DriverErrorKind, Error, Result};
pub use events::{AfterExecute, BeforeExecute, ExecutionObserver, Observers, ParameterSummary};
pub use options::{ConnectOptions, EnvOptions};
pub use pool::{Pool, PooledConnection};
pub use statement::{Phase, Prepared, RowIter, Statement};
pub use transaction::Transaction;
pub use value::{BoundParameter, EngineKind, RawValue, Row, TypedValue};
