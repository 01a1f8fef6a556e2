//! Ember ORM layer over the embedded `SQLite` runtime.
//!
//! Maps plain structs to tables, translates fluent queries into parameterized
//! SQL with ``SeaQuery``, and executes them through [`ember_sql`].
//!
//! # Quick Start
//!
//! ## Define an Entity
//!
//! ```ignore
//! use chrono::{DateTime, Utc};
//!
//! entity! {
//!     table = "posts",
//!     #[derive(Debug, Clone)]
//!     pub struct Post {
//!         pub id: i64,
//!         pub title: String [max_length = 120],
//!         pub published: bool,
//!         pub created_at: DateTime<Utc>,
//!     }
//! }
//! ```
//!
//! The first field named `id` (or marked `[key]`) is the primary key. Integer
//! keys are generated by the engine unless marked `[auto_increment = false]`.
//!
//! ## Querying
//!
//! ```ignore
//! let recent = Query::<Post>::new()?
//!     .filter(Filter::eq("published", true))
//!     .filter(Filter::gt("created_at", Utc::now() - Duration::days(7)))
//!     .order_by_desc("created_at")
//!     .take(10)?
//!     .to_list(&conn)?;
//!
//! let titles: Vec<String> = Query::<Post>::new()?.select("title")?.to_list(&conn)?;
//! ```
//!
//! ## Writing
//!
//! ```ignore
//! let mut post = Post { id: 0, title: "Hello".into(), published: false, created_at: Utc::now() };
//! conn.insert(&mut post)?; // post.id now holds the generated key
//!
//! post.published = true;
//! conn.update(&post)?;
//! conn.delete_many::<Post>(Some(Filter::eq("published", false)))?;
//! ```
//!
//! Every operation has a suspending counterpart on [`Database`]
//! (`to_list_async`, `insert_async`, ...) that runs on the blocking pool.

mod codec;
mod delete;
mod entity;
mod filter;
mod fragment;
mod insert;
mod query;
mod schema;
mod select;
mod store;
mod update;
mod value;

pub use codec::{decode, encode};
pub use delete::DeleteBuilder;
pub use ember_sql::{
    AfterExecute, BeforeExecute, ConnectOptions, Connection, Database, DriverErrorKind,
    EngineKind, Error, ExecutionObserver, RawValue, Result, Row, RowStream, Statement,
    Transaction, TypedValue,
};
pub use entity::{Entity, RowReader};
pub use filter::{CompareOp, Filter, LIKE_ESCAPE, LikeKind};
pub use fragment::{Ordering, QueryFragment, translate};
pub use insert::{Conflict, InsertBuilder, InsertStatement};
pub use query::{Cursor, EntityIter, Projection, Query};
pub use schema::{
    ColumnDef, ColumnSchema, DeclaredType, EntitySchema, MAX_DECIMAL_PRECISION, SchemaBuilder,
    Zone, resolve,
};
pub use select::SelectBuilder;
pub use store::{AsyncEntityStore, EntityStore};
pub use update::UpdateBuilder;
pub use value::{Scalar, Value};
