//! Fluent, immutable query surface.
//!
//! Every builder call returns a new query; the receiver is left untouched, so
//! a common prefix can be reused for several terminal operations. Terminal
//! operations translate and encode on the calling thread, then hand the built
//! statement to the runtime.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ember_sql::{Connection, Database, Error, Prepared, Result, Row, RowIter, Statement};
use futures::stream::{BoxStream, StreamExt};

use crate::entity::{Entity, RowReader, read_column};
use crate::filter::Filter;
use crate::fragment::{Ordering, QueryFragment, check_count, translate};
use crate::schema::{EntitySchema, resolve};
use crate::select::SelectBuilder;
use crate::value::Scalar;

/// A query over entity type `T`.
///
/// ```ignore
/// let adults = Query::<Person>::new()?
///     .filter(Filter::gte("age", 18))
///     .order_by("name")
///     .take(10)?
///     .to_list(&conn)?;
/// ```
pub struct Query<T> {
    schema: Arc<EntitySchema>,
    filters: Vec<Filter>,
    orderings: Vec<Ordering>,
    skip: Option<i64>,
    take: Option<i64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            filters: self.filters.clone(),
            orderings: self.orderings.clone(),
            skip: self.skip,
            take: self.take,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.schema.table)
            .field("filters", &self.filters)
            .field("orderings", &self.orderings)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .finish()
    }
}

impl<T: Entity> Query<T> {
    /// Starts a query over every row of `T`'s table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if `T`'s mapping is invalid.
    pub fn new() -> Result<Self> {
        Ok(Self {
            schema: resolve::<T>()?,
            filters: Vec::new(),
            orderings: Vec::new(),
            skip: None,
            take: None,
            _marker: PhantomData,
        })
    }

    /// The resolved schema.
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Adds a predicate, conjoined with any added before.
    #[must_use]
    pub fn filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.filters.push(filter);
        next
    }

    /// Orders ascending by `property`, after any earlier ordering.
    #[must_use]
    pub fn order_by(&self, property: &'static str) -> Self {
        self.ordered(property, true)
    }

    /// Orders descending by `property`, after any earlier ordering.
    #[must_use]
    pub fn order_by_desc(&self, property: &'static str) -> Self {
        self.ordered(property, false)
    }

    /// Secondary ascending ordering.
    #[must_use]
    pub fn then_by(&self, property: &'static str) -> Self {
        self.ordered(property, true)
    }

    /// Secondary descending ordering.
    #[must_use]
    pub fn then_by_desc(&self, property: &'static str) -> Self {
        self.ordered(property, false)
    }

    fn ordered(&self, property: &'static str, ascending: bool) -> Self {
        let mut next = self.clone();
        next.orderings.push(Ordering { property, ascending });
        next
    }

    /// Skips the first `count` rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeCount`] if `count` is negative.
    pub fn skip(&self, count: i64) -> Result<Self> {
        check_count("skip", Some(count))?;
        let mut next = self.clone();
        next.skip = Some(count);
        Ok(next)
    }

    /// Returns at most `count` rows. `take(0)` returns nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeCount`] if `count` is negative.
    pub fn take(&self, count: i64) -> Result<Self> {
        check_count("take", Some(count))?;
        let mut next = self.clone();
        next.take = Some(count);
        Ok(next)
    }

    /// Projects a single property, decoded as `V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProperty`] if the property is not mapped.
    pub fn select<V: Scalar>(&self, property: &'static str) -> Result<Projection<T, V>> {
        self.schema.column(property)?;
        Ok(Projection {
            query: self.clone(),
            property,
            _marker: PhantomData,
        })
    }

    fn fragment(&self, projection: Option<&str>) -> Result<QueryFragment> {
        translate(&self.schema, &self.filters, &self.orderings, self.skip, self.take, projection)
    }

    /// The SELECT this query runs.
    ///
    /// # Errors
    ///
    /// Returns any translation or encoding error.
    pub fn statement(&self) -> Result<Statement> {
        SelectBuilder::new(&self.schema, self.fragment(None)?).build()
    }

    fn count_statement(&self) -> Result<Statement> {
        SelectBuilder::new(&self.schema, self.fragment(None)?).build_count()
    }

    fn exists_statement(&self) -> Result<Statement> {
        SelectBuilder::new(&self.schema, self.fragment(None)?).build_exists()
    }

    /// Materializes every matching entity.
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub fn to_list(&self, conn: &Connection) -> Result<Vec<T>> {
        let rows = conn.query(self.statement()?, None)?;
        decode_all(&self.schema, rows)
    }

    /// The first entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if nothing matches.
    pub fn first(&self, conn: &Connection) -> Result<T> {
        self.first_or_default(conn)?.ok_or(Error::NoRows)
    }

    /// The first entity, or `None` if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub fn first_or_default(&self, conn: &Connection) -> Result<Option<T>> {
        let rows = conn.query(self.statement()?, Some(1))?;
        first_of(&self.schema, rows)
    }

    /// The only entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if nothing matches and [`Error::MultipleRows`]
    /// if more than one row matches.
    pub fn single(&self, conn: &Connection) -> Result<T> {
        self.single_or_default(conn)?.ok_or(Error::NoRows)
    }

    /// The only entity, or `None` if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MultipleRows`] if more than one row matches.
    pub fn single_or_default(&self, conn: &Connection) -> Result<Option<T>> {
        let rows = conn.query(self.statement()?, Some(2))?;
        single_of(&self.schema, rows)
    }

    /// Counts matching rows with a server-side aggregate.
    ///
    /// # Errors
    ///
    /// Returns any translation or driver error.
    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let rows = conn.query(self.count_statement()?, Some(1))?;
        count_of(rows)
    }

    /// Whether any row matches.
    ///
    /// # Errors
    ///
    /// Returns any translation or driver error.
    pub fn any(&self, conn: &Connection) -> Result<bool> {
        let rows = conn.query(self.exists_statement()?, Some(1))?;
        Ok(!rows.is_empty())
    }

    /// Prepares the query for lazy, forward-only iteration.
    ///
    /// # Errors
    ///
    /// Returns any translation or preparation error.
    pub fn cursor<'conn>(&self, conn: &'conn Connection) -> Result<Cursor<'conn, T>> {
        let prepared = conn.prepare(self.statement()?)?;
        Ok(Cursor {
            prepared,
            schema: Arc::clone(&self.schema),
            _marker: PhantomData,
        })
    }

    /// Materializes every matching entity on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub async fn to_list_async(&self, db: &Database) -> Result<Vec<T>> {
        let statement = self.statement()?;
        let schema = Arc::clone(&self.schema);
        db.run(move |conn| decode_all(&schema, conn.query(statement, None)?)).await
    }

    /// Suspending [`Query::first`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if nothing matches.
    pub async fn first_async(&self, db: &Database) -> Result<T> {
        self.first_or_default_async(db).await?.ok_or(Error::NoRows)
    }

    /// Suspending [`Query::first_or_default`].
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub async fn first_or_default_async(&self, db: &Database) -> Result<Option<T>> {
        let statement = self.statement()?;
        let schema = Arc::clone(&self.schema);
        db.run(move |conn| first_of(&schema, conn.query(statement, Some(1))?)).await
    }

    /// Suspending [`Query::single`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] or [`Error::MultipleRows`] on the wrong cardinality.
    pub async fn single_async(&self, db: &Database) -> Result<T> {
        self.single_or_default_async(db).await?.ok_or(Error::NoRows)
    }

    /// Suspending [`Query::single_or_default`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MultipleRows`] if more than one row matches.
    pub async fn single_or_default_async(&self, db: &Database) -> Result<Option<T>> {
        let statement = self.statement()?;
        let schema = Arc::clone(&self.schema);
        db.run(move |conn| single_of(&schema, conn.query(statement, Some(2))?)).await
    }

    /// Suspending [`Query::count`].
    ///
    /// # Errors
    ///
    /// Returns any translation or driver error.
    pub async fn count_async(&self, db: &Database) -> Result<u64> {
        let statement = self.count_statement()?;
        count_of(db.query(statement, Some(1)).await?)
    }

    /// Suspending [`Query::any`].
    ///
    /// # Errors
    ///
    /// Returns any translation or driver error.
    pub async fn any_async(&self, db: &Database) -> Result<bool> {
        let statement = self.exists_statement()?;
        Ok(!db.query(statement, Some(1)).await?.is_empty())
    }

    /// Streams matching entities, stepping the engine only as the consumer
    /// polls. Dropping the stream finalizes the statement.
    ///
    /// # Errors
    ///
    /// Returns any translation or preparation error.
    pub async fn stream_async(&self, db: &Database) -> Result<BoxStream<'static, Result<T>>> {
        let statement = self.statement()?;
        let schema = Arc::clone(&self.schema);
        let rows = db.stream(statement).await?;
        Ok(rows.map(move |row| row.and_then(|row| decode(&schema, row))).boxed())
    }
}

/// A query projected onto one property.
pub struct Projection<T, V> {
    query: Query<T>,
    property: &'static str,
    _marker: PhantomData<fn() -> V>,
}

impl<T, V> fmt::Debug for Projection<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("query", &self.query)
            .field("property", &self.property)
            .finish()
    }
}

impl<T: Entity, V: Scalar + Send + 'static> Projection<T, V> {
    /// The SELECT this projection runs.
    ///
    /// # Errors
    ///
    /// Returns any translation or encoding error.
    pub fn statement(&self) -> Result<Statement> {
        let fragment = self.query.fragment(Some(self.property))?;
        SelectBuilder::new(&self.query.schema, fragment).build()
    }

    fn decoder(&self) -> impl Fn(Row) -> Result<V> + Send + 'static + use<T, V> {
        column_decoder(Arc::clone(&self.query.schema), self.property)
    }

    /// Every projected value.
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub fn to_list(&self, conn: &Connection) -> Result<Vec<V>> {
        let decode = self.decoder();
        conn.query(self.statement()?, None)?.into_iter().map(decode).collect()
    }

    /// The first value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if nothing matches.
    pub fn first(&self, conn: &Connection) -> Result<V> {
        self.first_or_default(conn)?.ok_or(Error::NoRows)
    }

    /// The first value, or `None` if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub fn first_or_default(&self, conn: &Connection) -> Result<Option<V>> {
        let decode = self.decoder();
        conn.query(self.statement()?, Some(1))?.into_iter().next().map(decode).transpose()
    }

    /// The only value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] or [`Error::MultipleRows`] on the wrong cardinality.
    pub fn single(&self, conn: &Connection) -> Result<V> {
        self.single_or_default(conn)?.ok_or(Error::NoRows)
    }

    /// The only value, or `None` if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MultipleRows`] if more than one row matches.
    pub fn single_or_default(&self, conn: &Connection) -> Result<Option<V>> {
        let decode = self.decoder();
        only(conn.query(self.statement()?, Some(2))?)?.map(decode).transpose()
    }

    /// Suspending [`Projection::to_list`].
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub async fn to_list_async(&self, db: &Database) -> Result<Vec<V>> {
        let statement = self.statement()?;
        let decode = self.decoder();
        db.run(move |conn| conn.query(statement, None)?.into_iter().map(decode).collect()).await
    }

    /// Suspending [`Projection::first`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] if nothing matches.
    pub async fn first_async(&self, db: &Database) -> Result<V> {
        self.first_or_default_async(db).await?.ok_or(Error::NoRows)
    }

    /// Suspending [`Projection::first_or_default`].
    ///
    /// # Errors
    ///
    /// Returns any translation, driver, or decoding error.
    pub async fn first_or_default_async(&self, db: &Database) -> Result<Option<V>> {
        let statement = self.statement()?;
        let decode = self.decoder();
        db.run(move |conn| conn.query(statement, Some(1))?.into_iter().next().map(decode).transpose())
            .await
    }

    /// Suspending [`Projection::single`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRows`] or [`Error::MultipleRows`] on the wrong cardinality.
    pub async fn single_async(&self, db: &Database) -> Result<V> {
        self.single_or_default_async(db).await?.ok_or(Error::NoRows)
    }

    /// Suspending [`Projection::single_or_default`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MultipleRows`] if more than one row matches.
    pub async fn single_or_default_async(&self, db: &Database) -> Result<Option<V>> {
        let statement = self.statement()?;
        let decode = self.decoder();
        db.run(move |conn| only(conn.query(statement, Some(2))?)?.map(decode).transpose()).await
    }
}

/// A prepared query awaiting iteration.
pub struct Cursor<'conn, T> {
    prepared: Prepared<'conn>,
    schema: Arc<EntitySchema>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Cursor<'_, T> {
    /// Starts stepping. Each item steps the engine once; dropping the iterator
    /// early leaves the rest unread and the statement is finalized with the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement was already consumed.
    pub fn iter(&mut self) -> Result<EntityIter<'_, T>> {
        Ok(EntityIter {
            rows: self.prepared.rows()?,
            schema: &self.schema,
            _marker: PhantomData,
        })
    }
}

/// Lazily decoded entities.
pub struct EntityIter<'c, T> {
    rows: RowIter<'c>,
    schema: &'c EntitySchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Iterator for EntityIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| row.and_then(|row| decode(self.schema, row)))
    }
}

fn decode<T: Entity>(schema: &EntitySchema, row: Row) -> Result<T> {
    T::from_row(&mut RowReader::new(schema, row)?)
}

fn decode_all<T: Entity>(schema: &EntitySchema, rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(|row| decode(schema, row)).collect()
}

fn first_of<T: Entity>(schema: &EntitySchema, rows: Vec<Row>) -> Result<Option<T>> {
    rows.into_iter().next().map(|row| decode(schema, row)).transpose()
}

fn single_of<T: Entity>(schema: &EntitySchema, rows: Vec<Row>) -> Result<Option<T>> {
    only(rows)?.map(|row| decode(schema, row)).transpose()
}

fn only(rows: Vec<Row>) -> Result<Option<Row>> {
    let mut rows = rows.into_iter();
    let first = rows.next();
    if rows.next().is_some() {
        return Err(Error::MultipleRows);
    }
    Ok(first)
}

fn column_decoder<V: Scalar>(
    schema: Arc<EntitySchema>, property: &'static str,
) -> impl Fn(Row) -> Result<V> + Send + 'static {
    move |row| read_column(schema.column(property)?, row)
}

fn count_of(rows: Vec<Row>) -> Result<u64> {
    let count = match rows.into_iter().next().and_then(|mut row| row.take(0)) {
        Some(raw) => raw.as_integer("count")?,
        None => 0,
    };
    u64::try_from(count).map_err(|_e| Error::decode("count", format_args!("negative count {count}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::entity! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Item {
            pub id: i64,
            pub label: String,
            pub weight: i32,
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL, weight INTEGER NOT NULL);
             INSERT INTO items VALUES (1, 'A', 10), (2, 'B', 20), (3, 'C', 30);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn builders_do_not_mutate_the_receiver() {
        let base = Query::<Item>::new().unwrap().filter(Filter::gte("weight", 20));
        let heavy = base.filter(Filter::gte("weight", 30));
        let conn = seeded();
        assert_eq!(base.count(&conn).unwrap(), 2);
        assert_eq!(heavy.count(&conn).unwrap(), 1);
        assert_eq!(base.to_list(&conn).unwrap().len(), 2);
    }

    #[test]
    fn negative_pagination_is_rejected() {
        let query = Query::<Item>::new().unwrap();
        assert!(matches!(query.skip(-1), Err(Error::NegativeCount { .. })));
        assert!(matches!(query.take(-1), Err(Error::NegativeCount { .. })));
    }

    #[test]
    fn cardinality() {
        let conn = seeded();
        let all = Query::<Item>::new().unwrap();
        let none = all.filter(Filter::gt("weight", 100));
        let one = all.filter(Filter::eq("label", "B"));

        assert_eq!(all.single(&conn).unwrap_err(), Error::MultipleRows);
        assert_eq!(all.single_or_default(&conn).unwrap_err(), Error::MultipleRows);
        assert_eq!(none.single(&conn).unwrap_err(), Error::NoRows);
        assert_eq!(none.single_or_default(&conn).unwrap(), None);
        assert_eq!(none.first(&conn).unwrap_err(), Error::NoRows);
        assert_eq!(none.first_or_default(&conn).unwrap(), None);
        assert_eq!(one.single(&conn).unwrap().id, 2);
        assert_eq!(all.order_by_desc("id").first(&conn).unwrap().id, 3);
        assert!(one.any(&conn).unwrap());
        assert!(!none.any(&conn).unwrap());
    }

    #[test]
    fn projection_decodes_one_column() {
        let conn = seeded();
        let labels = Query::<Item>::new().unwrap().order_by("id").select::<String>("label").unwrap();
        assert_eq!(labels.to_list(&conn).unwrap(), ["A", "B", "C"]);
        assert_eq!(labels.first(&conn).unwrap(), "A");
        assert!(Query::<Item>::new().unwrap().select::<String>("missing").is_err());
    }

    #[test]
    fn cursor_reads_lazily() {
        let conn = seeded();
        let query = Query::<Item>::new().unwrap().order_by("id");
        let mut cursor = query.cursor(&conn).unwrap();
        let first: Vec<_> = cursor.iter().unwrap().take(2).map(Result::unwrap).collect();
        assert_eq!(first.iter().map(|i| i.id).collect::<Vec<_>>(), [1, 2]);
    }
}
