//! Entity create, update, and delete operations.

use ember_sql::{Connection, Database, Error, RawValue, Result};

use crate::delete::DeleteBuilder;
use crate::entity::Entity;
use crate::filter::Filter;
use crate::insert::{Conflict, InsertBuilder, InsertStatement};
use crate::query::Query;
use crate::schema::{EntitySchema, resolve};
use crate::update::UpdateBuilder;
use crate::value::Value;

/// Synchronous entity operations, implemented for [`Connection`] and usable
/// on a [`Transaction`](ember_sql::Transaction) through deref.
pub trait EntityStore {
    /// Inserts `entity`, writing an engine-generated key back onto it.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any SQL runs, or the engine's error.
    fn insert<T: Entity>(&self, entity: &mut T) -> Result<()>;

    /// Inserts every entity in one transaction, joining the caller's
    /// transaction if one is open. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns the first failure; earlier inserts are rolled back with the
    /// transaction this call opened.
    fn insert_all<T: Entity>(&self, entities: &mut [T]) -> Result<usize>;

    /// Overwrites every non-key column of the row with `entity`'s key.
    /// Returns the number of rows changed, `0` if the row does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or a validation or engine error.
    fn update<T: Entity>(&self, entity: &T) -> Result<usize>;

    /// Deletes the row with `entity`'s key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or an engine error.
    fn delete<T: Entity>(&self, entity: &T) -> Result<usize>;

    /// Deletes the row whose key equals `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or an engine error.
    fn delete_by_key<T: Entity>(&self, key: impl Into<Value>) -> Result<usize>;

    /// Deletes every row matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPredicate`] before any SQL is built if `predicate` is `None`.
    fn delete_many<T: Entity>(&self, predicate: Option<Filter>) -> Result<usize>;

    /// Inserts `entity`, or overwrites every non-key column if its key exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or a validation or engine error.
    fn upsert<T: Entity>(&self, entity: &T) -> Result<usize>;

    /// Inserts `entity` unless its key exists. Returns `0` if it was ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or a validation or engine error.
    fn insert_or_ignore<T: Entity>(&self, entity: &T) -> Result<usize>;

    /// Loads the entity whose key equals `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no key, or an engine or decoding error.
    fn find<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>>;
}

impl EntityStore for Connection {
    fn insert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Fail)?;
        let (_, key) = execute_insert(self, &schema, insert)?;
        write_back(&schema, entity, key)
    }

    fn insert_all<T: Entity>(&self, entities: &mut [T]) -> Result<usize> {
        let schema = resolve::<T>()?;
        let inserts = entities
            .iter()
            .map(|e| build_insert(&schema, e, Conflict::Fail))
            .collect::<Result<Vec<_>>>()?;

        let keys = insert_batch(self, &schema, inserts)?;
        for (entity, key) in entities.iter_mut().zip(keys) {
            write_back(&schema, entity, key)?;
        }
        Ok(entities.len())
    }

    fn update<T: Entity>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        match UpdateBuilder::from_values(&schema, entity.to_values()).build()? {
            Some(statement) => self.execute(statement),
            None => Ok(0),
        }
    }

    fn delete<T: Entity>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let key = key_value(&schema, entity)?;
        self.execute(DeleteBuilder::by_key(&schema, key).build()?)
    }

    fn delete_by_key<T: Entity>(&self, key: impl Into<Value>) -> Result<usize> {
        let schema = resolve::<T>()?;
        self.execute(DeleteBuilder::by_key(&schema, key).build()?)
    }

    fn delete_many<T: Entity>(&self, predicate: Option<Filter>) -> Result<usize> {
        let schema = resolve::<T>()?;
        self.execute(DeleteBuilder::matching(&schema, predicate).build()?)
    }

    fn upsert<T: Entity>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Update)?;
        execute_insert(self, &schema, insert).map(|(affected, _)| affected)
    }

    fn insert_or_ignore<T: Entity>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Ignore)?;
        execute_insert(self, &schema, insert).map(|(affected, _)| affected)
    }

    fn find<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        by_key::<T>(key.into())?.first_or_default(self)
    }
}

/// Suspending entity operations, implemented for [`Database`]. Statements are
/// built and values encoded before the work is dispatched to the blocking pool.
pub trait AsyncEntityStore {
    /// Suspending [`EntityStore::insert`].
    fn insert_async<T: Entity>(&self, entity: &mut T) -> impl Future<Output = Result<()>> + Send;

    /// Suspending [`EntityStore::insert_all`].
    fn insert_all_async<T: Entity>(
        &self, entities: &mut [T],
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::update`].
    fn update_async<T: Entity + Sync>(&self, entity: &T) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::delete`].
    fn delete_async<T: Entity + Sync>(&self, entity: &T) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::delete_by_key`].
    fn delete_by_key_async<T: Entity>(
        &self, key: impl Into<Value> + Send,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::delete_many`].
    fn delete_many_async<T: Entity>(
        &self, predicate: Option<Filter>,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::upsert`].
    fn upsert_async<T: Entity + Sync>(&self, entity: &T) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::insert_or_ignore`].
    fn insert_or_ignore_async<T: Entity + Sync>(
        &self, entity: &T,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Suspending [`EntityStore::find`].
    fn find_async<T: Entity>(
        &self, key: impl Into<Value> + Send,
    ) -> impl Future<Output = Result<Option<T>>> + Send;
}

impl AsyncEntityStore for Database {
    async fn insert_async<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Fail)?;
        let shared = std::sync::Arc::clone(&schema);
        let (_, key) = self.run(move |conn| execute_insert(conn, &shared, insert)).await?;
        write_back(&schema, entity, key)
    }

    async fn insert_all_async<T: Entity>(&self, entities: &mut [T]) -> Result<usize> {
        let schema = resolve::<T>()?;
        let inserts = entities
            .iter()
            .map(|e| build_insert(&schema, e, Conflict::Fail))
            .collect::<Result<Vec<_>>>()?;

        let shared = std::sync::Arc::clone(&schema);
        let keys = self.run(move |conn| insert_batch(conn, &shared, inserts)).await?;
        for (entity, key) in entities.iter_mut().zip(keys) {
            write_back(&schema, entity, key)?;
        }
        Ok(entities.len())
    }

    async fn update_async<T: Entity + Sync>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let statement = UpdateBuilder::from_values(&schema, entity.to_values()).build()?;
        match statement {
            Some(statement) => self.execute(statement).await,
            None => Ok(0),
        }
    }

    async fn delete_async<T: Entity + Sync>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let statement = DeleteBuilder::by_key(&schema, key_value(&schema, entity)?).build()?;
        self.execute(statement).await
    }

    async fn delete_by_key_async<T: Entity>(&self, key: impl Into<Value> + Send) -> Result<usize> {
        let schema = resolve::<T>()?;
        let statement = DeleteBuilder::by_key(&schema, key).build()?;
        self.execute(statement).await
    }

    async fn delete_many_async<T: Entity>(&self, predicate: Option<Filter>) -> Result<usize> {
        let schema = resolve::<T>()?;
        let statement = DeleteBuilder::matching(&schema, predicate).build()?;
        self.execute(statement).await
    }

    async fn upsert_async<T: Entity + Sync>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Update)?;
        self.run(move |conn| execute_insert(conn, &schema, insert).map(|(affected, _)| affected)).await
    }

    async fn insert_or_ignore_async<T: Entity + Sync>(&self, entity: &T) -> Result<usize> {
        let schema = resolve::<T>()?;
        let insert = build_insert(&schema, entity, Conflict::Ignore)?;
        self.run(move |conn| execute_insert(conn, &schema, insert).map(|(affected, _)| affected)).await
    }

    async fn find_async<T: Entity>(&self, key: impl Into<Value> + Send) -> Result<Option<T>> {
        let query = by_key::<T>(key.into())?;
        query.first_or_default_async(self).await
    }
}

fn build_insert<T: Entity>(schema: &EntitySchema, entity: &T, conflict: Conflict) -> Result<InsertStatement> {
    let builder = InsertBuilder::from_values(schema, entity.to_values());
    match conflict {
        Conflict::Fail => builder,
        Conflict::Update => builder.on_conflict_update(),
        Conflict::Ignore => builder.on_conflict_ignore(),
    }
    .build()
}

/// Runs an insert, returning the rows affected and the key the engine reported.
fn execute_insert(
    conn: &Connection, schema: &EntitySchema, insert: InsertStatement,
) -> Result<(usize, Option<Value>)> {
    if !insert.returns_key {
        return Ok((conn.execute(insert.statement)?, None));
    }

    let rows = conn.query(insert.statement, None)?;
    let affected = rows.len();
    let key = match rows.into_iter().next() {
        Some(mut row) => {
            let raw = row.take(0).unwrap_or(RawValue::Null);
            Some(schema.require_key()?.decode(raw)?)
        }
        None => None,
    };
    Ok((affected, key))
}

fn insert_batch(
    conn: &Connection, schema: &EntitySchema, inserts: Vec<InsertStatement>,
) -> Result<Vec<Option<Value>>> {
    let run = |conn: &Connection| {
        inserts
            .into_iter()
            .map(|insert| execute_insert(conn, schema, insert).map(|(_, key)| key))
            .collect::<Result<Vec<_>>>()
    };

    if !conn.is_autocommit() {
        return run(conn);
    }
    let tx = conn.begin()?;
    let keys = run(&tx)?;
    tx.commit()?;
    Ok(keys)
}

fn write_back<T: Entity>(schema: &EntitySchema, entity: &mut T, key: Option<Value>) -> Result<()> {
    match (schema.key(), key) {
        (Some(column), Some(value)) if schema.auto_increment => entity.assign(column.property, value),
        _ => Ok(()),
    }
}

fn key_value<T: Entity>(schema: &EntitySchema, entity: &T) -> Result<Value> {
    let key = schema.require_key()?;
    let index = schema
        .mapped()
        .position(|c| c.column == key.column)
        .ok_or_else(|| Error::mapping(schema.entity, "primary key is not mapped"))?;
    entity
        .to_values()
        .into_iter()
        .nth(index)
        .ok_or_else(|| Error::mapping(schema.entity, "entity is missing its key value"))
}

fn by_key<T: Entity>(key: Value) -> Result<Query<T>> {
    let query = Query::<T>::new()?;
    let property = query.schema().require_key()?.property;
    Ok(query.filter(Filter::eq(property, key)))
}
