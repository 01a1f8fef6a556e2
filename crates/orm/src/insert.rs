use ember_sql::{Error, Result, Statement, TypedValue};
use sea_query::{Alias, OnConflict, SimpleExpr, SqliteQueryBuilder};

use crate::fragment::{self, to_sea};
use crate::schema::EntitySchema;
use crate::value::Value;

/// What to do when the primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Fail with the engine's constraint error.
    Fail,
    /// Overwrite every non-key column with the new values.
    Update,
    /// Keep the existing row untouched.
    Ignore,
}

/// A built INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// SQL and parameters.
    pub statement: Statement,
    /// Whether the statement returns the generated key as a single-column row.
    pub returns_key: bool,
}

/// Builder for constructing INSERT queries from an entity's column values.
pub struct InsertBuilder<'a> {
    schema: &'a EntitySchema,
    values: Vec<Value>,
    conflict: Conflict,
}

impl<'a> InsertBuilder<'a> {
    /// Populate from the values of every mapped column, in schema order.
    #[must_use]
    pub const fn from_values(schema: &'a EntitySchema, values: Vec<Value>) -> Self {
        Self {
            schema,
            values,
            conflict: Conflict::Fail,
        }
    }

    /// On key conflict, overwrite every non-key column.
    #[must_use]
    pub const fn on_conflict_update(mut self) -> Self {
        self.conflict = Conflict::Update;
        self
    }

    /// On key conflict, keep the existing row.
    #[must_use]
    pub const fn on_conflict_ignore(mut self) -> Self {
        self.conflict = Conflict::Ignore;
        self
    }

    /// Build the INSERT query.
    ///
    /// An unset auto-increment key (`0` or NULL) is left out of the column
    /// list and requested back with `RETURNING`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if a conflict clause is requested on an
    /// entity without a key or the value count does not match the schema, and
    /// any validation error raised while encoding a value.
    pub fn build(self) -> Result<InsertStatement> {
        let schema = self.schema;
        let mapped: Vec<_> = schema.mapped().collect();
        if mapped.len() != self.values.len() {
            return Err(Error::mapping(
                schema.entity,
                format!("expected {} values, got {}", mapped.len(), self.values.len()),
            ));
        }
        let key = match self.conflict {
            Conflict::Fail => schema.key(),
            Conflict::Update | Conflict::Ignore => Some(schema.require_key()?),
        };

        let mut columns = Vec::with_capacity(mapped.len());
        let mut row: Vec<SimpleExpr> = Vec::with_capacity(mapped.len());
        let mut kinds = Vec::with_capacity(mapped.len());
        for (column, value) in mapped.iter().zip(self.values) {
            let is_key = key.is_some_and(|k| k.column == column.column);
            if is_key && schema.auto_increment && is_unset(&value) {
                continue;
            }
            let typed = column.encode(value)?;
            columns.push(Alias::new(column.column.as_str()));
            kinds.push(typed.kind);
            row.push(SimpleExpr::Value(to_sea(typed.value)));
        }

        if columns.is_empty() {
            return Ok(default_values(schema));
        }

        let mut statement = sea_query::Query::insert();
        statement.into_table(Alias::new(schema.table.as_str()));
        statement.columns(columns);
        statement.values(row).map_err(|e| Error::mapping(schema.entity, e.to_string()))?;

        if let Some(key) = key {
            let target = Alias::new(key.column.as_str());
            let non_key: Vec<_> = mapped
                .iter()
                .filter(|c| c.column != key.column)
                .map(|c| Alias::new(c.column.as_str()))
                .collect();
            match self.conflict {
                Conflict::Fail => {}
                Conflict::Update if !non_key.is_empty() => {
                    statement.on_conflict(OnConflict::column(target).update_columns(non_key).to_owned());
                }
                Conflict::Update | Conflict::Ignore => {
                    statement.on_conflict(OnConflict::column(target).do_nothing().to_owned());
                }
            }
            statement.returning_col(Alias::new(key.column.as_str()));
        }

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "InsertBuilder generated SQL"
        );

        Ok(InsertStatement {
            statement,
            returns_key: key.is_some(),
        })
    }
}

/// Whether `value` marks an auto-increment key the engine should generate.
#[must_use]
pub const fn is_unset(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Int(0) | Value::UInt(0))
}

// Only the generated key: nothing to list, so fall back to the column defaults.
fn default_values(schema: &EntitySchema) -> InsertStatement {
    let quote = |name: &str| format!("\"{}\"", name.replace('"', "\"\""));
    let table = quote(&schema.table);
    let sql = match schema.key() {
        Some(key) => format!("INSERT INTO {table} DEFAULT VALUES RETURNING {}", quote(&key.column)),
        None => format!("INSERT INTO {table} DEFAULT VALUES"),
    };
    tracing::debug!(table = %schema.table, sql = %sql, param_count = 0, "InsertBuilder generated SQL");

    InsertStatement {
        statement: Statement::new(sql, Vec::<TypedValue>::new()),
        returns_key: schema.key().is_some(),
    }
}
