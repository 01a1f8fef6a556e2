use ember_sql::{Error, Result, Statement};
use sea_query::{Alias, Expr, SqliteQueryBuilder};

use crate::fragment::{self, to_sea};
use crate::schema::EntitySchema;
use crate::value::Value;

/// Builder for constructing a by-key UPDATE from an entity's column values.
pub struct UpdateBuilder<'a> {
    schema: &'a EntitySchema,
    values: Vec<Value>,
}

impl<'a> UpdateBuilder<'a> {
    /// Populate from the values of every mapped column, in schema order.
    #[must_use]
    pub const fn from_values(schema: &'a EntitySchema, values: Vec<Value>) -> Self {
        Self { schema, values }
    }

    /// Build the UPDATE query: every non-key column is set, restricted to the
    /// row whose key equals the entity's key.
    ///
    /// Returns `None` when the entity has no non-key columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no primary key, and any
    /// validation error raised while encoding a value.
    pub fn build(self) -> Result<Option<Statement>> {
        let schema = self.schema;
        let key = schema.require_key()?;
        let mapped: Vec<_> = schema.mapped().collect();
        if mapped.len() != self.values.len() {
            return Err(Error::mapping(
                schema.entity,
                format!("expected {} values, got {}", mapped.len(), self.values.len()),
            ));
        }
        if mapped.len() == 1 {
            return Ok(None);
        }

        let mut statement = sea_query::Query::update();
        statement.table(Alias::new(schema.table.as_str()));

        let mut kinds = Vec::with_capacity(mapped.len());
        let mut key_value = None;
        for (column, value) in mapped.iter().zip(self.values) {
            if column.column == key.column {
                key_value = Some(value);
                continue;
            }
            let typed = column.encode(value)?;
            kinds.push(typed.kind);
            statement.value(Alias::new(column.column.as_str()), to_sea(typed.value));
        }

        let key_value = key.literal(key_value.unwrap_or(Value::Null))?;
        kinds.push(key_value.kind);
        statement.and_where(Expr::col(Alias::new(key.column.as_str())).eq(to_sea(key_value.value)));

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "UpdateBuilder generated SQL"
        );

        Ok(Some(statement))
    }
}
