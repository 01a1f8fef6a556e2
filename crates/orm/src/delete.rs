use ember_sql::{Error, Result, Statement};
use sea_query::{Alias, Expr, SqliteQueryBuilder};

use crate::filter::Filter;
use crate::fragment::{self, to_sea};
use crate::schema::EntitySchema;
use crate::value::Value;

/// Builder for constructing DELETE queries.
pub struct DeleteBuilder<'a> {
    schema: &'a EntitySchema,
    target: Target,
}

enum Target {
    Key(Value),
    Matching(Option<Filter>),
}

impl<'a> DeleteBuilder<'a> {
    /// Deletes the row whose primary key equals `key`.
    #[must_use]
    pub fn by_key(schema: &'a EntitySchema, key: impl Into<Value>) -> Self {
        Self {
            schema,
            target: Target::Key(key.into()),
        }
    }

    /// Deletes every row matching `predicate`. A missing predicate is
    /// rejected when the query is built.
    #[must_use]
    pub const fn matching(schema: &'a EntitySchema, predicate: Option<Filter>) -> Self {
        Self {
            schema,
            target: Target::Matching(predicate),
        }
    }

    /// Build the DELETE query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPredicate`] for a bulk delete without a
    /// predicate, [`Error::Mapping`] for a by-key delete on an entity without a
    /// key, and any error raised while translating the predicate.
    pub fn build(self) -> Result<Statement> {
        let schema = self.schema;
        let mut kinds = Vec::new();

        let condition = match self.target {
            Target::Key(value) => {
                let key = schema.require_key()?;
                if value.is_null() {
                    return Err(Error::InvalidPredicate(format!("{} key is NULL", schema.entity)));
                }
                let typed = key.literal(value)?;
                kinds.push(typed.kind);
                Expr::col(Alias::new(key.column.as_str())).eq(to_sea(typed.value))
            }
            Target::Matching(None) => return Err(Error::MissingPredicate),
            Target::Matching(Some(filter)) => filter.into_expr(schema, &mut kinds)?,
        };

        let mut statement = sea_query::Query::delete();
        statement.from_table(Alias::new(schema.table.as_str()));
        statement.and_where(condition);

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "DeleteBuilder generated SQL"
        );

        Ok(statement)
    }
}
