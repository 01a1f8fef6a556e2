use ember_sql::{EngineKind, Result, Statement};
use sea_query::{Alias, Expr, Order, SelectStatement, SqliteQueryBuilder};

use crate::fragment::{self, QueryFragment};
use crate::schema::EntitySchema;

/// Builder for constructing SELECT, COUNT, and EXISTS queries.
pub struct SelectBuilder<'a> {
    schema: &'a EntitySchema,
    fragment: QueryFragment,
}

impl<'a> SelectBuilder<'a> {
    /// Creates a SELECT builder over a translated fragment.
    #[must_use]
    pub const fn new(schema: &'a EntitySchema, fragment: QueryFragment) -> Self {
        Self { schema, fragment }
    }

    /// Build the SELECT query.
    ///
    /// Selects the projected column, or every mapped column in schema order.
    ///
    /// # Errors
    ///
    /// Returns an error if a bound value has no wire representation.
    pub fn build(self) -> Result<Statement> {
        let mut statement = sea_query::Query::select();
        match &self.fragment.projection {
            Some(column) => {
                statement.column(Alias::new(column.as_str()));
            }
            None => {
                statement.columns(self.schema.mapped().map(|c| Alias::new(c.column.as_str())));
            }
        }

        let mut kinds = self.fragment.kinds.clone();
        self.filter_and_page(&mut statement, &mut kinds);

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %self.schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "SelectBuilder generated SQL"
        );

        Ok(statement)
    }

    /// Build a `COUNT(*)` query. A paginated query is counted through a subquery.
    ///
    /// # Errors
    ///
    /// Returns an error if a bound value has no wire representation.
    pub fn build_count(self) -> Result<Statement> {
        let mut kinds = self.fragment.kinds.clone();
        let mut inner = sea_query::Query::select();

        let statement = if self.fragment.limit.is_some() || self.fragment.offset.is_some() {
            inner.expr(Expr::cust("1"));
            self.filter_and_page(&mut inner, &mut kinds);
            sea_query::Query::select()
                .expr(Expr::cust("COUNT(*)"))
                .from_subquery(inner, Alias::new("paged"))
                .to_owned()
        } else {
            inner.expr(Expr::cust("COUNT(*)"));
            self.filter_and_page(&mut inner, &mut kinds);
            inner
        };

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %self.schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "SelectBuilder generated COUNT SQL"
        );

        Ok(statement)
    }

    /// Build an existence check: `SELECT 1 ... LIMIT 1`, honoring skip and take.
    ///
    /// # Errors
    ///
    /// Returns an error if a bound value has no wire representation.
    pub fn build_exists(mut self) -> Result<Statement> {
        self.fragment.limit = Some(self.fragment.limit.map_or(1, |take| take.min(1)));
        self.fragment.order_by.clear();

        let mut kinds = self.fragment.kinds.clone();
        let mut statement = sea_query::Query::select();
        statement.expr(Expr::cust("1"));
        self.filter_and_page(&mut statement, &mut kinds);

        let (sql, values) = statement.build(SqliteQueryBuilder);
        let statement = fragment::statement(sql, values, &kinds)?;

        tracing::debug!(
            table = %self.schema.table,
            sql = %statement.sql,
            param_count = statement.params.len(),
            "SelectBuilder generated EXISTS SQL"
        );

        Ok(statement)
    }

    // FROM, WHERE, ORDER BY, LIMIT, OFFSET. Parameter kinds follow SQL order:
    // predicate literals, then limit, then offset.
    fn filter_and_page(&self, statement: &mut SelectStatement, kinds: &mut Vec<EngineKind>) {
        statement.from(Alias::new(self.schema.table.as_str()));

        if let Some(predicate) = &self.fragment.predicate {
            statement.and_where(predicate.clone());
        }

        for (column, ascending) in &self.fragment.order_by {
            let order = if *ascending { Order::Asc } else { Order::Desc };
            statement.order_by(Alias::new(column.as_str()), order);
        }

        // The engine needs a LIMIT before an OFFSET.
        let limit = match (self.fragment.limit, self.fragment.offset) {
            (Some(limit), _) => Some(limit),
            (None, Some(_)) => Some(i64::MAX),
            (None, None) => None,
        };
        if let Some(limit) = limit {
            statement.limit(limit.unsigned_abs());
            kinds.push(EngineKind::Integer64);
        }
        if let Some(offset) = self.fragment.offset {
            statement.offset(offset.unsigned_abs());
            kinds.push(EngineKind::Integer64);
        }
    }
}
