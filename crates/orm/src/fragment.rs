//! Intermediate representation shared by the query surface and the statement
//! builders, and conversion between ``SeaQuery`` values and wire values.

use ember_sql::{EngineKind, Error, RawValue, Result, Statement, TypedValue};
use sea_query::{SimpleExpr, Values};

use crate::filter::Filter;
use crate::schema::EntitySchema;

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    /// Property name.
    pub property: &'static str,
    /// Ascending when `true`.
    pub ascending: bool,
}

/// Translated WHERE / ORDER BY / LIMIT / projection state for one SELECT.
#[derive(Debug, Clone)]
pub struct QueryFragment {
    /// Conjunction of every filter, if any.
    pub predicate: Option<SimpleExpr>,
    /// Engine kinds of the predicate's bound literals, in emission order.
    pub kinds: Vec<EngineKind>,
    /// `(column, ascending)` in call order.
    pub order_by: Vec<(String, bool)>,
    /// Rows to return.
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: Option<i64>,
    /// Single projected column; `None` selects every mapped column.
    pub projection: Option<String>,
}

/// Translates query state into a [`QueryFragment`].
///
/// Successive filters are conjoined in the order given.
///
/// # Errors
///
/// Returns [`Error::NegativeCount`] for a negative skip or take, and any
/// translation error raised by a filter or an unknown property.
pub fn translate(
    schema: &EntitySchema, filters: &[Filter], orderings: &[Ordering], skip: Option<i64>,
    take: Option<i64>, projection: Option<&str>,
) -> Result<QueryFragment> {
    check_count("skip", skip)?;
    check_count("take", take)?;

    let mut kinds = Vec::new();
    let mut predicate: Option<SimpleExpr> = None;
    for filter in filters {
        let expr = filter.clone().into_expr(schema, &mut kinds)?;
        predicate = Some(match predicate {
            Some(existing) => existing.and(expr),
            None => expr,
        });
    }

    let order_by = orderings
        .iter()
        .map(|o| Ok((schema.column(o.property)?.column.clone(), o.ascending)))
        .collect::<Result<Vec<_>>>()?;

    let projection = projection.map(|p| schema.column(p).map(|c| c.column.clone())).transpose()?;

    Ok(QueryFragment {
        predicate,
        kinds,
        order_by,
        limit: take,
        offset: skip,
        projection,
    })
}

/// Fails with [`Error::NegativeCount`] if `count` is negative.
///
/// # Errors
///
/// See above.
pub const fn check_count(operation: &'static str, count: Option<i64>) -> Result<()> {
    match count {
        Some(count) if count < 0 => Err(Error::NegativeCount { operation, count }),
        _ => Ok(()),
    }
}

/// Converts a wire value into a ``SeaQuery`` value for statement construction.
#[must_use]
pub fn to_sea(value: RawValue) -> sea_query::Value {
    use sea_query::Value;

    match value {
        RawValue::Null => Value::BigInt(None),
        RawValue::Integer(i) => Value::BigInt(Some(i)),
        RawValue::Real(f) => Value::Double(Some(f)),
        RawValue::Text(s) => Value::String(Some(Box::new(s))),
        RawValue::Blob(b) => Value::Bytes(Some(Box::new(b))),
        RawValue::Boolean(b) => Value::Bool(Some(b)),
    }
}

fn from_sea(value: sea_query::Value) -> Result<RawValue> {
    use sea_query::Value;

    let out_of_range = |v: u64| Error::OutOfRange {
        value: v.to_string(),
        target: "integer".to_string(),
    };

    let raw = match value {
        Value::Bool(v) => v.map_or(RawValue::Null, RawValue::Boolean),
        Value::TinyInt(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::SmallInt(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::Int(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::BigInt(v) => v.map_or(RawValue::Null, RawValue::Integer),
        Value::TinyUnsigned(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::SmallUnsigned(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::Unsigned(v) => v.map_or(RawValue::Null, |v| RawValue::Integer(v.into())),
        Value::BigUnsigned(None) => RawValue::Null,
        Value::BigUnsigned(Some(v)) => {
            RawValue::Integer(i64::try_from(v).map_err(|_e| out_of_range(v))?)
        }
        Value::Float(v) => v.map_or(RawValue::Null, |v| RawValue::Real(v.into())),
        Value::Double(v) => v.map_or(RawValue::Null, RawValue::Real),
        Value::String(v) => v.map_or(RawValue::Null, |v| RawValue::Text(*v)),
        Value::Char(v) => v.map_or(RawValue::Null, |v| RawValue::Text(v.to_string())),
        Value::Bytes(v) => v.map_or(RawValue::Null, |v| RawValue::Blob(*v)),
        other => {
            return Err(Error::InvalidPredicate(format!(
                "unsupported value {other:?} requires explicit conversion before building the query"
            )));
        }
    };
    Ok(raw)
}

/// Pairs rendered ``SeaQuery`` values with the engine kinds recorded while
/// building, producing the final statement.
///
/// Kinds are matched by position.
///
/// # Errors
///
/// Returns an error if a value has no wire representation, or
/// [`Error::Mapping`] if the number of recorded kinds differs from the number
/// of rendered values.
pub fn statement(sql: String, values: Values, kinds: &[EngineKind]) -> Result<Statement> {
    if values.0.len() != kinds.len() {
        tracing::error!(sql = %sql, values = values.0.len(), kinds = kinds.len(), "parameter kinds out of step");
        return Err(Error::mapping(
            "statement",
            format!("{} parameters rendered but {} kinds recorded", values.0.len(), kinds.len()),
        ));
    }
    let raws = values.into_iter().map(from_sea).collect::<Result<Vec<_>>>()?;
    let params: Vec<TypedValue> =
        raws.into_iter().zip(kinds).map(|(value, kind)| TypedValue::new(*kind, value)).collect();
    Ok(Statement::new(sql, params))
}
