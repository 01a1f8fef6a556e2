use ember_sql::{EngineKind, Error, Result};
use sea_query::{Alias, Expr, LikeExpr, SimpleExpr};

use crate::fragment::to_sea;
use crate::schema::{ColumnSchema, DeclaredType, EntitySchema};
use crate::value::Value;

/// Escape character used in every generated `LIKE` pattern.
pub const LIKE_ESCAPE: char = '!';

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

/// Which end of the text a `LIKE` predicate anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    /// `%text%`
    Contains,
    /// `text%`
    StartsWith,
    /// `%text`
    EndsWith,
}

/// Predicate over an entity's properties.
///
/// Properties are named as they appear on the entity and are translated to
/// column names through its schema. Literals are always bound as parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// property <op> value
    Compare(&'static str, CompareOp, Value),
    /// property IN (values)
    In(&'static str, Vec<Value>),
    /// property LIKE pattern
    Like(&'static str, LikeKind, String),
    /// property IS NULL
    IsNull(&'static str),
    /// property IS NOT NULL
    IsNotNull(&'static str),
    /// Logical AND of multiple filters
    And(Vec<Self>),
    /// Logical OR of multiple filters
    Or(Vec<Self>),
    /// Logical NOT of a filter
    Not(Box<Self>),
}

impl Filter {
    /// Converts the filter to a ``SeaQuery`` expression against `schema`.
    ///
    /// The engine kind of every bound literal is appended to `kinds` in the
    /// order the literals appear in the expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProperty`] for a property that is not mapped,
    /// [`Error::InvalidPredicate`] for an ordering comparison against NULL or a
    /// text match on a non-text column, and any codec error for a literal.
    pub fn into_expr(self, schema: &EntitySchema, kinds: &mut Vec<EngineKind>) -> Result<SimpleExpr> {
        let expr = match self {
            Self::Compare(property, op, value) => {
                let column = schema.column(property)?;
                if value.is_null() {
                    return match op {
                        CompareOp::Eq => Ok(col(column).is_null()),
                        CompareOp::Ne => Ok(col(column).is_not_null()),
                        _ => Err(Error::InvalidPredicate(format!(
                            "cannot order {property} against NULL"
                        ))),
                    };
                }
                let literal = bind(column, value, kinds)?;
                match op {
                    CompareOp::Eq => col(column).eq(literal),
                    CompareOp::Ne => col(column).ne(literal),
                    CompareOp::Gt => col(column).gt(literal),
                    CompareOp::Gte => col(column).gte(literal),
                    CompareOp::Lt => col(column).lt(literal),
                    CompareOp::Lte => col(column).lte(literal),
                }
            }
            Self::In(property, values) => {
                let column = schema.column(property)?;
                let with_null = values.iter().any(Value::is_null);
                let literals = values
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .map(|v| bind(column, v, kinds))
                    .collect::<Result<Vec<_>>>()?;

                match (literals.is_empty(), with_null) {
                    (true, false) => Expr::cust("1 = 0"),
                    (true, true) => col(column).is_null(),
                    (false, false) => col(column).is_in(literals),
                    (false, true) => col(column).is_in(literals).or(col(column).is_null()),
                }
            }
            Self::Like(property, kind, text) => {
                let column = schema.column(property)?;
                if column.declared != DeclaredType::Text {
                    return Err(Error::InvalidPredicate(format!("{property} is not a text column")));
                }
                let escaped = escape_like(&text);
                let pattern = match kind {
                    LikeKind::Contains => format!("%{escaped}%"),
                    LikeKind::StartsWith => format!("{escaped}%"),
                    LikeKind::EndsWith => format!("%{escaped}"),
                };
                kinds.push(EngineKind::Text);
                col(column).like(LikeExpr::new(pattern).escape(LIKE_ESCAPE))
            }
            Self::IsNull(property) => col(schema.column(property)?).is_null(),
            Self::IsNotNull(property) => col(schema.column(property)?).is_not_null(),
            Self::And(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(schema, kinds));
                match exprs.next() {
                    // no filters, so all conditions satisfied
                    None => Expr::cust("1 = 1"),
                    Some(first) => exprs.try_fold(first?, |acc, e| e.map(|e| acc.and(e)))?,
                }
            }
            Self::Or(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(schema, kinds));
                match exprs.next() {
                    // no filters, so nothing satisfied
                    None => Expr::cust("1 = 0"),
                    Some(first) => exprs.try_fold(first?, |acc, e| e.map(|e| acc.or(e)))?,
                }
            }
            Self::Not(filter) => Expr::expr(filter.into_expr(schema, kinds)?).not(),
        };
        Ok(expr)
    }

    /// Creates an equality filter (property = value). A NULL value becomes `IS NULL`.
    #[must_use]
    pub fn eq(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Eq, value.into())
    }

    /// Creates an inequality filter (property <> value). A NULL value becomes `IS NOT NULL`.
    #[must_use]
    pub fn ne(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Ne, value.into())
    }

    /// Creates a greater-than filter (property > value).
    #[must_use]
    pub fn gt(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Gt, value.into())
    }

    /// Creates a greater-than-or-equal filter (property >= value).
    #[must_use]
    pub fn gte(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Gte, value.into())
    }

    /// Creates a less-than filter (property < value).
    #[must_use]
    pub fn lt(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Lt, value.into())
    }

    /// Creates a less-than-or-equal filter (property <= value).
    #[must_use]
    pub fn lte(property: &'static str, value: impl Into<Value>) -> Self {
        Self::Compare(property, CompareOp::Lte, value.into())
    }

    /// Creates an IN filter (property IN (values)).
    #[must_use]
    pub fn r#in(property: &'static str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(property, values.into_iter().map(Into::into).collect())
    }

    /// Matches text containing `text`.
    ///
    /// The engine's `LIKE` folds ASCII case only: `"a"` matches `"A"`, but
    /// `"é"` does not match `"É"`.
    #[must_use]
    pub fn contains(property: &'static str, text: impl Into<String>) -> Self {
        Self::Like(property, LikeKind::Contains, text.into())
    }

    /// Matches text beginning with `text`.
    ///
    /// The engine's `LIKE` folds ASCII case only: `"a"` matches `"A"`, but
    /// `"é"` does not match `"É"`.
    #[must_use]
    pub fn starts_with(property: &'static str, text: impl Into<String>) -> Self {
        Self::Like(property, LikeKind::StartsWith, text.into())
    }

    /// Matches text ending with `text`.
    ///
    /// The engine's `LIKE` folds ASCII case only: `"a"` matches `"A"`, but
    /// `"é"` does not match `"É"`.
    #[must_use]
    pub fn ends_with(property: &'static str, text: impl Into<String>) -> Self {
        Self::Like(property, LikeKind::EndsWith, text.into())
    }

    /// Creates an IS NULL filter.
    #[must_use]
    pub const fn is_null(property: &'static str) -> Self {
        Self::IsNull(property)
    }

    /// Creates an IS NOT NULL filter.
    #[must_use]
    pub const fn is_not_null(property: &'static str) -> Self {
        Self::IsNotNull(property)
    }

    /// Logical AND of `filters`. Empty is always true.
    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Logical OR of `filters`. Empty is always false.
    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Negates `filter`.
    #[must_use]
    #[allow(clippy::should_implement_trait, reason = "constructor alongside `and` and `or`, not an operator")]
    pub fn not(filter: Self) -> Self {
        Self::Not(Box::new(filter))
    }
}

fn col(column: &ColumnSchema) -> Expr {
    Expr::col(Alias::new(column.column.as_str()))
}

fn bind(column: &ColumnSchema, value: Value, kinds: &mut Vec<EngineKind>) -> Result<sea_query::Value> {
    let typed = column.literal(value)?;
    kinds.push(typed.kind);
    Ok(to_sea(typed.value))
}

/// Escapes `LIKE` wildcards and the escape character itself.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}
