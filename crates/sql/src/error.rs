//! Errors

use std::fmt;

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Broad classification of an error reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The database could not be opened or configured.
    Open,
    /// Statement preparation failed: malformed SQL, unknown table or column.
    Syntax,
    /// A step violated a constraint (unique, foreign key, not null, check).
    Constraint,
    /// Any other failure while stepping, including transaction-state errors.
    Runtime,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Syntax => "syntax",
            Self::Constraint => "constraint",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Errors raised by the ORM and its execution runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // --- Local validation errors, raised before any driver call ---
    /// NULL written to a column that does not accept it.
    #[error("column {column} is not nullable")]
    NullViolation { column: String },

    /// Text or blob longer than the declared maximum, measured in encoded bytes.
    #[error("column {column} accepts at most {max} bytes, got {actual}")]
    LengthExceeded { column: String, max: usize, actual: usize },

    /// Decimal value does not fit the column's scaled 64-bit representation.
    #[error("decimal {value} overflows column {column} (precision {precision}, scale {scale})")]
    DecimalOverflow { column: String, value: String, precision: u32, scale: u32 },

    /// Integral or temporal value outside the range of its target representation.
    #[error("value {value} is out of range for {target}")]
    OutOfRange { value: String, target: String },

    /// A value whose type cannot be stored in the target column.
    #[error("column {column} expects {expected}, got {actual}")]
    TypeMismatch { column: String, expected: String, actual: String },

    /// `skip` or `take` called with a negative count.
    #[error("{operation} requires a non-negative count, got {count}")]
    NegativeCount { operation: &'static str, count: i64 },

    /// A bulk delete was requested without a predicate.
    #[error("delete_many requires a predicate")]
    MissingPredicate,

    /// The statement binds more parameters than the configured limit allows.
    #[error("statement binds {count} parameters, exceeding the limit of {limit}")]
    TooManyParameters { count: usize, limit: usize },

    /// A predicate referenced a property the entity does not map.
    #[error("{entity} has no mapped property {property}")]
    UnknownProperty { entity: String, property: String },

    /// A predicate that cannot be translated to SQL.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The entity's mapping descriptor is inconsistent.
    #[error("invalid mapping for {entity}: {reason}")]
    Mapping { entity: String, reason: String },

    // --- Decoding ---
    /// A column value could not be converted back to its declared type.
    #[error("cannot decode column {column}: {reason}")]
    Decode { column: String, reason: String },

    // --- Driver and engine errors, passed through unchanged ---
    /// Error reported by the engine, with the SQL that caused it when known.
    #[error("{kind} error ({code}): {message}{}", sql_suffix(.sql.as_deref()))]
    Driver { kind: DriverErrorKind, code: i32, message: String, sql: Option<String> },

    // --- Cardinality ---
    /// Exactly one row was required but none matched.
    #[error("sequence contains no rows")]
    NoRows,

    /// At most one row was required but more than one matched.
    #[error("sequence contains more than one row")]
    MultipleRows,

    // --- Runtime plumbing ---
    /// The connection pool could not hand out a connection.
    #[error("connection pool: {0}")]
    Pool(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wraps a driver error with its classification and, optionally, the offending SQL.
    #[must_use]
    pub fn driver(kind: DriverErrorKind, err: &rusqlite::Error, sql: Option<&str>) -> Self {
        let code = err.sqlite_error().map_or(-1, |e| e.extended_code);
        let kind = match (kind, err.sqlite_error_code()) {
            (DriverErrorKind::Runtime, Some(rusqlite::ErrorCode::ConstraintViolation)) => {
                DriverErrorKind::Constraint
            }
            (kind, _) => kind,
        };
        Self::Driver {
            kind,
            code,
            message: err.to_string(),
            sql: sql.map(ToString::to_string),
        }
    }

    /// Convenience constructor for [`Error::Decode`].
    pub fn decode(column: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Decode {
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Mapping`].
    pub fn mapping(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mapping {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// True for errors detected locally, before the engine saw the statement.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NullViolation { .. }
                | Self::LengthExceeded { .. }
                | Self::DecimalOverflow { .. }
                | Self::OutOfRange { .. }
                | Self::TypeMismatch { .. }
                | Self::NegativeCount { .. }
                | Self::MissingPredicate
                | Self::TooManyParameters { .. }
                | Self::UnknownProperty { .. }
                | Self::InvalidPredicate(_)
                | Self::Mapping { .. }
        )
    }

    /// True for errors reported by the engine.
    #[must_use]
    pub const fn is_driver(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }

    /// True for `single`/`first` cardinality failures.
    #[must_use]
    pub const fn is_cardinality(&self) -> bool {
        matches!(self, Self::NoRows | Self::MultipleRows)
    }

    /// The driver error classification, if any.
    #[must_use]
    pub const fn driver_kind(&self) -> Option<DriverErrorKind> {
        match self {
            Self::Driver { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The SQL text attached to a driver error.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Driver { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

fn sql_suffix(sql: Option<&str>) -> String {
    sql.map(|s| format!(" [sql: {s}]")).unwrap_or_default()
}
