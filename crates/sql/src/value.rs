//! Wire-level values exchanged with the engine.

use std::fmt;

use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};

use crate::error::{Error, Result};

/// Native parameter and column kinds of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// 64-bit signed integer.
    Integer64,
    /// 64-bit IEEE-754 double.
    Float64,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Blob,
    /// Boolean, stored by the engine as `0`/`1`.
    Boolean,
    /// Fixed-point decimal stored as `value × 10^scale` in a 64-bit integer.
    FixedDecimal {
        /// Total number of significant digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer64 => f.write_str("integer"),
            Self::Float64 => f.write_str("real"),
            Self::Text => f.write_str("text"),
            Self::Blob => f.write_str("blob"),
            Self::Boolean => f.write_str("boolean"),
            Self::FixedDecimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
        }
    }
}

/// A value as the engine stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// SQL NULL.
    Null,
    /// Integer storage class.
    Integer(i64),
    /// Real storage class.
    Real(f64),
    /// Text storage class.
    Text(String),
    /// Blob storage class.
    Blob(Vec<u8>),
    /// Boolean, bound as an integer.
    Boolean(bool),
}

impl RawValue {
    /// Whether the value is SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Infers the engine kind a value would be bound as.
    #[must_use]
    pub const fn kind(&self) -> EngineKind {
        match self {
            Self::Null | Self::Integer(_) => EngineKind::Integer64,
            Self::Real(_) => EngineKind::Float64,
            Self::Text(_) => EngineKind::Text,
            Self::Blob(_) => EngineKind::Blob,
            Self::Boolean(_) => EngineKind::Boolean,
        }
    }

    /// Reads the integer storage class; booleans read as `0`/`1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for any other storage class.
    pub fn as_integer(&self, column: &str) -> Result<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::Boolean(b) => Ok(i64::from(*b)),
            other => Err(Error::decode(column, format_args!("expected integer, got {other}"))),
        }
    }

    /// Reads the real storage class; integers widen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for any other storage class.
    #[allow(clippy::cast_precision_loss, reason = "REAL affinity accepts integers as lossy doubles")]
    pub fn as_real(&self, column: &str) -> Result<f64> {
        match self {
            Self::Real(f) => Ok(*f),
            Self::Integer(i) => Ok(*i as f64),
            other => Err(Error::decode(column, format_args!("expected real, got {other}"))),
        }
    }

    /// Reads the text storage class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for any other storage class.
    pub fn into_text(self, column: &str) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(Error::decode(column, format_args!("expected text, got {other}"))),
        }
    }

    /// Reads the blob storage class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for any other storage class.
    pub fn into_blob(self, column: &str) -> Result<Vec<u8>> {
        match self {
            Self::Blob(b) => Ok(b),
            other => Err(Error::decode(column, format_args!("expected blob, got {other}"))),
        }
    }

    pub(crate) fn from_sqlite(value: ValueRef<'_>, column: &str) -> Result<Self> {
        match value {
            ValueRef::Null => Ok(Self::Null),
            ValueRef::Integer(i) => Ok(Self::Integer(i)),
            ValueRef::Real(f) => Ok(Self::Real(f)),
            ValueRef::Text(t) => {
                let s = std::str::from_utf8(t)
                    .map_err(|e| Error::decode(column, format_args!("invalid UTF-8: {e}")))?;
                Ok(Self::Text(s.to_string()))
            }
            ValueRef::Blob(b) => Ok(Self::Blob(b.to_vec())),
        }
    }

    pub(crate) fn to_sqlite(&self) -> ToSqlOutput<'_> {
        match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Integer(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Self::Boolean(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
        }
    }
}

impl rusqlite::ToSql for RawValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.to_sqlite())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "text({} bytes)", s.len()),
            Self::Blob(b) => write!(f, "blob({} bytes)", b.len()),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// A wire value tagged with the kind it is bound as.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    /// Engine kind the value was encoded for.
    pub kind: EngineKind,
    /// The encoded value.
    pub value: RawValue,
}

impl TypedValue {
    /// Creates a typed value.
    #[must_use]
    pub const fn new(kind: EngineKind, value: RawValue) -> Self {
        Self { kind, value }
    }

    /// Tags a raw value with its inferred kind.
    #[must_use]
    pub const fn inferred(value: RawValue) -> Self {
        Self {
            kind: value.kind(),
            value,
        }
    }
}

/// A positional statement parameter; ordinals start at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// 1-based position in the SQL text.
    pub ordinal: usize,
    /// Engine kind the value is bound as.
    pub kind: EngineKind,
    /// The value to bind.
    pub value: RawValue,
}

/// One materialized result row, in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: std::sync::Arc<[String]>,
    values: Vec<RawValue>,
}

impl Row {
    /// A row of `values` under `columns`, in projection order.
    #[must_use]
    pub const fn new(columns: std::sync::Arc<[String]>, values: Vec<RawValue>) -> Self {
        Self { columns, values }
    }

    /// Column names, in projection order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a 0-based column index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RawValue> {
        self.values.get(index)
    }

    /// Value of a named column.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&RawValue> {
        self.columns.iter().position(|c| c == name).and_then(|i| self.values.get(i))
    }

    /// Takes the value at a 0-based column index, leaving NULL behind.
    pub fn take(&mut self, index: usize) -> Option<RawValue> {
        self.values.get_mut(index).map(|v| std::mem::replace(v, RawValue::Null))
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<RawValue> {
        self.values
    }
}
