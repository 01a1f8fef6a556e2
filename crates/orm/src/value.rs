use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use ember_sql::{Error, Result};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::schema::{DeclaredType, Zone};

/// Application-side scalar value.
///
/// Entities convert their fields to and from `Value`; the codec maps values to
/// the engine's wire representation according to each column's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer, including enumeration discriminants.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Fixed-point decimal.
    Decimal(Decimal),
    /// GUID.
    Uuid(Uuid),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Absolute instant.
    Timestamp(DateTime<Utc>),
    /// Signed duration.
    Duration(TimeDelta),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Whether the value is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::Duration(_) => "duration",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

/// A Rust type that can be stored in a single column.
pub trait Scalar: Sized {
    /// Column type the Rust type maps to.
    const DECLARED: DeclaredType;

    /// Whether the Rust type can represent NULL.
    const NULLABLE: bool = false;

    /// Converts to a [`Value`].
    fn to_value(&self) -> Value;

    /// Converts back from a decoded [`Value`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the value has the wrong shape or is out of range.
    fn from_value(value: Value, column: &str) -> Result<Self>;
}

fn unexpected<T>(value: &Value, column: &str, expected: &str) -> Result<T> {
    if value.is_null() {
        return Err(Error::decode(column, "unexpected NULL"));
    }
    Err(Error::decode(column, format_args!("expected {expected}, got {}", value.type_name())))
}

impl<T: Scalar> From<T> for Value {
    fn from(value: T) -> Self {
        value.to_value()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

impl Scalar for bool {
    const DECLARED: DeclaredType = DeclaredType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => unexpected(&other, column, "bool"),
        }
    }
}

macro_rules! signed {
    ($($ty:ty => $declared:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const DECLARED: DeclaredType = DeclaredType::$declared;

                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }

                fn from_value(value: Value, column: &str) -> Result<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i).map_err(|_e| {
                            Error::decode(column, format_args!("{i} out of range for {}", stringify!($ty)))
                        }),
                        other => unexpected(&other, column, stringify!($ty)),
                    }
                }
            }
        )*
    };
}

macro_rules! unsigned {
    ($($ty:ty => $declared:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const DECLARED: DeclaredType = DeclaredType::$declared;

                fn to_value(&self) -> Value {
                    Value::UInt(u64::from(*self))
                }

                fn from_value(value: Value, column: &str) -> Result<Self> {
                    let n = match value {
                        Value::UInt(u) => u,
                        Value::Int(i) => u64::try_from(i).map_err(|_e| {
                            Error::decode(column, format_args!("{i} out of range for {}", stringify!($ty)))
                        })?,
                        other => return unexpected(&other, column, stringify!($ty)),
                    };
                    <$ty>::try_from(n).map_err(|_e| {
                        Error::decode(column, format_args!("{n} out of range for {}", stringify!($ty)))
                    })
                }
            }
        )*
    };
}

signed!(i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64);
unsigned!(u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64);

impl Scalar for f64 {
    const DECLARED: DeclaredType = DeclaredType::Float64;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            other => unexpected(&other, column, "f64"),
        }
    }
}

impl Scalar for f32 {
    const DECLARED: DeclaredType = DeclaredType::Float32;

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    #[allow(clippy::cast_possible_truncation, reason = "REAL columns store doubles; f32 narrows on read")]
    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f as Self),
            other => unexpected(&other, column, "f32"),
        }
    }
}

impl Scalar for Decimal {
    const DECLARED: DeclaredType = DeclaredType::Decimal {
        precision: 18,
        scale: 4,
    };

    fn to_value(&self) -> Value {
        Value::Decimal(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Decimal(d) => Ok(d),
            other => unexpected(&other, column, "decimal"),
        }
    }
}

impl Scalar for Uuid {
    const DECLARED: DeclaredType = DeclaredType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => unexpected(&other, column, "uuid"),
        }
    }
}

impl Scalar for NaiveDate {
    const DECLARED: DeclaredType = DeclaredType::Date;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(d),
            other => unexpected(&other, column, "date"),
        }
    }
}

impl Scalar for NaiveTime {
    const DECLARED: DeclaredType = DeclaredType::Time;

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Time(t) => Ok(t),
            other => unexpected(&other, column, "time"),
        }
    }
}

impl Scalar for DateTime<Utc> {
    const DECLARED: DeclaredType = DeclaredType::Timestamp(Zone::Utc);

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            other => unexpected(&other, column, "timestamp"),
        }
    }
}

impl Scalar for DateTime<Local> {
    const DECLARED: DeclaredType = DeclaredType::Timestamp(Zone::Local);

    fn to_value(&self) -> Value {
        Value::Timestamp(self.with_timezone(&Utc))
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts.with_timezone(&Local)),
            other => unexpected(&other, column, "timestamp"),
        }
    }
}

// The offset is not stored; instants read back at +00:00.
impl Scalar for DateTime<FixedOffset> {
    const DECLARED: DeclaredType = DeclaredType::Timestamp(Zone::Offset);

    fn to_value(&self) -> Value {
        Value::Timestamp(self.with_timezone(&Utc))
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts.fixed_offset()),
            other => unexpected(&other, column, "timestamp"),
        }
    }
}

// Wall-clock values are taken to be UTC.
impl Scalar for NaiveDateTime {
    const DECLARED: DeclaredType = DeclaredType::Timestamp(Zone::Naive);

    fn to_value(&self) -> Value {
        Value::Timestamp(self.and_utc())
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts.naive_utc()),
            other => unexpected(&other, column, "timestamp"),
        }
    }
}

impl Scalar for TimeDelta {
    const DECLARED: DeclaredType = DeclaredType::Duration;

    fn to_value(&self) -> Value {
        Value::Duration(*self)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Duration(d) => Ok(d),
            other => unexpected(&other, column, "duration"),
        }
    }
}

impl Scalar for String {
    const DECLARED: DeclaredType = DeclaredType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => unexpected(&other, column, "text"),
        }
    }
}

impl Scalar for Vec<u8> {
    const DECLARED: DeclaredType = DeclaredType::Blob;

    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Blob(b) => Ok(b),
            other => unexpected(&other, column, "blob"),
        }
    }
}

impl<T: Scalar> Scalar for Option<T> {
    const DECLARED: DeclaredType = T::DECLARED;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, Scalar::to_value)
    }

    fn from_value(value: Value, column: &str) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other, column).map(Some),
        }
    }
}

/// Declares a C-like enumeration stored as its 64-bit discriminant.
///
/// A catch-all `Other(i64)` variant is added so that values written by other
/// programs round-trip unchanged.
///
/// ```ignore
/// sql_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
///     pub enum Status {
///         Active = 1,
///         Archived = 2,
///     }
/// }
/// ```
#[macro_export]
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $discriminant:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
            /// A discriminant with no named variant.
            Other(i64),
        }

        impl ::core::convert::From<$name> for i64 {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $discriminant, )*
                    $name::Other(n) => n,
                }
            }
        }

        impl ::core::convert::From<i64> for $name {
            fn from(value: i64) -> Self {
                match value {
                    $( $discriminant => Self::$variant, )*
                    n => Self::Other(n),
                }
            }
        }

        impl $crate::Scalar for $name {
            const DECLARED: $crate::DeclaredType = $crate::DeclaredType::Enum;

            fn to_value(&self) -> $crate::Value {
                $crate::Value::Int(i64::from(self.clone()))
            }

            fn from_value(value: $crate::Value, column: &str) -> $crate::Result<Self> {
                match value {
                    $crate::Value::Int(n) => Ok(Self::from(n)),
                    other => Err($crate::Error::decode(
                        column,
                        format_args!("expected enumeration, got {}", other.type_name()),
                    )),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::sql_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Colour {
            Red = 1,
            Green = 2,
        }
    }

    #[test]
    fn integer_narrowing_is_checked() {
        assert_eq!(i8::from_value(Value::Int(-128), "c").unwrap(), -128);
        assert!(i8::from_value(Value::Int(128), "c").is_err());
        assert!(u16::from_value(Value::Int(-1), "c").is_err());
        assert_eq!(u64::from_value(Value::UInt(u64::MAX), "c").unwrap(), u64::MAX);
    }

    #[test]
    fn null_handling() {
        assert_eq!(Option::<i32>::from_value(Value::Null, "c").unwrap(), None);
        let err = i32::from_value(Value::Null, "c").unwrap_err();
        assert!(err.to_string().contains("unexpected NULL"));
        assert_eq!(Some(5_i32).to_value(), Value::Int(5));
        assert_eq!(None::<i32>.to_value(), Value::Null);
        assert!(<Option<String> as Scalar>::NULLABLE);
    }

    #[test]
    fn unknown_discriminants_round_trip() {
        assert_eq!(Colour::from(2), Colour::Green);
        assert_eq!(Colour::from_value(Value::Int(42), "c").unwrap(), Colour::Other(42));
        assert_eq!(Colour::Other(42).to_value(), Value::Int(42));
        assert_eq!(Colour::DECLARED, DeclaredType::Enum);
    }

    #[test]
    fn zoned_timestamps_normalize_to_utc() {
        let offset = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00").unwrap();
        let Value::Timestamp(utc) = offset.to_value() else {
            panic!("expected timestamp");
        };
        assert_eq!(utc.to_rfc3339(), "2024-03-01T08:00:00+00:00");

        let restored = DateTime::<FixedOffset>::from_value(Value::Timestamp(utc), "c").unwrap();
        assert_eq!(restored, offset);
        assert_eq!(restored.offset().local_minus_utc(), 0);
    }
}
