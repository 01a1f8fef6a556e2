use std::vec;

use ember_sql::{Error, RawValue, Result, Row};

use crate::schema::{ColumnSchema, EntitySchema, SchemaBuilder};
use crate::value::{Scalar, Value};

/// Declares an ORM entity with automatic `Entity` trait implementation.
///
/// Field options go in brackets after the type: `key`, `auto_increment = bool`,
/// `column = "name"`, `nullable`, `not_null`, `max_length = n`, and
/// `decimal = (precision, scale)`. Fields in a trailing `; ignore { .. }` block are
/// never read or written and are filled with `Default::default()` when loaded.
///
/// # Examples
///
/// ```ignore
/// entity! {
///     table = "people",
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Person {
///         pub id: i64,
///         pub name: String [max_length = 64],
///         pub balance: Decimal [decimal = (12, 2)];
///         ignore {
///             pub cached_label: String,
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        $(table = $table:literal,)?
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty $([ $($opt:ident $(= $val:expr)?),* $(,)? ])?
            ),* $(,)?
            $(
                ; ignore {
                    $(
                        $(#[$ignored_meta:meta])*
                        pub $ignored:ident : $ignored_ty:ty
                    ),* $(,)?
                }
            )?
        }
    ) => {
        #[allow(missing_docs)]
        $(#[$meta])*
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
            $($(
                $(#[$ignored_meta])*
                pub $ignored: $ignored_ty,
            )*)?
        }

        impl $crate::Entity for $name {
            fn describe() -> $crate::SchemaBuilder {
                $crate::SchemaBuilder::new(stringify!($name))
                    $(.table($table))?
                    $(
                        .column(
                            $crate::ColumnDef::new::<$ty>(stringify!($field))
                                $($(.$opt($($val)?))*)?
                        )
                    )*
                    $($(
                        .column($crate::ColumnDef::ignored(stringify!($ignored)))
                    )*)?
            }

            fn to_values(&self) -> Vec<$crate::Value> {
                vec![$( $crate::Scalar::to_value(&self.$field), )*]
            }

            fn from_row(row: &mut $crate::RowReader<'_>) -> $crate::Result<Self> {
                Ok(Self {
                    $( $field: row.read::<$ty>()?, )*
                    $($( $ignored: ::core::default::Default::default(), )*)?
                })
            }

            fn assign(&mut self, property: &str, value: $crate::Value) -> $crate::Result<()> {
                match property {
                    $(
                        p if p == stringify!($field) => {
                            self.$field = <$ty as $crate::Scalar>::from_value(value, p)?;
                            Ok(())
                        }
                    )*
                    _ => Err($crate::Error::UnknownProperty {
                        entity: stringify!($name).to_string(),
                        property: property.to_string(),
                    }),
                }
            }
        }
    };
}

/// A record type mapped to a table.
///
/// Typically implemented via the `entity!` macro rather than manually.
pub trait Entity: Sized + Send + 'static {
    /// Column descriptors, in declaration order.
    fn describe() -> SchemaBuilder;

    /// Values of every mapped (non-ignored) column, in declaration order.
    fn to_values(&self) -> Vec<Value>;

    /// Construct an entity from a row of every mapped column, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if a column cannot be decoded into its field.
    fn from_row(row: &mut RowReader<'_>) -> Result<Self>;

    /// Overwrites one field, used to write generated keys back.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is unknown or the value does not fit.
    fn assign(&mut self, property: &str, value: Value) -> Result<()>;
}

/// Reads a row's values in schema order, decoding each through its column.
#[derive(Debug)]
pub struct RowReader<'a> {
    columns: Vec<&'a ColumnSchema>,
    values: vec::IntoIter<RawValue>,
    position: usize,
}

impl<'a> RowReader<'a> {
    /// Reads `row` against every mapped column of `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the row width does not match the schema.
    pub fn new(schema: &'a EntitySchema, row: Row) -> Result<Self> {
        let columns: Vec<_> = schema.mapped().collect();
        if columns.len() != row.len() {
            return Err(Error::mapping(
                schema.entity,
                format!("row has {} columns, expected {}", row.len(), columns.len()),
            ));
        }
        Ok(Self {
            columns,
            values: row.into_values().into_iter(),
            position: 0,
        })
    }

    /// Decodes the next column as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the value does not fit `T` or the row is exhausted.
    pub fn read<T: Scalar>(&mut self) -> Result<T> {
        let (Some(column), Some(raw)) = (self.columns.get(self.position), self.values.next()) else {
            return Err(Error::decode(
                format!("#{}", self.position),
                "read past the end of the row",
            ));
        };
        self.position += 1;
        let value = column.decode(raw)?;
        T::from_value(value, &column.column)
    }
}

/// Decodes a single-column row through `column`.
pub(crate) fn read_column<T: Scalar>(column: &ColumnSchema, row: Row) -> Result<T> {
    let Some(raw) = row.into_values().into_iter().next() else {
        return Err(Error::decode(&column.column, "row has no columns"));
    };
    T::from_value(column.decode(raw)?, &column.column)
}
