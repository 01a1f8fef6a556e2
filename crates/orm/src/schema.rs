//! Entity metadata: table and column mapping resolved once per entity type.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use convert_case::{Case, Casing};
use dashmap::DashMap;
use ember_sql::{EngineKind, Error, RawValue, Result, TypedValue};

use crate::codec;
use crate::entity::Entity;
use crate::value::{Scalar, Value};

/// Largest decimal precision whose scaled value always fits 64 bits.
pub const MAX_DECIMAL_PRECISION: u32 = 19;

/// Zone handling for timestamp columns. Every zone is stored as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    /// `DateTime<Utc>`.
    Utc,
    /// `DateTime<Local>`, restored to the local zone when read.
    Local,
    /// `DateTime<FixedOffset>`, restored at `+00:00` when read.
    Offset,
    /// `NaiveDateTime`, treated as UTC wall-clock time.
    Naive,
}

/// Column type, as declared by the entity field's Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// `bool`
    Bool,
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u8`
    UInt8,
    /// `u16`
    UInt16,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// Enumeration stored as its discriminant.
    Enum,
    /// `f32`
    Float32,
    /// `f64`
    Float64,
    /// Fixed-point decimal.
    Decimal {
        /// Total significant digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
    /// GUID stored as 16 bytes.
    Uuid,
    /// Calendar date stored as days since 1970-01-01.
    Date,
    /// Time of day stored as 100ns ticks since midnight.
    Time,
    /// Instant stored as UTC milliseconds since the Unix epoch.
    Timestamp(Zone),
    /// Signed duration stored as 100ns ticks.
    Duration,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Blob,
}

impl DeclaredType {
    /// Engine kind values of this type are bound as.
    #[must_use]
    pub const fn engine_kind(self) -> EngineKind {
        match self {
            Self::Bool => EngineKind::Boolean,
            Self::Int8
            | Self::Int16
            | Self::Int32
            | Self::Int64
            | Self::UInt8
            | Self::UInt16
            | Self::UInt32
            | Self::UInt64
            | Self::Enum
            | Self::Date
            | Self::Time
            | Self::Timestamp(_)
            | Self::Duration => EngineKind::Integer64,
            Self::Float32 | Self::Float64 => EngineKind::Float64,
            Self::Decimal { precision, scale } => EngineKind::FixedDecimal { precision, scale },
            Self::Uuid | Self::Blob => EngineKind::Blob,
            Self::Text => EngineKind::Text,
        }
    }

    /// Whether the type is a signed or unsigned integer.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }
}

/// A resolved column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Field name on the entity.
    pub property: &'static str,
    /// Column name in the table.
    pub column: String,
    /// Declared type. Ignored columns carry [`DeclaredType::Blob`].
    pub declared: DeclaredType,
    /// Whether NULL may be written.
    pub nullable: bool,
    /// Maximum encoded length in bytes, for text and blob columns.
    pub max_length: Option<usize>,
    /// Excluded from every read and write.
    pub ignored: bool,
}

impl ColumnSchema {
    /// Encodes a value for writing: checks nullability and maximum length.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value cannot be stored in this column.
    pub fn encode(&self, value: Value) -> Result<TypedValue> {
        let kind = self.declared.engine_kind();
        if value.is_null() {
            if !self.nullable {
                return Err(Error::NullViolation {
                    column: self.column.clone(),
                });
            }
            return Ok(TypedValue::new(kind, RawValue::Null));
        }

        let raw = codec::encode(self.declared, value, &self.column)?;
        if let Some(max) = self.max_length {
            let actual = match &raw {
                RawValue::Text(s) => s.len(),
                RawValue::Blob(b) => b.len(),
                _ => 0,
            };
            if actual > max {
                return Err(Error::LengthExceeded {
                    column: self.column.clone(),
                    max,
                    actual,
                });
            }
        }
        Ok(TypedValue::new(kind, raw))
    }

    /// Encodes a predicate literal. Nullability and length are not checked.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value cannot be converted.
    pub fn literal(&self, value: Value) -> Result<TypedValue> {
        let kind = self.declared.engine_kind();
        if value.is_null() {
            return Ok(TypedValue::new(kind, RawValue::Null));
        }
        Ok(TypedValue::new(kind, codec::encode(self.declared, value, &self.column)?))
    }

    /// Decodes a value read from this column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the stored value does not match the declared type.
    pub fn decode(&self, raw: RawValue) -> Result<Value> {
        codec::decode(self.declared, raw, &self.column)
    }
}

/// Resolved, immutable mapping between an entity type and its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Rust type name.
    pub entity: &'static str,
    /// Table name.
    pub table: String,
    /// Columns in declaration order, ignored columns included.
    pub columns: Vec<ColumnSchema>,
    /// Index of the primary-key column in `columns`.
    pub primary_key: Option<usize>,
    /// Whether the engine generates the primary key.
    pub auto_increment: bool,
}

impl EntitySchema {
    /// Columns that are read and written, in declaration order.
    pub fn mapped(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| !c.ignored)
    }

    /// Looks up a mapped column by property name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProperty`] if the property is not mapped.
    pub fn column(&self, property: &str) -> Result<&ColumnSchema> {
        self.mapped().find(|c| c.property == property).ok_or_else(|| Error::UnknownProperty {
            entity: self.entity.to_string(),
            property: property.to_string(),
        })
    }

    /// The primary-key column, if any.
    #[must_use]
    pub fn key(&self) -> Option<&ColumnSchema> {
        self.primary_key.map(|i| &self.columns[i])
    }

    /// The primary-key column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the entity has no primary key.
    pub fn require_key(&self) -> Result<&ColumnSchema> {
        self.key().ok_or_else(|| Error::mapping(self.entity, "entity has no primary key"))
    }
}

/// Column descriptor produced by the `entity!` macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    property: &'static str,
    declared: DeclaredType,
    type_nullable: bool,
    column: Option<&'static str>,
    key: bool,
    auto_increment: Option<bool>,
    nullable: Option<bool>,
    max_length: Option<usize>,
    decimal: Option<(u32, u32)>,
    ignored: bool,
}

impl ColumnDef {
    /// Describes a field of Rust type `T`.
    #[must_use]
    pub const fn new<T: Scalar>(property: &'static str) -> Self {
        Self {
            property,
            declared: T::DECLARED,
            type_nullable: T::NULLABLE,
            column: None,
            key: false,
            auto_increment: None,
            nullable: None,
            max_length: None,
            decimal: None,
            ignored: false,
        }
    }

    /// Describes a field that is never read or written.
    #[must_use]
    pub const fn ignored(property: &'static str) -> Self {
        Self {
            property,
            declared: DeclaredType::Blob,
            type_nullable: true,
            column: None,
            key: false,
            auto_increment: None,
            nullable: None,
            max_length: None,
            decimal: None,
            ignored: true,
        }
    }

    /// Marks the primary key.
    #[must_use]
    pub const fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Enables or disables engine-generated keys. Integer keys default to enabled.
    #[must_use]
    pub const fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = Some(enabled);
        self
    }

    /// Overrides the column name.
    #[must_use]
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column = Some(name);
        self
    }

    /// Allows NULL regardless of the Rust type.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    /// Rejects NULL regardless of the Rust type.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    /// Maximum length in encoded bytes.
    #[must_use]
    pub const fn max_length(mut self, bytes: usize) -> Self {
        self.max_length = Some(bytes);
        self
    }

    /// Decimal precision and scale.
    #[must_use]
    pub const fn decimal(mut self, (precision, scale): (u32, u32)) -> Self {
        self.decimal = Some((precision, scale));
        self
    }
}

/// Collects column descriptors and validates them into an [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    entity: &'static str,
    table: Option<&'static str>,
    columns: Vec<ColumnDef>,
}

impl SchemaBuilder {
    /// Starts a schema for the named type.
    #[must_use]
    pub const fn new(entity: &'static str) -> Self {
        Self {
            entity,
            table: None,
            columns: Vec::new(),
        }
    }

    /// Overrides the table name.
    #[must_use]
    pub const fn table(mut self, table: &'static str) -> Self {
        self.table = Some(table);
        self
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Applies naming conventions and validates the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the mapping is inconsistent.
    pub fn build(self) -> Result<EntitySchema> {
        let entity = self.entity;
        let fail = |reason: String| Error::mapping(entity, reason);

        let explicit_keys = self.columns.iter().filter(|c| c.key && !c.ignored).count();
        if explicit_keys > 1 {
            return Err(fail("more than one primary key".to_string()));
        }
        let auto_markers = self.columns.iter().filter(|c| c.auto_increment == Some(true)).count();
        if auto_markers > 1 {
            return Err(fail("more than one auto-increment column".to_string()));
        }

        let key_index = if explicit_keys == 1 {
            self.columns.iter().position(|c| c.key && !c.ignored)
        } else {
            self.columns.iter().position(|c| c.property == "id" && !c.ignored)
        };

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut auto_increment = false;

        for (i, def) in self.columns.into_iter().enumerate() {
            let column = def.column.map_or_else(|| def.property.to_case(Case::Snake), str::to_string);
            if !def.ignored && !seen.insert(column.clone()) {
                return Err(fail(format!("duplicate column {column}")));
            }

            let is_key = key_index == Some(i);
            if def.auto_increment == Some(true) && !is_key {
                return Err(fail(format!("{} is auto-increment but not the primary key", def.property)));
            }

            let mut declared = def.declared;
            if let Some((precision, scale)) = def.decimal {
                if !matches!(declared, DeclaredType::Decimal { .. }) {
                    return Err(fail(format!("{} is not a decimal", def.property)));
                }
                declared = DeclaredType::Decimal { precision, scale };
            }
            if let DeclaredType::Decimal { precision, scale } = declared
                && (precision == 0 || precision > MAX_DECIMAL_PRECISION || scale > precision)
            {
                return Err(fail(format!(
                    "{} has invalid decimal precision {precision} and scale {scale}",
                    def.property
                )));
            }

            if def.max_length.is_some() && !matches!(declared, DeclaredType::Text | DeclaredType::Blob)
            {
                return Err(fail(format!("{} has a maximum length but is not text or blob", def.property)));
            }

            if is_key {
                let enabled = def.auto_increment.unwrap_or(declared.is_integer());
                if enabled && !declared.is_integer() {
                    return Err(fail(format!("auto-increment key {} is not an integer", def.property)));
                }
                auto_increment = enabled;
            }

            columns.push(ColumnSchema {
                property: def.property,
                column,
                declared,
                nullable: def.nullable.unwrap_or(def.type_nullable),
                max_length: def.max_length,
                ignored: def.ignored,
            });
        }

        let table = self.table.map_or_else(|| pluralize(&entity.to_case(Case::Snake)), str::to_string);

        Ok(EntitySchema {
            entity,
            table,
            columns,
            primary_key: key_index,
            auto_increment,
        })
    }
}

fn pluralize(name: &str) -> String {
    let consonant_y = name.len() > 1
        && name.ends_with('y')
        && !name[..name.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u']);
    if consonant_y {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with(['s', 'x', 'z']) || name.ends_with("ch") || name.ends_with("sh") {
        format!("{name}es")
    } else {
        format!("{name}s")
    }
}

static SCHEMAS: LazyLock<DashMap<TypeId, Arc<EntitySchema>>> = LazyLock::new(DashMap::new);

/// Resolves the schema for `T`, building and caching it on first use.
///
/// # Errors
///
/// Returns [`Error::Mapping`] if `T`'s mapping is invalid. Failures are not cached.
pub fn resolve<T: Entity>() -> Result<Arc<EntitySchema>> {
    let id = TypeId::of::<T>();
    if let Some(schema) = SCHEMAS.get(&id) {
        return Ok(Arc::clone(schema.value()));
    }

    let schema = Arc::new(T::describe().build()?);
    tracing::debug!(entity = schema.entity, table = %schema.table, "resolved entity schema");
    Ok(Arc::clone(SCHEMAS.entry(id).or_insert(schema).value()))
}
