//! Internal representation of a table-like schema.
//!
//! Property order is semantically load-bearing: it preserves the JSON key
//! order of the source document and drives DML parameter order, so the
//! property map is insertion-ordered.

use std::sync::Arc;

use indexmap::IndexMap;

/// Column type of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropType {
    String,
    Integer,
    Number,
    Bool,
    Date,
    Time,
    DateTime,
    Timestamp,
    Binary,
    Json,
}

impl PropType {
    /// The JSON-Schema type label this variant was loaded from.
    pub fn label(&self) -> &'static str {
        match self {
            PropType::String => "string",
            PropType::Integer => "integer",
            PropType::Number => "number",
            PropType::Bool => "boolean",
            PropType::Date => "date",
            PropType::Time => "time",
            PropType::DateTime => "datetime",
            PropType::Timestamp => "timestamp",
            PropType::Binary => "binary",
            PropType::Json => "json",
        }
    }

    /// True for types whose values are JSON numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropType::Integer | PropType::Number)
    }
}

/// Primary key generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdKind {
    /// Client-side UUIDv7, canonical hyphenated text.
    #[default]
    UuidV7,
    /// Client-side ULID-style text (high bits wall clock, low bits sequence).
    HighLow,
    /// Client-side 64-bit snowflake integer.
    Snowflake,
    /// Engine-generated, deployment-wide sequence.
    DbSerial,
    /// Engine-generated, one sequence per schema.
    TbSerial,
}

impl IdKind {
    pub fn label(&self) -> &'static str {
        match self {
            IdKind::UuidV7 => "UUIDv7",
            IdKind::HighLow => "HighLow",
            IdKind::Snowflake => "Snowflake",
            IdKind::DbSerial => "DBSerial",
            IdKind::TbSerial => "TBSerial",
        }
    }
}

/// Classification of a property's `default` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultKind {
    #[default]
    None,
    /// Text literal, single-quoted and escaped on emission.
    String,
    /// `true` / `false` literal.
    Boolean,
    /// Numeric literal.
    Number,
    /// Emitted verbatim (e.g. `NULL`, `CURRENT_TIMESTAMP`).
    Raw,
}

/// A property's default value: classification plus the literal text.
#[derive(Debug, Clone, Default)]
pub struct DefaultValue {
    pub kind: DefaultKind,
    pub literal: String,
}

impl DefaultValue {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.kind == DefaultKind::None
    }
}

/// A single schema property (one table column).
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// Name of the owning schema.
    pub schema_name: String,
    pub ty: PropType,
    pub is_id: bool,
    pub id_kind: IdKind,
    pub required: bool,
    pub encoding: Option<String>,
    pub default: DefaultValue,
    pub indexed: bool,
    pub index_type: Option<String>,
    pub unique: bool,
    pub index_name: Option<String>,
}

impl Property {
    /// A plain property of the given type, no constraints.
    pub fn new(name: impl Into<String>, schema_name: impl Into<String>, ty: PropType) -> Self {
        Property {
            name: name.into(),
            schema_name: schema_name.into(),
            ty,
            is_id: false,
            id_kind: IdKind::default(),
            required: false,
            encoding: None,
            default: DefaultValue::none(),
            indexed: false,
            index_type: None,
            unique: false,
            index_name: None,
        }
    }
}

/// A top-level composite index over several properties.
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    pub fields: Vec<String>,
    pub index_type: Option<String>,
    pub unique: bool,
    pub name: Option<String>,
}

/// A table-like schema: name, ordered properties, indexes, version.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Row id in `schema_catalog` once persisted.
    pub id: Option<i64>,
    pub name: String,
    pub version: i32,
    /// DDL for this version has been applied to the store.
    pub applied: bool,
    /// The source JSON-Schema text this schema was loaded from.
    pub source_json: String,
    pub properties: IndexMap<String, Property>,
    pub indexes: Vec<CompositeIndex>,
    /// The previously applied version this one migrated from.
    pub parent: Option<Arc<Schema>>,
}

impl Schema {
    /// An empty schema shell; used by tests and the loader.
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Schema {
            id: None,
            name: name.into(),
            version,
            applied: false,
            source_json: String::new(),
            properties: IndexMap::new(),
            indexes: Vec::new(),
            parent: None,
        }
    }

    /// The primary key property: the one flagged `is_id`, else the
    /// property named `id` as implicit PK.
    pub fn pk(&self) -> Option<&Property> {
        self.properties
            .values()
            .find(|p| p.is_id)
            .or_else(|| self.properties.get("id"))
    }

    /// Insert a property, preserving insertion order.
    pub fn push_property(&mut self, prop: Property) {
        self.properties.insert(prop.name.clone(), prop);
    }
}
