//! Raw declaration types matching the JSON config (entities.json + resources.json).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage type of a column. Drives JSON coercion, row decoding and DDL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Bigint,
    Float,
    Text,
    Boolean,
    Uuid,
    Date,
    Timestamp,
    Timestamptz,
    Json,
    Geometry,
    TextArray,
}

impl ColumnType {
    /// PostgreSQL type name used for casts and DDL.
    pub fn pg_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Bigint => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Timestamptz => "timestamptz",
            ColumnType::Json => "jsonb",
            ColumnType::Geometry => "geometry",
            ColumnType::TextArray => "text[]",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Bigint)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    /// Referenced column as `table.column`.
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

/// How a relationship is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationshipLink {
    /// Foreign key column on this entity's table.
    ManyToOne { column: String },
    /// Foreign key column on the target's table.
    OneToMany { column: String },
    /// Association table holding (local id, remote id) pairs.
    ManyToMany {
        table: String,
        local_column: String,
        remote_column: String,
    },
}

impl RelationshipLink {
    pub fn is_to_one(&self) -> bool {
        matches!(self, RelationshipLink::ManyToOne { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyConfig {
    Column {
        key: String,
        columns: Vec<ColumnConfig>,
    },
    Relationship {
        key: String,
        target: String,
        link: RelationshipLink,
    },
}

impl PropertyConfig {
    pub fn key(&self) -> &str {
        match self {
            PropertyConfig::Column { key, .. } | PropertyConfig::Relationship { key, .. } => key,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Allow,
    Deny,
}

/// One access-control entry. `permissions` may contain `*` for every permission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub action: AclAction,
    pub principal: String,
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Absent means the entity carries no access-control policy at all.
    #[serde(default)]
    pub acl: Option<Vec<AclEntry>>,
    pub properties: Vec<PropertyConfig>,
}

/// Nested resource for one relationship. `resource` names another declared resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChildConfig {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource id, also the route name prefix.
    pub name: String,
    pub entity: String,
    /// Routed at this path when present; nested-only otherwise.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub create: bool,
    #[serde(default)]
    pub attr_list: Option<Vec<String>>,
    #[serde(default)]
    pub children: Option<BTreeMap<String, ChildConfig>>,
}

fn default_true() -> bool {
    true
}

/// All declarations in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}
