//! Resolved entity model: declarations validated and flattened for runtime use.

use crate::config::{AclEntry, ColumnType, RelationshipLink};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub foreign_key: Option<String>,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipDef {
    pub key: String,
    /// Target entity name.
    pub target: String,
    pub target_schema: String,
    pub target_table: String,
    /// Target primary key column.
    pub target_pk: String,
    /// Property key of the target primary key.
    pub target_pk_key: String,
    pub link: RelationshipLink,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyDef {
    Column { key: String, columns: Vec<ColumnDef> },
    Relationship(RelationshipDef),
}

impl PropertyDef {
    pub fn key(&self) -> &str {
        match self {
            PropertyDef::Column { key, .. } => key,
            PropertyDef::Relationship(r) => &r.key,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub acl: Option<Vec<AclEntry>>,
    pub properties: Vec<PropertyDef>,
}

impl EntityDef {
    /// Whether the entity declares an access-control policy.
    pub fn has_acl(&self) -> bool {
        self.acl.is_some()
    }

    /// Properties backed by exactly one column, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnDef)> {
        self.properties.iter().filter_map(|p| match p {
            PropertyDef::Column { key, columns } if columns.len() == 1 => {
                Some((key.as_str(), &columns[0]))
            }
            _ => None,
        })
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDef> {
        self.columns().find(|(k, _)| *k == key).map(|(_, c)| c)
    }

    /// First single-column primary key property.
    pub fn primary_key(&self) -> Option<(&str, &ColumnDef)> {
        self.columns().find(|(_, c)| c.primary_key)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDef> {
        self.properties.iter().filter_map(|p| match p {
            PropertyDef::Relationship(r) => Some(r),
            _ => None,
        })
    }

    pub fn relationship(&self, key: &str) -> Option<&RelationshipDef> {
        self.relationships().find(|r| r.key == key)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub entities: BTreeMap<String, Arc<EntityDef>>,
}

impl ResolvedModel {
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDef>> {
        self.entities.get(name)
    }
}
