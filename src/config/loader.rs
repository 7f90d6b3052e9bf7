//! Load declarations from a directory and resolve them into the runtime model.

use crate::config::resolved::{ColumnDef, EntityDef, PropertyDef, RelationshipDef, ResolvedModel};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Schema used when an entity omits one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Build resolved model from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let by_name: BTreeMap<&str, &EntityConfig> =
        config.entities.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut entities = BTreeMap::new();
    for e in &config.entities {
        let mut properties = Vec::with_capacity(e.properties.len());
        for p in &e.properties {
            let resolved = match p {
                PropertyConfig::Column { key, columns } => PropertyDef::Column {
                    key: key.clone(),
                    columns: columns.iter().map(column_def).collect(),
                },
                PropertyConfig::Relationship { key, target, link } => {
                    let target_entity = by_name.get(target.as_str()).ok_or_else(|| {
                        ConfigError::MissingReference {
                            kind: "entity",
                            id: target.clone(),
                        }
                    })?;
                    let (target_pk_key, target_pk) = single_primary_key(target_entity).ok_or_else(|| {
                        ConfigError::Validation(format!(
                            "relationship {}.{} targets {} which has no single-column primary key",
                            e.name, key, target
                        ))
                    })?;
                    PropertyDef::Relationship(RelationshipDef {
                        key: key.clone(),
                        target: target.clone(),
                        target_schema: schema_of(target_entity),
                        target_table: target_entity.table.clone(),
                        target_pk,
                        target_pk_key,
                        link: link.clone(),
                    })
                }
            };
            properties.push(resolved);
        }
        let entity = EntityDef {
            name: e.name.clone(),
            schema_name: schema_of(e),
            table_name: e.table.clone(),
            acl: e.acl.clone(),
            properties,
        };
        entities.insert(e.name.clone(), Arc::new(entity));
    }

    Ok(ResolvedModel { entities })
}

fn column_def(c: &ColumnConfig) -> ColumnDef {
    ColumnDef {
        name: c.name.clone(),
        column_type: c.type_,
        primary_key: c.primary_key,
        foreign_key: c.foreign_key.clone(),
        nullable: c.nullable && !c.primary_key,
    }
}

fn schema_of(e: &EntityConfig) -> String {
    e.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string())
}

fn single_primary_key(e: &EntityConfig) -> Option<(String, String)> {
    e.properties.iter().find_map(|p| match p {
        PropertyConfig::Column { key, columns } if columns.len() == 1 && columns[0].primary_key => {
            Some((key.clone(), columns[0].name.clone()))
        }
        _ => None,
    })
}

/// Read `entities.json` and `resources.json` (optional) from a directory.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let entities = read_json(&dir.join("entities.json")).await?;
    let resources = match tokio::fs::try_exists(dir.join("resources.json")).await {
        Ok(true) => read_json(&dir.join("resources.json")).await?,
        _ => Vec::new(),
    };
    Ok(FullConfig {
        entities,
        resources,
    })
}

async fn read_json<T>(path: &Path) -> Result<Vec<T>, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    tracing::debug!(path = %path.display(), "reading declarations");
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
