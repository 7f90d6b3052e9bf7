//! Declaration validation: referential integrity and route consistency.

use crate::config::{FullConfig, PropertyConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut entity_names = HashSet::new();
    for e in &config.entities {
        if !entity_names.insert(e.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(e.name.clone()));
        }
    }
    let tables: HashMap<&str, &crate::config::EntityConfig> =
        config.entities.iter().map(|e| (e.table.as_str(), e)).collect();

    for e in &config.entities {
        let mut keys = HashSet::new();
        for p in &e.properties {
            if !keys.insert(p.key()) {
                return Err(ConfigError::Validation(format!(
                    "entity {} declares property {} twice",
                    e.name,
                    p.key()
                )));
            }
            match p {
                PropertyConfig::Column { key, columns } => {
                    if columns.is_empty() {
                        return Err(ConfigError::Validation(format!(
                            "property {}.{} has no column",
                            e.name, key
                        )));
                    }
                    for c in columns {
                        if let Some(fk) = &c.foreign_key {
                            let (table, column) = fk.split_once('.').ok_or_else(|| {
                                ConfigError::Validation(format!(
                                    "foreign key of {}.{} must be table.column, got {}",
                                    e.name, key, fk
                                ))
                            })?;
                            let known = tables.get(table).is_some_and(|t| {
                                t.properties.iter().any(|p| match p {
                                    PropertyConfig::Column { columns, .. } => {
                                        columns.iter().any(|c| c.name == column)
                                    }
                                    _ => false,
                                })
                            });
                            if !known {
                                return Err(ConfigError::MissingReference {
                                    kind: "column",
                                    id: fk.clone(),
                                });
                            }
                        }
                    }
                }
                PropertyConfig::Relationship { target, .. } => {
                    if !entity_names.contains(target.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "entity",
                            id: target.clone(),
                        });
                    }
                }
            }
        }
    }

    let mut resource_names = HashSet::new();
    let mut base_urls = HashSet::new();
    for r in &config.resources {
        if !entity_names.contains(r.entity.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "entity",
                id: r.entity.clone(),
            });
        }
        if !resource_names.insert(r.name.as_str()) {
            return Err(ConfigError::DuplicateResource(r.name.clone()));
        }
        if let Some(base) = &r.base_url {
            if !base.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "base url of {} must start with '/', got {}",
                    r.name, base
                )));
            }
            if !base_urls.insert(base.as_str()) {
                return Err(ConfigError::DuplicatePath(base.clone()));
            }
        }
    }

    Ok(())
}
