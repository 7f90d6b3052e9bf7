//! Apply the entity model to the database: schemas, tables, association tables, foreign keys.
//! Order follows PostgreSQL dependencies: extensions and schemas, then tables, then constraints.

use crate::config::{ColumnDef, ColumnType, EntityDef, RelationshipLink, ResolvedModel};
use crate::error::AppError;
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::BTreeSet;

fn column_sql(c: &ColumnDef) -> String {
    let typ = match (c.primary_key, c.column_type) {
        (true, ColumnType::Integer) => "SERIAL",
        (true, ColumnType::Bigint) => "BIGSERIAL",
        (_, t) => t.pg_type(),
    };
    let mut def = format!("{} {}", quoted(&c.name), typ);
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    def
}

/// CREATE TABLE for one entity. FK columns of to-one relationships without their own property are added as bigint.
pub fn create_table_sql(entity: &EntityDef) -> String {
    let mut defs: Vec<String> = Vec::new();
    let mut names: BTreeSet<&str> = BTreeSet::new();
    let mut pk: Vec<String> = Vec::new();
    for (_, c) in entity.columns() {
        names.insert(&c.name);
        defs.push(column_sql(c));
        if c.primary_key {
            pk.push(quoted(&c.name));
        }
    }
    for rel in entity.relationships() {
        if let RelationshipLink::ManyToOne { column } = &rel.link {
            if names.insert(column) {
                defs.push(format!("{} bigint", quoted(column)));
            }
        }
    }
    if !pk.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        qualified_table(&entity.schema_name, &entity.table_name),
        defs.join(",\n  ")
    )
}

/// Association tables owned by `entity`, created in the entity's schema.
pub fn association_tables_sql(entity: &EntityDef) -> Vec<String> {
    entity
        .relationships()
        .filter_map(|rel| match &rel.link {
            RelationshipLink::ManyToMany {
                table,
                local_column,
                remote_column,
            } => Some(format!(
                "CREATE TABLE IF NOT EXISTS {} (\n  {} bigint NOT NULL,\n  {} bigint NOT NULL,\n  PRIMARY KEY ({}, {})\n)",
                qualified_table(&entity.schema_name, table),
                quoted(local_column),
                quoted(remote_column),
                quoted(local_column),
                quoted(remote_column)
            )),
            _ => None,
        })
        .collect()
}

/// ALTER TABLE ... ADD CONSTRAINT for to-one relationships and declared `foreign_key` columns.
pub fn foreign_keys_sql(entity: &EntityDef, model: &ResolvedModel) -> Vec<String> {
    let table = qualified_table(&entity.schema_name, &entity.table_name);
    let mut out = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for rel in entity.relationships() {
        if let RelationshipLink::ManyToOne { column } = &rel.link {
            seen.insert(column.clone());
            out.push(fk_sql(
                &table,
                &entity.table_name,
                column,
                &qualified_table(&rel.target_schema, &rel.target_table),
                &rel.target_pk,
            ));
        }
    }
    for (_, c) in entity.columns() {
        let Some(reference) = &c.foreign_key else {
            continue;
        };
        if seen.contains(&c.name) {
            continue;
        }
        let Some((ref_table, ref_column)) = reference.split_once('.') else {
            continue;
        };
        let schema = model
            .entities
            .values()
            .find(|e| e.table_name == ref_table)
            .map(|e| e.schema_name.as_str())
            .unwrap_or(&entity.schema_name);
        out.push(fk_sql(
            &table,
            &entity.table_name,
            &c.name,
            &qualified_table(schema, ref_table),
            ref_column,
        ));
    }
    out
}

fn fk_sql(table: &str, table_name: &str, column: &str, target: &str, target_column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE SET NULL",
        table,
        quoted(&format!("{}_{}_fkey", table_name, column)),
        quoted(column),
        target,
        quoted(target_column)
    )
}

/// Every statement `apply_migrations` runs, in order. The bool marks statements whose failure is ignored.
pub fn migration_plan(model: &ResolvedModel) -> Vec<(String, bool)> {
    let mut plan = Vec::new();
    let uses_geometry = model
        .entities
        .values()
        .any(|e| e.columns().any(|(_, c)| c.column_type == ColumnType::Geometry));
    if uses_geometry {
        plan.push(("CREATE EXTENSION IF NOT EXISTS postgis".to_string(), false));
    }
    let schemas: BTreeSet<&str> = model.entities.values().map(|e| e.schema_name.as_str()).collect();
    for s in schemas {
        plan.push((format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(s)), false));
    }
    for e in model.entities.values() {
        plan.push((create_table_sql(e), false));
    }
    for e in model.entities.values() {
        plan.extend(association_tables_sql(e).into_iter().map(|s| (s, false)));
    }
    // constraints may already exist on a second run
    for e in model.entities.values() {
        plan.extend(foreign_keys_sql(e, model).into_iter().map(|s| (s, true)));
    }
    plan
}

/// Create every schema and table of the model. Idempotent: tables use IF NOT EXISTS, constraint errors are ignored.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    for (sql, may_fail) in migration_plan(model) {
        tracing::debug!(sql = %sql, "migration");
        let result = sqlx::query(&sql).execute(pool).await;
        match result {
            Ok(_) => {}
            Err(e) if may_fail => tracing::debug!(error = %e, "migration statement skipped"),
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(entities = model.entities.len(), "migrations applied");
    Ok(())
}
