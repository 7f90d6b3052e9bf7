//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from resolved entities.
//! Identifiers come from declarations only; values are always parameters.

use crate::config::{ColumnDef, ColumnType, EntityDef};
use crate::sql::PgBindValue;
use crate::geometry::Geometry;
use crate::value::FieldValue;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn entity_table(entity: &EntityDef) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder for a column value; geometries go through PostGIS constructors.
    fn push_value(&mut self, column: &ColumnDef, value: &FieldValue) -> String {
        let n = self.push_param(PgBindValue::from_field(value));
        match (column.column_type, value) {
            (ColumnType::Geometry, FieldValue::Geometry(Geometry::Wkt(_))) => format!("ST_GeomFromText(${})", n),
            (ColumnType::Geometry, FieldValue::Geometry(Geometry::Wkb(_))) => format!("ST_GeomFromWKB(${})", n),
            (t, _) => format!("${}::{}", n, t.pg_type()),
        }
    }
}

/// SELECT list: geometries as WKB, everything else as-is. `alias` prefixes each column.
pub fn select_column_list(entity: &EntityDef, alias: Option<&str>) -> String {
    entity
        .columns()
        .map(|(_, c)| {
            let q = quoted(&c.name);
            let expr = match alias {
                Some(a) => format!("{}.{}", a, q),
                None => q.clone(),
            };
            if c.column_type == ColumnType::Geometry {
                format!("ST_AsBinary({}) AS {}", expr, q)
            } else if alias.is_some() {
                format!("{} AS {}", expr, q)
            } else {
                expr
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT every row ordered by primary key.
pub fn select_all(entity: &EntityDef, pk: &str) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        select_column_list(entity, None),
        entity_table(entity),
        quoted(pk)
    )
}

/// SELECT by primary key. Caller binds the id as $1.
pub fn select_by_id(entity: &EntityDef, pk: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = $1",
        select_column_list(entity, None),
        entity_table(entity),
        quoted(pk)
    )
}

/// SELECT rows whose primary key is in the bigint array bound as $1.
pub fn select_by_ids(entity: &EntityDef, pk: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ANY($1::bigint[]) ORDER BY {}",
        select_column_list(entity, None),
        entity_table(entity),
        quoted(pk),
        quoted(pk)
    )
}

pub fn count(entity: &EntityDef) -> String {
    format!("SELECT COUNT(*) FROM {}", entity_table(entity))
}

/// Target row referenced by the owner's FK column. Caller binds the owner id as $1.
pub fn select_many_to_one(owner: &EntityDef, owner_pk: &str, fk: &str, target: &EntityDef, target_pk: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = (SELECT {} FROM {} WHERE {} = $1)",
        select_column_list(target, None),
        entity_table(target),
        quoted(target_pk),
        quoted(fk),
        entity_table(owner),
        quoted(owner_pk)
    )
}

/// Target rows pointing at the owner through `fk`. Caller binds the owner id as $1.
pub fn select_one_to_many(target: &EntityDef, target_pk: &str, fk: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = $1 ORDER BY {}",
        select_column_list(target, None),
        entity_table(target),
        quoted(fk),
        quoted(target_pk)
    )
}

/// Target rows linked to the owner through an association table.
pub fn select_many_to_many(
    target: &EntityDef,
    target_pk: &str,
    assoc: &str,
    local: &str,
    remote: &str,
) -> String {
    format!(
        "SELECT {} FROM {} t JOIN {} a ON a.{} = t.{} WHERE a.{} = $1 ORDER BY t.{}",
        select_column_list(target, Some("t")),
        entity_table(target),
        assoc,
        quoted(remote),
        quoted(target_pk),
        quoted(local),
        quoted(target_pk)
    )
}

/// INSERT the given columns, returning the primary key as bigint.
pub fn insert(entity: &EntityDef, pk: &str, values: &[(&ColumnDef, FieldValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = entity_table(entity);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}::bigint", table, quoted(pk));
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (c, v) in values {
        cols.push(quoted(&c.name));
        placeholders.push(q.push_value(c, v));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}::bigint",
        table,
        cols.join(", "),
        placeholders.join(", "),
        quoted(pk)
    );
    q
}

/// UPDATE by id: SET the given columns. Returns None when there is nothing to set.
pub fn update(entity: &EntityDef, pk: &str, id: i64, values: &[(&ColumnDef, FieldValue)]) -> Option<QueryBuf> {
    if values.is_empty() {
        return None;
    }
    let mut q = QueryBuf::new();
    let sets: Vec<String> = values
        .iter()
        .map(|(c, v)| format!("{} = {}", quoted(&c.name), q.push_value(c, v)))
        .collect();
    let id_param = q.push_param(PgBindValue::I64(id));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        entity_table(entity),
        sets.join(", "),
        quoted(pk),
        id_param
    );
    Some(q)
}

/// DELETE by id bound as $1.
pub fn delete(entity: &EntityDef, pk: &str) -> String {
    format!("DELETE FROM {} WHERE {} = $1", entity_table(entity), quoted(pk))
}

/// Detach every target row pointing at the owner ($1).
pub fn clear_one_to_many(target_schema: &str, target_table: &str, fk: &str) -> String {
    format!(
        "UPDATE {} SET {} = NULL WHERE {} = $1",
        qualified_table(target_schema, target_table),
        quoted(fk),
        quoted(fk)
    )
}

/// Point target rows whose pk is in $2 at the owner ($1).
pub fn attach_one_to_many(target_schema: &str, target_table: &str, target_pk: &str, fk: &str) -> String {
    format!(
        "UPDATE {} SET {} = $1 WHERE {} = ANY($2::bigint[])",
        qualified_table(target_schema, target_table),
        quoted(fk),
        quoted(target_pk)
    )
}

pub fn clear_many_to_many(assoc: &str, local: &str) -> String {
    format!("DELETE FROM {} WHERE {} = $1", assoc, quoted(local))
}

/// Link the owner ($1) to every id in $2.
pub fn attach_many_to_many(assoc: &str, local: &str, remote: &str) -> String {
    format!(
        "INSERT INTO {} ({}, {}) SELECT $1, UNNEST($2::bigint[])",
        assoc,
        quoted(local),
        quoted(remote)
    )
}
