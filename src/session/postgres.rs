//! PostgreSQL session: one transaction per request, committed on flush.

use super::{primary_key, related_ids, LoadPlan, Session, SessionProvider};
use crate::config::{ColumnDef, ColumnType, EntityDef, RelationshipDef, RelationshipLink};
use crate::error::AppError;
use crate::geometry::Geometry;
use crate::record::{Record, Related};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::value::FieldValue;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;

#[derive(Clone)]
pub struct PgSessionProvider {
    pool: PgPool,
}

impl PgSessionProvider {
    pub fn new(pool: PgPool) -> Self {
        PgSessionProvider { pool }
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    async fn session(&self) -> Result<Box<dyn Session>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }
}

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

async fn fetch_rows(conn: &mut PgConnection, sql: &str, params: Vec<PgBindValue>) -> Result<Vec<PgRow>, AppError> {
    tracing::debug!(sql = %sql, params = ?params, "query");
    let mut query = sqlx::query(sql);
    for p in params {
        query = p.bind(query);
    }
    Ok(query.fetch_all(conn).await?)
}

async fn execute(conn: &mut PgConnection, q: QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in q.params {
        query = p.bind(query);
    }
    Ok(query.execute(conn).await?.rows_affected())
}

fn cell_to_value(row: &PgRow, column: &ColumnDef) -> Result<FieldValue, AppError> {
    let name = column.name.as_str();
    Ok(match column.column_type {
        ColumnType::Integer => row.try_get::<Option<i32>, _>(name)?.map(|n| FieldValue::Int(n.into())),
        ColumnType::Bigint => row.try_get::<Option<i64>, _>(name)?.map(FieldValue::Int),
        ColumnType::Float => row.try_get::<Option<f64>, _>(name)?.map(FieldValue::Float),
        ColumnType::Text => row.try_get::<Option<String>, _>(name)?.map(FieldValue::Text),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(FieldValue::Bool),
        ColumnType::Uuid => row.try_get::<Option<uuid::Uuid>, _>(name)?.map(FieldValue::Uuid),
        ColumnType::Date => row.try_get::<Option<chrono::NaiveDate>, _>(name)?.map(FieldValue::Date),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(name)?
            .map(FieldValue::Timestamp),
        ColumnType::Timestamptz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)?
            .map(FieldValue::TimestampTz),
        ColumnType::Json => row.try_get::<Option<serde_json::Value>, _>(name)?.map(FieldValue::Json),
        ColumnType::Geometry => row
            .try_get::<Option<Vec<u8>>, _>(name)?
            .map(|b| FieldValue::Geometry(Geometry::Wkb(b))),
        ColumnType::TextArray => row
            .try_get::<Option<Vec<String>>, _>(name)?
            .map(FieldValue::TextList),
    }
    .unwrap_or(FieldValue::Null))
}

fn row_to_record(entity: &EntityDef, row: &PgRow) -> Result<Record, AppError> {
    let mut record = Record::new();
    for (key, col) in entity.columns() {
        record.set(key, cell_to_value(row, col)?);
    }
    Ok(record)
}

fn association_table(owner: &EntityDef, table: &str) -> String {
    sql::qualified_table(&owner.schema_name, table)
}

/// Loads rows of `plan.entity` with `sql`/`params`, then hydrates the plan's relationships.
fn load<'a>(
    conn: &'a mut PgConnection,
    plan: &'a LoadPlan,
    sql: String,
    params: Vec<PgBindValue>,
) -> BoxFuture<'a, Result<Vec<Record>, AppError>> {
    Box::pin(async move {
        let rows = fetch_rows(&mut *conn, &sql, params).await?;
        let mut records = rows
            .iter()
            .map(|r| row_to_record(&plan.entity, r))
            .collect::<Result<Vec<_>, _>>()?;
        if plan.children.is_empty() {
            return Ok(records);
        }
        let (pk_key, pk) = primary_key(&plan.entity)?;
        for record in &mut records {
            let Some(id) = record.identity(pk_key) else {
                continue;
            };
            for (key, child) in &plan.children {
                let Some(rel) = plan.entity.relationship(key) else {
                    continue;
                };
                let related = load_related(&mut *conn, &plan.entity, &pk.name, rel, child, id).await?;
                record.set_relation(key.clone(), related);
            }
        }
        Ok(records)
    })
}

async fn load_related(
    conn: &mut PgConnection,
    owner: &EntityDef,
    owner_pk: &str,
    rel: &RelationshipDef,
    child: &LoadPlan,
    id: i64,
) -> Result<Related, AppError> {
    let target = &child.entity;
    let target_pk = rel.target_pk.as_str();
    let params = vec![PgBindValue::I64(id)];
    Ok(match &rel.link {
        RelationshipLink::ManyToOne { column } => {
            let sql = sql::select_many_to_one(owner, owner_pk, column, target, target_pk);
            let mut found = load(conn, child, sql, params).await?;
            Related::One(found.pop().map(Box::new))
        }
        RelationshipLink::OneToMany { column } => {
            let sql = sql::select_one_to_many(target, target_pk, column);
            Related::Many(load(conn, child, sql, params).await?)
        }
        RelationshipLink::ManyToMany {
            table,
            local_column,
            remote_column,
        } => {
            let assoc = association_table(owner, table);
            let sql = sql::select_many_to_many(target, target_pk, &assoc, local_column, remote_column);
            Related::Many(load(conn, child, sql, params).await?)
        }
    })
}

/// Column values to write: every non-key column, with to-one FK columns taken from assigned
/// relationships. An FK column without its own property is written as a bigint.
fn column_values(entity: &EntityDef, record: &Record) -> Result<Vec<(ColumnDef, FieldValue)>, AppError> {
    let mut values: Vec<(ColumnDef, FieldValue)> = entity
        .columns()
        .filter(|(_, c)| !c.primary_key)
        .map(|(key, c)| (c.clone(), record.get(key).clone()))
        .collect();
    for (key, related) in &record.relations {
        let Some(rel) = entity.relationship(key) else {
            continue;
        };
        let RelationshipLink::ManyToOne { column } = &rel.link else {
            continue;
        };
        let value = related_ids(rel, related)?
            .first()
            .map(|id| FieldValue::Int(*id))
            .unwrap_or(FieldValue::Null);
        match values.iter_mut().find(|(c, _)| c.name == *column) {
            Some(slot) => slot.1 = value,
            None => values.push((
                ColumnDef {
                    name: column.clone(),
                    column_type: ColumnType::Bigint,
                    primary_key: false,
                    foreign_key: None,
                    nullable: true,
                },
                value,
            )),
        }
    }
    Ok(values)
}

fn borrowed(values: &[(ColumnDef, FieldValue)]) -> Vec<(&ColumnDef, FieldValue)> {
    values.iter().map(|(c, v)| (c, v.clone())).collect()
}

impl PgSession {
    /// Rewrite to-many relationship storage for the owner `id`.
    async fn write_collections(&mut self, entity: &EntityDef, record: &Record, id: i64) -> Result<(), AppError> {
        for (key, related) in &record.relations {
            let Some(rel) = entity.relationship(key) else {
                continue;
            };
            let ids = related_ids(rel, related)?;
            match &rel.link {
                RelationshipLink::ManyToOne { .. } => {}
                RelationshipLink::OneToMany { column } => {
                    execute(
                        &mut self.tx,
                        QueryBuf {
                            sql: sql::clear_one_to_many(&rel.target_schema, &rel.target_table, column),
                            params: vec![PgBindValue::I64(id)],
                        },
                    )
                    .await?;
                    if !ids.is_empty() {
                        execute(
                            &mut self.tx,
                            QueryBuf {
                                sql: sql::attach_one_to_many(&rel.target_schema, &rel.target_table, &rel.target_pk, column),
                                params: vec![PgBindValue::I64(id), PgBindValue::I64Array(ids)],
                            },
                        )
                        .await?;
                    }
                }
                RelationshipLink::ManyToMany {
                    table,
                    local_column,
                    remote_column,
                } => {
                    let assoc = association_table(entity, table);
                    execute(
                        &mut self.tx,
                        QueryBuf {
                            sql: sql::clear_many_to_many(&assoc, local_column),
                            params: vec![PgBindValue::I64(id)],
                        },
                    )
                    .await?;
                    if !ids.is_empty() {
                        execute(
                            &mut self.tx,
                            QueryBuf {
                                sql: sql::attach_many_to_many(&assoc, local_column, remote_column),
                                params: vec![PgBindValue::I64(id), PgBindValue::I64Array(ids)],
                            },
                        )
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for PgSession {
    async fn all(&mut self, plan: &LoadPlan) -> Result<Vec<Record>, AppError> {
        let (_, pk) = primary_key(&plan.entity)?;
        let sql = sql::select_all(&plan.entity, &pk.name);
        load(&mut self.tx, plan, sql, Vec::new()).await
    }

    async fn count(&mut self, entity: &EntityDef) -> Result<u64, AppError> {
        let sql = sql::count(entity);
        tracing::debug!(sql = %sql, "query");
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *self.tx).await?;
        Ok(n.max(0) as u64)
    }

    async fn find(&mut self, plan: &LoadPlan, id: i64) -> Result<Option<Record>, AppError> {
        let (_, pk) = primary_key(&plan.entity)?;
        let sql = sql::select_by_id(&plan.entity, &pk.name);
        let mut found = load(&mut self.tx, plan, sql, vec![PgBindValue::I64(id)]).await?;
        Ok(found.pop())
    }

    async fn find_in(&mut self, plan: &LoadPlan, ids: &[i64]) -> Result<Vec<Record>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (_, pk) = primary_key(&plan.entity)?;
        let sql = sql::select_by_ids(&plan.entity, &pk.name);
        load(&mut self.tx, plan, sql, vec![PgBindValue::I64Array(ids.to_vec())]).await
    }

    async fn insert(&mut self, entity: &EntityDef, record: &mut Record) -> Result<i64, AppError> {
        let (pk_key, pk) = primary_key(entity)?;
        let mut values = column_values(entity, record)?;
        if let Some(id) = record.identity(pk_key) {
            values.insert(0, (pk.clone(), FieldValue::Int(id)));
        }
        let q = sql::insert(entity, &pk.name, &borrowed(&values));
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in q.params {
            query = p.bind_scalar(query);
        }
        let id = query.fetch_one(&mut *self.tx).await?;
        record.set(pk_key, FieldValue::Int(id));
        self.write_collections(entity, record, id).await?;
        Ok(id)
    }

    async fn update(&mut self, entity: &EntityDef, record: &Record) -> Result<(), AppError> {
        let (pk_key, pk) = primary_key(entity)?;
        let id = record
            .identity(pk_key)
            .ok_or_else(|| AppError::Validation(format!("{} is required for update", pk_key)))?;
        let values = column_values(entity, record)?;
        if let Some(q) = sql::update(entity, &pk.name, id, &borrowed(&values)) {
            if execute(&mut self.tx, q).await? == 0 {
                return Err(AppError::NotFound(format!("No {} found with id: {}.", entity.name, id)));
            }
        }
        self.write_collections(entity, record, id).await
    }

    async fn delete(&mut self, entity: &EntityDef, id: i64) -> Result<(), AppError> {
        let (_, pk) = primary_key(entity)?;
        for rel in entity.relationships() {
            let sql = match &rel.link {
                RelationshipLink::ManyToOne { .. } => continue,
                RelationshipLink::OneToMany { column } => {
                    sql::clear_one_to_many(&rel.target_schema, &rel.target_table, column)
                }
                RelationshipLink::ManyToMany { table, local_column, .. } => {
                    sql::clear_many_to_many(&association_table(entity, table), local_column)
                }
            };
            execute(
                &mut self.tx,
                QueryBuf {
                    sql,
                    params: vec![PgBindValue::I64(id)],
                },
            )
            .await?;
        }
        let q = QueryBuf {
            sql: sql::delete(entity, &pk.name),
            params: vec![PgBindValue::I64(id)],
        };
        if execute(&mut self.tx, q).await? == 0 {
            return Err(AppError::NotFound(format!("No {} found with id: {}.", entity.name, id)));
        }
        Ok(())
    }

    async fn flush(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
