//! In-memory store. A session holds the store's write lock for its whole life and works on a
//! snapshot that replaces the store on flush, so sessions run one after another.

use super::{primary_key, related_ids, LoadPlan, Session, SessionProvider};
use crate::config::{EntityDef, RelationshipDef, RelationshipLink};
use crate::error::AppError;
use crate::record::{Record, Related};
use crate::value::FieldValue;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// One stored row: column name to value.
type Row = BTreeMap<String, FieldValue>;

#[derive(Clone, Debug, Default)]
struct Tables {
    /// Keyed by `schema.table`, rows keyed by primary key.
    rows: HashMap<String, BTreeMap<i64, Row>>,
    /// Association tables keyed by `schema.table`: (local id, remote id).
    links: HashMap<String, BTreeSet<(i64, i64)>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other session is open.
    async fn begin(&self) -> MemorySession {
        let guard = self.tables.clone().write_owned().await;
        let work = (*guard).clone();
        MemorySession { guard, work }
    }
}

#[async_trait]
impl SessionProvider for MemoryStore {
    async fn session(&self) -> Result<Box<dyn Session>, AppError> {
        Ok(Box::new(self.begin().await))
    }
}

pub struct MemorySession {
    guard: OwnedRwLockWriteGuard<Tables>,
    work: Tables,
}

fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

fn entity_key(entity: &EntityDef) -> String {
    table_key(&entity.schema_name, &entity.table_name)
}

impl MemorySession {
    fn table(&self, key: &str) -> Option<&BTreeMap<i64, Row>> {
        self.work.rows.get(key)
    }

    fn load(&self, plan: &LoadPlan, id: i64, row: &Row) -> Result<Record, AppError> {
        let entity = &plan.entity;
        let mut record = Record::new();
        for (key, col) in entity.columns() {
            record.set(key, row.get(&col.name).cloned().unwrap_or(FieldValue::Null));
        }
        for (key, child) in &plan.children {
            let Some(rel) = entity.relationship(key) else {
                continue;
            };
            let related = self.load_related(&entity.schema_name, rel, child, id, row)?;
            record.set_relation(key.clone(), related);
        }
        Ok(record)
    }

    fn load_related(
        &self,
        owner_schema: &str,
        rel: &RelationshipDef,
        child: &LoadPlan,
        id: i64,
        row: &Row,
    ) -> Result<Related, AppError> {
        let target = entity_key(&child.entity);
        let empty = BTreeMap::new();
        let rows = self.table(&target).unwrap_or(&empty);
        Ok(match &rel.link {
            RelationshipLink::ManyToOne { column } => {
                let fk = row.get(column).and_then(FieldValue::as_i64);
                match fk.and_then(|fk| rows.get(&fk).map(|r| (fk, r))) {
                    Some((fk, r)) => Related::One(Some(Box::new(self.load(child, fk, r)?))),
                    None => Related::One(None),
                }
            }
            RelationshipLink::OneToMany { column } => {
                let mut out = Vec::new();
                for (child_id, r) in rows {
                    if r.get(column).and_then(FieldValue::as_i64) == Some(id) {
                        out.push(self.load(child, *child_id, r)?);
                    }
                }
                Related::Many(out)
            }
            RelationshipLink::ManyToMany { table, .. } => {
                let assoc = table_key(owner_schema, table);
                let mut out = Vec::new();
                if let Some(pairs) = self.work.links.get(&assoc) {
                    for (_, remote) in pairs.range((id, i64::MIN)..=(id, i64::MAX)) {
                        if let Some(r) = rows.get(remote) {
                            out.push(self.load(child, *remote, r)?);
                        }
                    }
                }
                Related::Many(out)
            }
        })
    }

    fn build_row(&self, entity: &EntityDef, record: &Record, id: i64) -> Row {
        let mut row = Row::new();
        for (key, col) in entity.columns() {
            let value = if col.primary_key {
                FieldValue::Int(id)
            } else {
                record.get(key).clone()
            };
            row.insert(col.name.clone(), value);
        }
        row
    }

    /// Write assigned relationships: FK column for to-one, target FKs or link rows for to-many.
    fn write_relations(&mut self, entity: &EntityDef, record: &Record, id: i64, row: &mut Row) -> Result<(), AppError> {
        for (key, related) in &record.relations {
            let Some(rel) = entity.relationship(key) else {
                continue;
            };
            let ids = related_ids(rel, related)?;
            match &rel.link {
                RelationshipLink::ManyToOne { column } => {
                    let value = ids.first().map(|i| FieldValue::Int(*i)).unwrap_or(FieldValue::Null);
                    row.insert(column.clone(), value);
                }
                RelationshipLink::OneToMany { column } => {
                    let target = table_key(&rel.target_schema, &rel.target_table);
                    let rows = self.work.rows.entry(target).or_default();
                    for (child_id, child) in rows.iter_mut() {
                        let linked = child.get(column).and_then(FieldValue::as_i64) == Some(id);
                        if ids.contains(child_id) {
                            child.insert(column.clone(), FieldValue::Int(id));
                        } else if linked {
                            child.insert(column.clone(), FieldValue::Null);
                        }
                    }
                }
                RelationshipLink::ManyToMany { table, .. } => {
                    let assoc = table_key(&entity.schema_name, table);
                    let pairs = self.work.links.entry(assoc).or_default();
                    pairs.retain(|(local, _)| *local != id);
                    pairs.extend(ids.iter().map(|remote| (id, *remote)));
                }
            }
        }
        Ok(())
    }
}

fn check_not_null(entity: &EntityDef, row: &Row) -> Result<(), AppError> {
    for (key, col) in entity.columns() {
        if !col.nullable && row.get(&col.name).map_or(true, FieldValue::is_null) {
            return Err(AppError::Validation(format!("{} may not be null", key)));
        }
    }
    Ok(())
}

#[async_trait]
impl Session for MemorySession {
    async fn all(&mut self, plan: &LoadPlan) -> Result<Vec<Record>, AppError> {
        let Some(rows) = self.table(&entity_key(&plan.entity)) else {
            return Ok(Vec::new());
        };
        rows.iter().map(|(id, row)| self.load(plan, *id, row)).collect()
    }

    async fn count(&mut self, entity: &EntityDef) -> Result<u64, AppError> {
        Ok(self.table(&entity_key(entity)).map(|t| t.len() as u64).unwrap_or(0))
    }

    async fn find(&mut self, plan: &LoadPlan, id: i64) -> Result<Option<Record>, AppError> {
        match self.table(&entity_key(&plan.entity)).and_then(|t| t.get(&id)) {
            Some(row) => Ok(Some(self.load(plan, id, row)?)),
            None => Ok(None),
        }
    }

    async fn find_in(&mut self, plan: &LoadPlan, ids: &[i64]) -> Result<Vec<Record>, AppError> {
        let Some(rows) = self.table(&entity_key(&plan.entity)) else {
            return Ok(Vec::new());
        };
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        wanted
            .iter()
            .filter_map(|id| rows.get(id).map(|row| (*id, row)))
            .map(|(id, row)| self.load(plan, id, row))
            .collect()
    }

    async fn insert(&mut self, entity: &EntityDef, record: &mut Record) -> Result<i64, AppError> {
        let (pk_key, _) = primary_key(entity)?;
        let key = entity_key(entity);
        let rows = self.work.rows.entry(key.clone()).or_default();
        let id = match record.identity(pk_key) {
            Some(id) => id,
            None => match rows.keys().next_back() {
                Some(last) => last.checked_add(1).ok_or_else(|| {
                    AppError::Conflict(format!("{} identities are exhausted", entity.name))
                })?,
                None => 1,
            },
        };
        if rows.contains_key(&id) {
            return Err(AppError::Conflict(format!(
                "{} with {} {} already exists",
                entity.name, pk_key, id
            )));
        }
        record.set(pk_key, FieldValue::Int(id));
        let mut row = self.build_row(entity, record, id);
        self.write_relations(entity, record, id, &mut row)?;
        check_not_null(entity, &row)?;
        self.work.rows.entry(key).or_default().insert(id, row);
        Ok(id)
    }

    async fn update(&mut self, entity: &EntityDef, record: &Record) -> Result<(), AppError> {
        let (pk_key, _) = primary_key(entity)?;
        let key = entity_key(entity);
        let id = record
            .identity(pk_key)
            .ok_or_else(|| AppError::Validation(format!("{} is required for update", pk_key)))?;
        if !self.table(&key).is_some_and(|t| t.contains_key(&id)) {
            return Err(AppError::NotFound(format!("No {} found with id: {}.", entity.name, id)));
        }
        let mut row = self.build_row(entity, record, id);
        // keep FK columns of to-one relationships that were not reassigned
        if let Some(old) = self.table(&key).and_then(|t| t.get(&id)) {
            for (column, value) in old {
                row.entry(column.clone()).or_insert_with(|| value.clone());
            }
        }
        self.write_relations(entity, record, id, &mut row)?;
        check_not_null(entity, &row)?;
        self.work.rows.entry(key).or_default().insert(id, row);
        Ok(())
    }

    async fn delete(&mut self, entity: &EntityDef, id: i64) -> Result<(), AppError> {
        let key = entity_key(entity);
        let removed = self.work.rows.get_mut(&key).and_then(|t| t.remove(&id));
        if removed.is_none() {
            return Err(AppError::NotFound(format!("No {} found with id: {}.", entity.name, id)));
        }
        for rel in entity.relationships() {
            match &rel.link {
                RelationshipLink::ManyToOne { .. } => {}
                RelationshipLink::OneToMany { column } => {
                    let target = table_key(&rel.target_schema, &rel.target_table);
                    if let Some(rows) = self.work.rows.get_mut(&target) {
                        for child in rows.values_mut() {
                            if child.get(column).and_then(FieldValue::as_i64) == Some(id) {
                                child.insert(column.clone(), FieldValue::Null);
                            }
                        }
                    }
                }
                RelationshipLink::ManyToMany { table, .. } => {
                    if let Some(pairs) = self.work.links.get_mut(&table_key(&entity.schema_name, table)) {
                        pairs.retain(|(local, _)| *local != id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn flush(self: Box<Self>) -> Result<(), AppError> {
        let MemorySession { mut guard, work } = *self;
        let tables = work.rows.len();
        *guard = work;
        tracing::debug!(tables, "memory session committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig, ResolvedModel};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let config: FullConfig = serde_json::from_value(json!({"entities": [
            {"name": "Person", "table": "persons", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "name", "columns": [{"name": "name", "type": "text", "nullable": false}]},
                {"kind": "relationship", "key": "tags", "target": "Tag",
                 "link": {"type": "many_to_many", "table": "person_tags", "local_column": "person_id", "remote_column": "tag_id"}}
            ]},
            {"name": "Tag", "table": "tags", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "label", "columns": [{"name": "label", "type": "text"}]}
            ]}
        ]}))
        .unwrap();
        resolve(&config).unwrap()
    }

    fn named(key: &str, value: &str) -> Record {
        let mut r = Record::new();
        r.set(key, FieldValue::Text(value.into()));
        r
    }

    #[tokio::test]
    async fn unflushed_writes_are_discarded() {
        let model = model();
        let person = model.entity("Person").unwrap();
        let store = MemoryStore::new();

        let mut s = store.session().await.unwrap();
        s.insert(person, &mut named("name", "Ada")).await.unwrap();
        drop(s);

        let mut s = store.session().await.unwrap();
        assert_eq!(s.count(person).await.unwrap(), 0);
        let id = s.insert(person, &mut named("name", "Ada")).await.unwrap();
        s.flush().await.unwrap();

        let mut s = store.session().await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(s.count(person).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn identities_are_generated_and_preset_ones_kept() {
        let model = model();
        let person = model.entity("Person").unwrap();
        let store = MemoryStore::new();
        let mut s = store.session().await.unwrap();

        let mut preset = named("name", "Grace");
        preset.set("id", FieldValue::Int(10));
        assert_eq!(s.insert(person, &mut preset).await.unwrap(), 10);
        let mut next = named("name", "Ada");
        assert_eq!(s.insert(person, &mut next).await.unwrap(), 11);
        assert_eq!(next.identity("id"), Some(11));

        let err = s.insert(person, &mut preset).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn identity_allocation_stops_at_the_largest_key() {
        let model = model();
        let tag = model.entity("Tag").unwrap();
        let mut s = MemoryStore::new().session().await.unwrap();
        let mut last = named("label", "last");
        last.set("id", FieldValue::Int(i64::MAX));
        s.insert(tag, &mut last).await.unwrap();
        let err = s.insert(tag, &mut named("label", "next")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn overlapping_sessions_keep_both_commits() {
        let model = model();
        let tag = model.entity("Tag").unwrap().clone();
        let store = MemoryStore::new();

        let mut first = store.session().await.unwrap();
        let second = {
            let store = store.clone();
            let tag = tag.clone();
            tokio::spawn(async move {
                let mut s = store.session().await.unwrap();
                let id = s.insert(&tag, &mut named("label", "b")).await.unwrap();
                s.flush().await.unwrap();
                id
            })
        };
        tokio::task::yield_now().await;
        let first_id = first.insert(&tag, &mut named("label", "a")).await.unwrap();
        first.flush().await.unwrap();
        let second_id = second.await.unwrap();

        assert_eq!((first_id, second_id), (1, 2));
        let mut s = store.session().await.unwrap();
        assert_eq!(s.count(&tag).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn not_null_columns_are_enforced() {
        let model = model();
        let person = model.entity("Person").unwrap();
        let mut s = MemoryStore::new().session().await.unwrap();
        let err = s.insert(person, &mut Record::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn many_to_many_links_round_trip_and_are_cleared_on_delete() {
        let model = model();
        let person = model.entity("Person").unwrap().clone();
        let tag = model.entity("Tag").unwrap().clone();
        let mut s = MemoryStore::new().begin().await;

        let tag_plan = LoadPlan::new(tag.clone());
        for label in ["a", "b", "c"] {
            s.insert(&tag, &mut named("label", label)).await.unwrap();
        }
        let tags = s.find_in(&tag_plan, &[3, 1, 99, 1]).await.unwrap();
        assert_eq!(tags.iter().map(|t| t.identity("id").unwrap()).collect::<Vec<_>>(), vec![1, 3]);

        let mut ada = named("name", "Ada");
        ada.set_relation("tags", Related::Many(tags));
        let id = s.insert(&person, &mut ada).await.unwrap();

        let plan = LoadPlan {
            entity: person.clone(),
            children: vec![("tags".into(), tag_plan)],
        };
        let loaded = s.find(&plan, id).await.unwrap().unwrap();
        match loaded.relation("tags") {
            Some(Related::Many(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        s.delete(&person, id).await.unwrap();
        assert!(s.find(&plan, id).await.unwrap().is_none());
        assert!(s.work.links.values().all(|pairs| pairs.is_empty()));
    }
}
