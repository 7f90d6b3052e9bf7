//! Persistence sessions: one per request, committed on flush.

mod memory;
mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgSessionProvider};

use crate::config::{ColumnDef, EntityDef, RelationshipDef};
use crate::error::{AppError, ConfigError};
use crate::record::{Record, Related};
use async_trait::async_trait;
use std::sync::Arc;

/// Which relationships to hydrate when loading an entity, recursively.
#[derive(Clone, Debug)]
pub struct LoadPlan {
    pub entity: Arc<EntityDef>,
    /// (relationship key, plan for the related entity)
    pub children: Vec<(String, LoadPlan)>,
}

impl LoadPlan {
    pub fn new(entity: Arc<EntityDef>) -> Self {
        LoadPlan {
            entity,
            children: Vec::new(),
        }
    }
}

/// Unit of work against the store. Dropping a session without `flush` discards its writes.
#[async_trait]
pub trait Session: Send {
    /// All instances, ordered by identity.
    async fn all(&mut self, plan: &LoadPlan) -> Result<Vec<Record>, AppError>;

    async fn count(&mut self, entity: &EntityDef) -> Result<u64, AppError>;

    async fn find(&mut self, plan: &LoadPlan, id: i64) -> Result<Option<Record>, AppError>;

    /// Instances whose identity is in `ids`, ordered by identity. Unknown ids are skipped.
    async fn find_in(&mut self, plan: &LoadPlan, ids: &[i64]) -> Result<Vec<Record>, AppError>;

    /// Persist a new instance and its assigned relationships. A preset identity is kept,
    /// otherwise one is generated and written back into `record`.
    async fn insert(&mut self, entity: &EntityDef, record: &mut Record) -> Result<i64, AppError>;

    async fn update(&mut self, entity: &EntityDef, record: &Record) -> Result<(), AppError>;

    async fn delete(&mut self, entity: &EntityDef, id: i64) -> Result<(), AppError>;

    /// Write everything pending and commit.
    async fn flush(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session(&self) -> Result<Box<dyn Session>, AppError>;
}

/// Primary key of an entity, required by every session operation.
pub(crate) fn primary_key(entity: &EntityDef) -> Result<(&str, &ColumnDef), AppError> {
    entity
        .primary_key()
        .ok_or_else(|| AppError::Config(ConfigError::MissingIdentity(entity.name.clone())))
}

/// Ids of assigned related records, read through the target's primary key property.
pub(crate) fn related_ids(rel: &RelationshipDef, related: &Related) -> Result<Vec<i64>, AppError> {
    let identity = |r: &Record| {
        r.identity(&rel.target_pk_key)
            .ok_or_else(|| AppError::Validation(format!("related {} has no identity", rel.key)))
    };
    match related {
        Related::One(None) => Ok(Vec::new()),
        Related::One(Some(r)) => Ok(vec![identity(r)?]),
        Related::Many(items) => items.iter().map(|r| identity(r)).collect(),
    }
}
