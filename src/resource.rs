//! Entity resource: exposes one mapped entity over REST through an injected session provider.
//!
//! The field layout (identity, scalar fields, nested relationship resources) is classified once
//! at construction from the entity declaration and never changes afterwards.

use crate::config::{ColumnType, EntityDef, PropertyDef, RelationshipDef};
use crate::error::{AppError, ConfigError};
use crate::geometry::{GeoJsonDecoder, GeometryDecoder};
use crate::record::{Record, Related};
use crate::response::Objects;
use crate::security::{require, AclEvaluator, Permission, PermissionEvaluator, SecurityContext};
use crate::session::{LoadPlan, Session, SessionProvider};
use crate::value::FieldValue;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

/// What to do with relationship ids in a write body that match no row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnresolvedIds {
    /// Drop them and log a warning.
    #[default]
    Ignore,
    /// Fail the request with 400.
    Reject,
}

impl FromStr for UnresolvedIds {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(UnresolvedIds::Ignore),
            "reject" => Ok(UnresolvedIds::Reject),
            other => Err(ConfigError::Validation(format!(
                "UNRESOLVED_IDS must be ignore or reject, got {}",
                other
            ))),
        }
    }
}

/// Extra computed fields merged into every serialized instance, after the reflected ones.
pub trait AdditionalFields: Send + Sync {
    fn additional_fields(&self, record: &Record, attr_list: Option<&BTreeSet<String>>) -> Map<String, Value>;
}

impl<F> AdditionalFields for F
where
    F: Fn(&Record, Option<&BTreeSet<String>>) -> Map<String, Value> + Send + Sync,
{
    fn additional_fields(&self, record: &Record, attr_list: Option<&BTreeSet<String>>) -> Map<String, Value> {
        self(record, attr_list)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    pub key: String,
    pub column_type: ColumnType,
}

#[derive(Clone)]
pub struct RelationshipField {
    pub key: String,
    pub alias: Option<String>,
    pub to_one: bool,
    pub resource: Arc<EntityResource>,
}

impl RelationshipField {
    /// Name used in the wire representation and in write bodies.
    pub fn wire_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.key)
    }
}

/// Nested resource configuration for one relationship.
#[derive(Clone, Default)]
pub struct Child {
    pub resource: Option<Arc<EntityResource>>,
    pub alias: Option<String>,
}

impl Child {
    pub fn new(resource: Arc<EntityResource>) -> Self {
        Child {
            resource: Some(resource),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Result of an upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Created(i64),
    Updated(i64),
}

pub struct EntityResourceBuilder {
    sessions: Arc<dyn SessionProvider>,
    entity: Arc<EntityDef>,
    children: Option<BTreeMap<String, Child>>,
    attr_list: Option<BTreeSet<String>>,
    permissions: Arc<dyn PermissionEvaluator>,
    geometry: Arc<dyn GeometryDecoder>,
    additional: Option<Arc<dyn AdditionalFields>>,
    unresolved_ids: UnresolvedIds,
}

impl EntityResourceBuilder {
    pub fn children(mut self, children: BTreeMap<String, Child>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn attr_list<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attr_list = Some(attrs.into_iter().map(Into::into).collect());
        self
    }

    pub fn permissions(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = evaluator;
        self
    }

    pub fn geometry(mut self, decoder: Arc<dyn GeometryDecoder>) -> Self {
        self.geometry = decoder;
        self
    }

    pub fn additional_fields(mut self, hook: Arc<dyn AdditionalFields>) -> Self {
        self.additional = Some(hook);
        self
    }

    pub fn unresolved_ids(mut self, policy: UnresolvedIds) -> Self {
        self.unresolved_ids = policy;
        self
    }

    /// Classify the entity's properties. Fails on composite-column properties, a missing or
    /// duplicated primary key, and children entries without a usable nested resource.
    pub fn build(self) -> Result<EntityResource, ConfigError> {
        let entity = self.entity;
        let mut identity: Option<ScalarField> = None;
        let mut scalars = Vec::new();
        let mut relationships = Vec::new();

        for p in &entity.properties {
            match p {
                PropertyDef::Column { key, columns } => {
                    let [column] = columns.as_slice() else {
                        return Err(ConfigError::Unsupported {
                            entity: entity.name.clone(),
                            property: key.clone(),
                        });
                    };
                    let field = ScalarField {
                        key: key.clone(),
                        column_type: column.column_type,
                    };
                    if column.primary_key {
                        if let Some(first) = &identity {
                            return Err(ConfigError::DuplicateIdentity {
                                entity: entity.name.clone(),
                                first: first.key.clone(),
                                second: key.clone(),
                            });
                        }
                        identity = Some(field);
                    } else if column.foreign_key.is_none()
                        && self.attr_list.as_ref().map_or(true, |a| a.contains(key))
                    {
                        scalars.push(field);
                    }
                }
                PropertyDef::Relationship(rel) => {
                    let Some(children) = &self.children else {
                        continue;
                    };
                    let Some(child) = children.get(&rel.key) else {
                        continue;
                    };
                    relationships.push(relationship_field(&entity, rel, child)?);
                }
            }
        }

        if let Some(children) = &self.children {
            for key in children.keys() {
                if entity.relationship(key).is_none() {
                    tracing::warn!(entity = %entity.name, child = %key, "children entry names no relationship, ignored");
                }
            }
        }

        let identity = identity.ok_or_else(|| ConfigError::MissingIdentity(entity.name.clone()))?;
        let plan = LoadPlan {
            entity: entity.clone(),
            children: relationships
                .iter()
                .map(|r| (r.key.clone(), r.resource.plan.clone()))
                .collect(),
        };

        Ok(EntityResource {
            sessions: self.sessions,
            entity,
            identity,
            scalars,
            relationships,
            attr_list: self.attr_list,
            permissions: self.permissions,
            geometry: self.geometry,
            additional: self.additional,
            unresolved_ids: self.unresolved_ids,
            plan,
        })
    }
}

fn relationship_field(entity: &EntityDef, rel: &RelationshipDef, child: &Child) -> Result<RelationshipField, ConfigError> {
    let resource = child
        .resource
        .clone()
        .ok_or_else(|| ConfigError::MissingNestedResource(rel.key.clone()))?;
    if resource.entity.name != rel.target {
        return Err(ConfigError::Validation(format!(
            "relationship {}.{} targets {} but its nested resource exposes {}",
            entity.name, rel.key, rel.target, resource.entity.name
        )));
    }
    Ok(RelationshipField {
        key: rel.key.clone(),
        alias: child.alias.clone(),
        to_one: rel.link.is_to_one(),
        resource,
    })
}

/// REST adapter for one entity.
pub struct EntityResource {
    sessions: Arc<dyn SessionProvider>,
    entity: Arc<EntityDef>,
    identity: ScalarField,
    scalars: Vec<ScalarField>,
    relationships: Vec<RelationshipField>,
    attr_list: Option<BTreeSet<String>>,
    permissions: Arc<dyn PermissionEvaluator>,
    geometry: Arc<dyn GeometryDecoder>,
    additional: Option<Arc<dyn AdditionalFields>>,
    unresolved_ids: UnresolvedIds,
    plan: LoadPlan,
}

impl EntityResource {
    pub fn builder(sessions: Arc<dyn SessionProvider>, entity: Arc<EntityDef>) -> EntityResourceBuilder {
        EntityResourceBuilder {
            sessions,
            entity,
            children: None,
            attr_list: None,
            permissions: Arc::new(AclEvaluator),
            geometry: Arc::new(GeoJsonDecoder),
            additional: None,
            unresolved_ids: UnresolvedIds::default(),
        }
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    pub fn identity_field(&self) -> &str {
        &self.identity.key
    }

    pub fn scalar_fields(&self) -> &[ScalarField] {
        &self.scalars
    }

    pub fn relationship_fields(&self) -> &[RelationshipField] {
        &self.relationships
    }

    fn check(&self, permission: Permission, ctx: &SecurityContext) -> Result<(), AppError> {
        require(self.permissions.as_ref(), permission, &self.entity, ctx)
    }

    fn not_found(&self, id: i64) -> AppError {
        AppError::NotFound(format!("No {} found with id: {}.", self.entity.name, id))
    }

    /// Wire representation of a loaded instance.
    pub fn serialize(&self, record: &Record) -> Result<Map<String, Value>, AppError> {
        let mut out = Map::new();
        for field in &self.scalars {
            out.insert(field.key.clone(), record.get(&field.key).to_wire(self.geometry.as_ref())?);
        }
        if self.attr_list.as_ref().map_or(true, |a| a.contains(&self.identity.key)) {
            out.insert(
                self.identity.key.clone(),
                record.get(&self.identity.key).to_wire(self.geometry.as_ref())?,
            );
        }
        for rel in &self.relationships {
            let data = match record.relation(&rel.key) {
                None => continue,
                Some(Related::One(None)) => Value::Null,
                Some(Related::One(Some(r))) => Value::Object(rel.resource.serialize(r)?),
                Some(Related::Many(items)) => Value::Array(
                    items
                        .iter()
                        .map(|r| rel.resource.serialize(r).map(Value::Object))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            out.insert(rel.wire_name().to_string(), data);
        }
        if let Some(hook) = &self.additional {
            out.extend(hook.additional_fields(record, self.attr_list.as_ref()));
        }
        Ok(out)
    }

    pub async fn read_many(&self, ctx: &SecurityContext) -> Result<Objects, AppError> {
        self.check(Permission::View, ctx)?;
        let mut session = self.sessions.session().await?;
        let records = session.all(&self.plan).await?;
        let objects = records
            .iter()
            .map(|r| self.serialize(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Objects { objects })
    }

    pub async fn count(&self, ctx: &SecurityContext) -> Result<u64, AppError> {
        self.check(Permission::View, ctx)?;
        let mut session = self.sessions.session().await?;
        session.count(&self.entity).await
    }

    pub async fn read_one(&self, ctx: &SecurityContext, id: i64) -> Result<Map<String, Value>, AppError> {
        self.check(Permission::View, ctx)?;
        let mut session = self.sessions.session().await?;
        let record = session
            .find(&self.plan, id)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.serialize(&record)
    }

    /// Assign body values to `record`: the identity when `include_identity`, every scalar field
    /// present, and every relationship present under its wire name (resolved by identity).
    pub async fn fill_from_body(
        &self,
        session: &mut dyn Session,
        record: &mut Record,
        body: &Map<String, Value>,
        include_identity: bool,
    ) -> Result<(), AppError> {
        if include_identity {
            if let Some(v) = body.get(&self.identity.key) {
                let id = parse_identity(&self.identity, v)?;
                record.set(self.identity.key.clone(), FieldValue::Int(id));
            }
        }
        for field in &self.scalars {
            if let Some(v) = body.get(&field.key) {
                let value = FieldValue::from_json(field.column_type, &field.key, v)?;
                if let FieldValue::Geometry(g) = &value {
                    self.geometry
                        .decode(g)
                        .map_err(|e| AppError::Validation(format!("{} is not a valid geometry: {}", field.key, e)))?;
                }
                record.set(field.key.clone(), value);
            }
        }
        for rel in &self.relationships {
            let Some(v) = body.get(rel.wire_name()) else {
                continue;
            };
            let ids = relationship_ids(rel, v)?;
            let found = if ids.is_empty() {
                Vec::new()
            } else {
                let plan = LoadPlan::new(rel.resource.entity.clone());
                session.find_in(&plan, &ids).await?
            };
            let target_key = rel.resource.identity_field();
            let resolved: BTreeSet<i64> = found.iter().filter_map(|r| r.identity(target_key)).collect();
            let missing: Vec<i64> = ids.iter().copied().filter(|id| !resolved.contains(id)).collect();
            if !missing.is_empty() {
                match self.unresolved_ids {
                    UnresolvedIds::Ignore => tracing::warn!(
                        entity = %self.entity.name,
                        relationship = %rel.key,
                        ?missing,
                        "dropping unknown relationship ids"
                    ),
                    UnresolvedIds::Reject => {
                        return Err(AppError::BadRequest(format!(
                            "unknown {} ids for {}: {:?}",
                            rel.resource.entity.name,
                            rel.wire_name(),
                            missing
                        )))
                    }
                }
            }
            let related = if rel.to_one {
                Related::One(found.into_iter().next().map(Box::new))
            } else {
                Related::Many(found)
            };
            record.set_relation(rel.key.clone(), related);
        }
        Ok(())
    }

    pub async fn create(&self, ctx: &SecurityContext, body: &[u8]) -> Result<i64, AppError> {
        self.check(Permission::New, ctx)?;
        let body = parse_body(body)?;
        let mut session = self.sessions.session().await?;
        let mut record = Record::new();
        self.fill_from_body(session.as_mut(), &mut record, &body, false).await?;
        let id = session.insert(&self.entity, &mut record).await?;
        session.flush().await?;
        tracing::debug!(entity = %self.entity.name, id, "created");
        Ok(id)
    }

    pub async fn update(&self, ctx: &SecurityContext, id: i64, body: &[u8]) -> Result<(), AppError> {
        self.check(Permission::Edit, ctx)?;
        let body = parse_body(body)?;
        let mut session = self.sessions.session().await?;
        let plan = LoadPlan::new(self.entity.clone());
        let mut record = session.find(&plan, id).await?.ok_or_else(|| self.not_found(id))?;
        self.fill_from_body(session.as_mut(), &mut record, &body, false).await?;
        session.update(&self.entity, &record).await?;
        session.flush().await
    }

    /// Create or update keyed by the identity in the body.
    pub async fn upsert(&self, ctx: &SecurityContext, body: &[u8]) -> Result<Upserted, AppError> {
        self.check(Permission::Edit, ctx)?;
        let body = parse_body(body)?;
        let key = &self.identity.key;
        let raw = body
            .get(key)
            .ok_or_else(|| AppError::BadRequest(format!("Mandatory attribute {} is missing", key)))?;
        let id = parse_identity(&self.identity, raw)?;

        let mut session = self.sessions.session().await?;
        let plan = LoadPlan::new(self.entity.clone());
        let outcome = match session.find(&plan, id).await? {
            None => {
                let mut record = Record::new();
                self.fill_from_body(session.as_mut(), &mut record, &body, true).await?;
                session.insert(&self.entity, &mut record).await?;
                Upserted::Created(id)
            }
            Some(mut record) => {
                self.fill_from_body(session.as_mut(), &mut record, &body, false).await?;
                session.update(&self.entity, &record).await?;
                Upserted::Updated(id)
            }
        };
        session.flush().await?;
        Ok(outcome)
    }

    pub async fn delete(&self, ctx: &SecurityContext, id: i64) -> Result<(), AppError> {
        self.check(Permission::Delete, ctx)?;
        let mut session = self.sessions.session().await?;
        let plan = LoadPlan::new(self.entity.clone());
        if session.find(&plan, id).await?.is_none() {
            return Err(self.not_found(id));
        }
        session.delete(&self.entity, id).await?;
        session.flush().await
    }
}

/// Write bodies must be JSON objects.
pub fn parse_body(body: &[u8]) -> Result<Map<String, Value>, AppError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// An identity is an integer or a string of digits, within range of the identity column.
fn parse_identity(identity: &ScalarField, v: &Value) -> Result<i64, AppError> {
    parse_id(&identity.key, identity.column_type, v)
}

fn parse_id(key: &str, column_type: ColumnType, v: &Value) -> Result<i64, AppError> {
    let parsed = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let id = parsed.ok_or_else(|| AppError::BadRequest(format!("Attribute {} must be an integer", key)))?;
    if column_type == ColumnType::Integer && i32::try_from(id).is_err() {
        return Err(AppError::BadRequest(format!("Attribute {} is out of range", key)));
    }
    Ok(id)
}

/// Normalize a relationship value to ids: null clears, a scalar is a one-element list.
fn relationship_ids(rel: &RelationshipField, v: &Value) -> Result<Vec<i64>, AppError> {
    let ids = match v {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(|i| parse_id(rel.wire_name(), rel.resource.identity.column_type, i))
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![parse_id(rel.wire_name(), rel.resource.identity.column_type, other)?],
    };
    if rel.to_one && ids.len() > 1 {
        return Err(AppError::BadRequest(format!(
            "{} takes at most one id, got {}",
            rel.wire_name(),
            ids.len()
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig, ResolvedModel};
    use crate::geometry::Geometry;
    use crate::session::MemoryStore;
    use serde_json::json;

    fn model() -> ResolvedModel {
        let config: FullConfig = serde_json::from_value(json!({"entities": [
            {"name": "Person", "table": "persons", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "name", "columns": [{"name": "name", "type": "text"}]},
                {"kind": "column", "key": "born", "columns": [{"name": "born", "type": "date"}]},
                {"kind": "column", "key": "home_id", "columns": [{"name": "home_id", "type": "integer", "foreign_key": "places.id"}]},
                {"kind": "relationship", "key": "home", "target": "Place", "link": {"type": "many_to_one", "column": "home_id"}},
                {"kind": "relationship", "key": "tags", "target": "Tag",
                 "link": {"type": "many_to_many", "table": "person_tags", "local_column": "person_id", "remote_column": "tag_id"}}
            ]},
            {"name": "Place", "table": "places", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "geom", "columns": [{"name": "geom", "type": "geometry"}]}
            ]},
            {"name": "Tag", "table": "tags", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "label", "columns": [{"name": "label", "type": "text"}]}
            ]},
            {"name": "Pair", "table": "pairs", "properties": [
                {"kind": "column", "key": "a", "columns": [{"name": "a", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "b", "columns": [{"name": "b", "type": "integer", "primary_key": true}]}
            ]},
            {"name": "Span", "table": "spans", "properties": [
                {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                {"kind": "column", "key": "range", "columns": [{"name": "lo", "type": "integer"}, {"name": "hi", "type": "integer"}]}
            ]}
        ]}))
        .unwrap();
        resolve(&config).unwrap()
    }

    fn sessions() -> Arc<dyn SessionProvider> {
        Arc::new(MemoryStore::new())
    }

    fn tag_resource(m: &ResolvedModel) -> Arc<EntityResource> {
        Arc::new(EntityResource::builder(sessions(), m.entity("Tag").unwrap().clone()).build().unwrap())
    }

    #[test]
    fn classifies_identity_scalars_and_skips_foreign_keys() {
        let m = model();
        let r = EntityResource::builder(sessions(), m.entity("Person").unwrap().clone())
            .build()
            .unwrap();
        assert_eq!(r.identity_field(), "id");
        let keys: Vec<&str> = r.scalar_fields().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["name", "born"]);
        assert!(r.relationship_fields().is_empty());
    }

    #[test]
    fn attr_list_restricts_scalars_and_identity() {
        let m = model();
        let r = EntityResource::builder(sessions(), m.entity("Person").unwrap().clone())
            .attr_list(["name"])
            .build()
            .unwrap();
        let mut record = Record::new();
        record.set("id", FieldValue::Int(3));
        record.set("name", FieldValue::Text("Ada".into()));
        record.set("born", FieldValue::Null);
        assert_eq!(Value::Object(r.serialize(&record).unwrap()), json!({"name": "Ada"}));
    }

    #[test]
    fn construction_failures() {
        let m = model();
        assert!(matches!(
            EntityResource::builder(sessions(), m.entity("Pair").unwrap().clone()).build(),
            Err(ConfigError::DuplicateIdentity { .. })
        ));
        assert!(matches!(
            EntityResource::builder(sessions(), m.entity("Span").unwrap().clone()).build(),
            Err(ConfigError::Unsupported { .. })
        ));

        let mut children = BTreeMap::new();
        children.insert("tags".to_string(), Child::default());
        let err = EntityResource::builder(sessions(), m.entity("Person").unwrap().clone())
            .children(children)
            .build()
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Missing REST object for relationship tags");

        let mut children = BTreeMap::new();
        children.insert("home".to_string(), Child::new(tag_resource(&m)));
        assert!(matches!(
            EntityResource::builder(sessions(), m.entity("Person").unwrap().clone())
                .children(children)
                .build(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn serializes_relationships_under_alias_and_merges_additional_fields() {
        let m = model();
        let places = Arc::new(
            EntityResource::builder(sessions(), m.entity("Place").unwrap().clone())
                .build()
                .unwrap(),
        );
        let mut children = BTreeMap::new();
        children.insert("tags".to_string(), Child::new(tag_resource(&m)).alias("tag_list"));
        children.insert("home".to_string(), Child::new(places));
        let hook = |record: &Record, _: Option<&BTreeSet<String>>| {
            let mut extra = Map::new();
            extra.insert("display".into(), json!(format!("#{}", record.identity("id").unwrap_or(0))));
            extra.insert("name".into(), json!("overridden"));
            extra
        };
        let r = EntityResource::builder(sessions(), m.entity("Person").unwrap().clone())
            .children(children)
            .additional_fields(Arc::new(hook))
            .build()
            .unwrap();

        let mut tag = Record::new();
        tag.set("id", FieldValue::Int(7));
        tag.set("label", FieldValue::Text("math".into()));
        let mut home = Record::new();
        home.set("id", FieldValue::Int(2));
        home.set("geom", FieldValue::Geometry(Geometry::Wkt("POINT(1 2)".into())));
        let mut person = Record::new();
        person.set("id", FieldValue::Int(1));
        person.set("name", FieldValue::Text("Ada".into()));
        person.set("born", FieldValue::Date(chrono::NaiveDate::from_ymd_opt(1815, 12, 10).unwrap()));
        person.set_relation("tags", Related::Many(vec![tag]));
        person.set_relation("home", Related::One(Some(Box::new(home))));

        let first = r.serialize(&person).unwrap();
        assert_eq!(
            Value::Object(first.clone()),
            json!({
                "id": 1,
                "name": "overridden",
                "born": "1815-12-10",
                "display": "#1",
                "tag_list": [{"id": 7, "label": "math"}],
                "home": {"id": 2, "geom": {"type": "Point", "coordinates": [1.0, 2.0]}}
            })
        );
        assert_eq!(r.serialize(&person).unwrap(), first);
    }

    #[tokio::test]
    async fn permission_is_checked_before_any_session_access() {
        struct Deny;
        impl PermissionEvaluator for Deny {
            fn has_permission(&self, _: Permission, _: &EntityDef, _: &SecurityContext) -> bool {
                false
            }
        }
        let mut entity = (**model().entity("Tag").unwrap()).clone();
        entity.acl = Some(Vec::new());
        let r = EntityResource::builder(sessions(), Arc::new(entity))
            .permissions(Arc::new(Deny))
            .build()
            .unwrap();
        let ctx = SecurityContext::anonymous();
        assert!(matches!(r.read_many(&ctx).await, Err(AppError::Forbidden)));
        assert!(matches!(r.create(&ctx, b"not json").await, Err(AppError::Forbidden)));
        assert!(matches!(r.delete(&ctx, 1).await, Err(AppError::Forbidden)));
    }

    #[tokio::test]
    async fn relationship_fill_resolves_ids_and_applies_policy() {
        let m = model();
        let store: Arc<dyn SessionProvider> = Arc::new(MemoryStore::new());
        let tags = Arc::new(
            EntityResource::builder(store.clone(), m.entity("Tag").unwrap().clone())
                .build()
                .unwrap(),
        );
        let ctx = SecurityContext::anonymous();
        tags.create(&ctx, br#"{"label": "a"}"#).await.unwrap();
        tags.create(&ctx, br#"{"label": "b"}"#).await.unwrap();

        let mut children = BTreeMap::new();
        children.insert("tags".to_string(), Child::new(tags.clone()));
        let build = |policy| {
            EntityResource::builder(store.clone(), m.entity("Person").unwrap().clone())
                .children(children.clone())
                .unresolved_ids(policy)
                .build()
                .unwrap()
        };

        let lenient = build(UnresolvedIds::Ignore);
        let id = lenient.create(&ctx, br#"{"name": "Ada", "tags": [2, 9]}"#).await.unwrap();
        let person = lenient.read_one(&ctx, id).await.unwrap();
        assert_eq!(person["tags"], json!([{"id": 2, "label": "b"}]));

        let strict = build(UnresolvedIds::Reject);
        let err = strict.update(&ctx, id, br#"{"tags": [1, 9]}"#).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        strict.update(&ctx, id, br#"{"tags": []}"#).await.unwrap();
        assert_eq!(strict.read_one(&ctx, id).await.unwrap()["tags"], json!([]));

        let err = strict.update(&ctx, id, br#"{"tags": ["x"]}"#).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn upsert_requires_integer_identity() {
        let m = model();
        let r = tag_resource(&m);
        let ctx = SecurityContext::anonymous();
        let err = r.upsert(&ctx, br#"{"label": "x"}"#).await.unwrap_err();
        assert_eq!(err.to_string(), "bad request: Mandatory attribute id is missing");
        let err = r.upsert(&ctx, br#"{"id": "seven"}"#).await.unwrap_err();
        assert_eq!(err.to_string(), "bad request: Attribute id must be an integer");
        assert!(matches!(r.upsert(&ctx, b"[1]").await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn identities_outside_the_key_column_range_are_rejected() {
        let m = model();
        let r = tag_resource(&m);
        let ctx = SecurityContext::anonymous();
        let err = r.upsert(&ctx, br#"{"id": 1099511627776}"#).await.unwrap_err();
        assert_eq!(err.to_string(), "bad request: Attribute id is out of range");
        assert_eq!(r.upsert(&ctx, br#"{"id": 2147483647}"#).await.unwrap(), Upserted::Created(2147483647));
    }

    #[tokio::test]
    async fn invalid_geometry_is_rejected_on_write() {
        let m = model();
        let r = EntityResource::builder(sessions(), m.entity("Place").unwrap().clone())
            .build()
            .unwrap();
        let ctx = SecurityContext::anonymous();
        let err = r.create(&ctx, br#"{"geom": "hello world"}"#).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(r.count(&ctx).await.unwrap(), 0);

        let id = r.create(&ctx, br#"{"geom": "POINT (1 2)"}"#).await.unwrap();
        let place = r.read_one(&ctx, id).await.unwrap();
        assert_eq!(place["geom"]["type"], "Point");
    }

    #[test]
    fn unresolved_ids_parse() {
        assert_eq!("Reject".parse::<UnresolvedIds>().unwrap(), UnresolvedIds::Reject);
        assert_eq!(" ignore ".parse::<UnresolvedIds>().unwrap(), UnresolvedIds::Ignore);
        assert!("drop".parse::<UnresolvedIds>().is_err());
    }
}
