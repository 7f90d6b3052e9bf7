//! Build every declared resource, nested ones first, and mount the routed ones.

use crate::config::{ResolvedModel, ResourceConfig};
use crate::error::ConfigError;
use crate::resource::{Child, EntityResource, EntityResourceBuilder, UnresolvedIds};
use crate::routes::rest_routes;
use crate::session::SessionProvider;
use axum::Router;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<EntityResource>>,
    configs: Vec<ResourceConfig>,
}

impl ResourceRegistry {
    pub fn build(
        model: &ResolvedModel,
        configs: &[ResourceConfig],
        sessions: Arc<dyn SessionProvider>,
        unresolved_ids: UnresolvedIds,
    ) -> Result<Self, ConfigError> {
        Self::build_with(model, configs, sessions, |_, b| b.unresolved_ids(unresolved_ids))
    }

    /// Like `build`, with `customize` applied to each resource's builder (by resource name).
    pub fn build_with<F>(
        model: &ResolvedModel,
        configs: &[ResourceConfig],
        sessions: Arc<dyn SessionProvider>,
        customize: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str, EntityResourceBuilder) -> EntityResourceBuilder,
    {
        let declared: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        for c in configs {
            for child in c.children.iter().flat_map(|m| m.values()) {
                if let Some(name) = &child.resource {
                    if !declared.contains(name.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "resource",
                            id: name.clone(),
                        });
                    }
                }
            }
        }

        let mut resources: BTreeMap<String, Arc<EntityResource>> = BTreeMap::new();
        let mut pending: Vec<&ResourceConfig> = configs.iter().collect();
        while !pending.is_empty() {
            let ready = pending.iter().position(|c| {
                c.children
                    .iter()
                    .flat_map(|m| m.values())
                    .filter_map(|child| child.resource.as_deref())
                    .all(|name| resources.contains_key(name))
            });
            let Some(index) = ready else {
                // every remaining resource waits on another: a cycle
                let stuck = pending[0];
                let key = stuck
                    .children
                    .iter()
                    .flat_map(|m| m.iter())
                    .find(|(_, child)| {
                        child
                            .resource
                            .as_deref()
                            .is_some_and(|name| !resources.contains_key(name))
                    })
                    .map(|(key, _)| key.clone())
                    .unwrap_or_else(|| stuck.name.clone());
                return Err(ConfigError::MissingNestedResource(key));
            };
            let config = pending.remove(index);
            let resource = build_one(model, config, &resources, sessions.clone(), &customize)?;
            resources.insert(config.name.clone(), Arc::new(resource));
        }

        Ok(ResourceRegistry {
            resources,
            configs: configs.to_vec(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityResource>> {
        self.resources.get(name)
    }

    /// REST routes of every resource that declares a base url.
    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for c in &self.configs {
            let (Some(base_url), Some(resource)) = (&c.base_url, self.resources.get(&c.name)) else {
                continue;
            };
            router = router.merge(rest_routes(&c.name, base_url, c.create, resource.clone()));
        }
        router
    }
}

fn build_one<F>(
    model: &ResolvedModel,
    config: &ResourceConfig,
    built: &BTreeMap<String, Arc<EntityResource>>,
    sessions: Arc<dyn SessionProvider>,
    customize: &F,
) -> Result<EntityResource, ConfigError>
where
    F: Fn(&str, EntityResourceBuilder) -> EntityResourceBuilder,
{
    let entity = model.entity(&config.entity).ok_or_else(|| ConfigError::MissingReference {
        kind: "entity",
        id: config.entity.clone(),
    })?;
    let mut builder = EntityResource::builder(sessions, entity.clone());
    if let Some(children) = &config.children {
        let resolved = children
            .iter()
            .map(|(key, child)| {
                let c = Child {
                    resource: child.resource.as_deref().and_then(|name| built.get(name).cloned()),
                    alias: child.alias.clone(),
                };
                (key.clone(), c)
            })
            .collect();
        builder = builder.children(resolved);
    }
    if let Some(attrs) = &config.attr_list {
        builder = builder.attr_list(attrs.iter().cloned());
    }
    customize(&config.name, builder).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::session::MemoryStore;
    use serde_json::json;

    fn config(resources: serde_json::Value) -> FullConfig {
        serde_json::from_value(json!({
            "entities": [
                {"name": "Person", "table": "persons", "properties": [
                    {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                    {"kind": "relationship", "key": "tags", "target": "Tag",
                     "link": {"type": "many_to_many", "table": "person_tags", "local_column": "person_id", "remote_column": "tag_id"}}
                ]},
                {"name": "Tag", "table": "tags", "properties": [
                    {"kind": "column", "key": "id", "columns": [{"name": "id", "type": "integer", "primary_key": true}]},
                    {"kind": "relationship", "key": "people", "target": "Person",
                     "link": {"type": "many_to_many", "table": "person_tags", "local_column": "tag_id", "remote_column": "person_id"}}
                ]}
            ],
            "resources": resources
        }))
        .unwrap()
    }

    fn build(c: &FullConfig) -> Result<ResourceRegistry, ConfigError> {
        let model = resolve(c).unwrap();
        ResourceRegistry::build(&model, &c.resources, Arc::new(MemoryStore::new()), UnresolvedIds::Ignore)
    }

    #[test]
    fn children_are_built_before_parents() {
        let c = config(json!([
            {"name": "persons", "entity": "Person", "base_url": "/persons",
             "children": {"tags": {"resource": "tags", "alias": "tag_ids"}}},
            {"name": "tags", "entity": "Tag"}
        ]));
        let registry = build(&c).unwrap();
        let persons = registry.get("persons").unwrap();
        assert_eq!(persons.relationship_fields()[0].wire_name(), "tag_ids");
    }

    #[test]
    fn cycles_and_unknown_children_fail() {
        let cyclic = config(json!([
            {"name": "persons", "entity": "Person", "children": {"tags": {"resource": "tags"}}},
            {"name": "tags", "entity": "Tag", "children": {"people": {"resource": "persons"}}}
        ]));
        assert!(matches!(build(&cyclic), Err(ConfigError::MissingNestedResource(_))));

        let unknown = config(json!([
            {"name": "persons", "entity": "Person", "children": {"tags": {"resource": "labels"}}}
        ]));
        assert!(matches!(
            build(&unknown),
            Err(ConfigError::MissingReference { kind: "resource", .. })
        ));
    }
}
