// Entity models and the trait/host capability catalog.
// Capability satisfaction is declared up front and validated once at build,
// never probed per save.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked entity at save time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
    Unchanged,
    Detached,
}

/// An atomic trait capability (e.g. "created_at") shared by unrelated entity types
#[derive(Debug, Clone)]
pub struct TraitDef {
    pub name: String,
    /// Trait inheritance is not allowed; anything listed here fails catalog build
    pub extends: Vec<String>,
}

impl TraitDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), extends: Vec::new() }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends.push(parent.into());
        self
    }
}

/// A host capability: composition of a sub-aggregate, parameterized by named
/// binding parameters (the declared analogue of generic type arguments)
#[derive(Debug, Clone)]
pub struct HostDef {
    pub name: String,
    pub params: Vec<String>,
    /// Host inheritance is not allowed either
    pub extends: Vec<String>,
}

impl HostDef {
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            extends: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends.push(parent.into());
        self
    }
}

/// A concrete entity type's resolved binding of a host capability
#[derive(Debug, Clone)]
pub struct HostBinding {
    pub host: String,
    params: BTreeMap<String, String>,
}

impl HostBinding {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), params: BTreeMap::new() }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Resolved value of a binding parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }
}

/// Description of one persisted entity type: table, key and declared capabilities
#[derive(Debug, Clone)]
pub struct EntityModel {
    entity_type: String,
    table: String,
    key_field: String,
    traits: BTreeSet<String>,
    hosts: BTreeMap<String, HostBinding>,
}

impl EntityModel {
    pub fn new(
        entity_type: impl Into<String>,
        table: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            key_field: key_field.into(),
            traits: BTreeSet::new(),
            hosts: BTreeMap::new(),
        }
    }

    pub fn with_trait(mut self, name: impl Into<String>) -> Self {
        self.traits.insert(name.into());
        self
    }

    pub fn with_host(mut self, binding: HostBinding) -> Self {
        self.hosts.insert(binding.host.clone(), binding);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Check whether this type declares the named trait capability
    pub fn satisfies_trait(&self, name: &str) -> bool {
        self.traits.contains(name)
    }

    /// Resolved binding for the named host capability, if declared
    pub fn host_binding(&self, name: &str) -> Option<&HostBinding> {
        self.hosts.get(name)
    }

    pub fn traits(&self) -> impl Iterator<Item = &str> {
        self.traits.iter().map(|s| s.as_str())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostBinding> {
        self.hosts.values()
    }
}

/// Configuration errors raised while building the catalog.
/// All of these are fatal at startup - never recovered, never retried.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Traits must be atomic: trait '{name}' extends {parents:?}")]
    NonAtomicTrait { name: String, parents: Vec<String> },

    #[error("Hosts must be atomic: host '{name}' extends {parents:?}")]
    NonAtomicHost { name: String, parents: Vec<String> },

    #[error("Entity type '{entity_type}' declares unknown trait '{name}'")]
    UnknownTrait { entity_type: String, name: String },

    #[error("Entity type '{entity_type}' declares unknown host '{name}'")]
    UnknownHost { entity_type: String, name: String },

    #[error("Entity type '{entity_type}' leaves host '{host}' parameter '{param}' unresolved")]
    UnresolvedHostParam { entity_type: String, host: String, param: String },

    #[error("Duplicate entity type '{0}'")]
    DuplicateEntityType(String),
}

/// Validated, immutable registry of entity types and their capabilities
#[derive(Debug)]
pub struct ModelCatalog {
    traits: HashMap<String, TraitDef>,
    hosts: HashMap<String, HostDef>,
    entities: Vec<Arc<EntityModel>>,
    by_type: HashMap<String, Arc<EntityModel>>,
}

impl ModelCatalog {
    pub fn builder() -> ModelCatalogBuilder {
        ModelCatalogBuilder::default()
    }

    /// Look up a model by entity type name
    pub fn model(&self, entity_type: &str) -> Option<&Arc<EntityModel>> {
        self.by_type.get(entity_type)
    }

    /// All models in declaration order
    pub fn models(&self) -> impl Iterator<Item = &Arc<EntityModel>> {
        self.entities.iter()
    }

    pub fn trait_def(&self, name: &str) -> Option<&TraitDef> {
        self.traits.get(name)
    }

    pub fn host_def(&self, name: &str) -> Option<&HostDef> {
        self.hosts.get(name)
    }
}

#[derive(Debug, Default)]
pub struct ModelCatalogBuilder {
    traits: Vec<TraitDef>,
    hosts: Vec<HostDef>,
    entities: Vec<EntityModel>,
}

impl ModelCatalogBuilder {
    pub fn define_trait(mut self, def: TraitDef) -> Self {
        self.traits.push(def);
        self
    }

    pub fn define_host(mut self, def: HostDef) -> Self {
        self.hosts.push(def);
        self
    }

    pub fn entity(mut self, model: EntityModel) -> Self {
        self.entities.push(model);
        self
    }

    /// Validate and freeze the catalog. Atomicity of traits/hosts and full
    /// resolution of host binding parameters are enforced here, before any
    /// listener ever runs.
    pub fn build(self) -> Result<ModelCatalog, CatalogError> {
        let mut traits = HashMap::new();
        for def in self.traits {
            if !def.extends.is_empty() {
                return Err(CatalogError::NonAtomicTrait {
                    name: def.name,
                    parents: def.extends,
                });
            }
            traits.insert(def.name.clone(), def);
        }

        let mut hosts = HashMap::new();
        for def in self.hosts {
            if !def.extends.is_empty() {
                return Err(CatalogError::NonAtomicHost {
                    name: def.name,
                    parents: def.extends,
                });
            }
            hosts.insert(def.name.clone(), def);
        }

        let mut entities: Vec<Arc<EntityModel>> = Vec::with_capacity(self.entities.len());
        let mut by_type: HashMap<String, Arc<EntityModel>> = HashMap::new();

        for model in self.entities {
            for name in model.traits.iter() {
                if !traits.contains_key(name) {
                    return Err(CatalogError::UnknownTrait {
                        entity_type: model.entity_type.clone(),
                        name: name.clone(),
                    });
                }
            }

            for binding in model.hosts.values() {
                let def = hosts.get(&binding.host).ok_or_else(|| CatalogError::UnknownHost {
                    entity_type: model.entity_type.clone(),
                    name: binding.host.clone(),
                })?;

                for param in &def.params {
                    if binding.get(param).is_none() {
                        return Err(CatalogError::UnresolvedHostParam {
                            entity_type: model.entity_type.clone(),
                            host: binding.host.clone(),
                            param: param.clone(),
                        });
                    }
                }
            }

            let model = Arc::new(model);
            if by_type.insert(model.entity_type.clone(), Arc::clone(&model)).is_some() {
                return Err(CatalogError::DuplicateEntityType(model.entity_type.clone()));
            }
            entities.push(model);
        }

        tracing::debug!(
            "Model catalog built: {} entity types, {} traits, {} hosts",
            entities.len(),
            traits.len(),
            hosts.len()
        );

        Ok(ModelCatalog { traits, hosts, entities, by_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_build_validates_capabilities() {
        let catalog = ModelCatalog::builder()
            .define_trait(TraitDef::new("created_at"))
            .define_host(HostDef::new("versions", &["version_type"]))
            .entity(
                EntityModel::new("post", "posts", "id")
                    .with_trait("created_at")
                    .with_host(HostBinding::new("versions").param("version_type", "post_version")),
            )
            .entity(EntityModel::new("post_version", "posts_Versions", "number"))
            .build()
            .unwrap();

        let post = catalog.model("post").unwrap();
        assert!(post.satisfies_trait("created_at"));
        assert!(!post.satisfies_trait("updated_at"));
        assert_eq!(post.host_binding("versions").unwrap().get("version_type"), Some("post_version"));
        assert!(catalog.model("comment").is_none());
    }

    #[test]
    fn non_atomic_trait_is_rejected() {
        let err = ModelCatalog::builder()
            .define_trait(TraitDef::new("stamped").extends("created_at"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::NonAtomicTrait { .. }));
    }

    #[test]
    fn non_atomic_host_is_rejected() {
        let err = ModelCatalog::builder()
            .define_host(HostDef::new("versions", &[]).extends("audited"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::NonAtomicHost { .. }));
    }

    #[test]
    fn unresolved_host_param_is_rejected() {
        let err = ModelCatalog::builder()
            .define_host(HostDef::new("versions", &["version_type", "key_type"]))
            .entity(
                EntityModel::new("post", "posts", "id")
                    .with_host(HostBinding::new("versions").param("version_type", "post_version")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnresolvedHostParam { ref param, .. } if param == "key_type"));
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let err = ModelCatalog::builder()
            .entity(EntityModel::new("post", "posts", "id").with_trait("created_at"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTrait { .. }));
    }
}
