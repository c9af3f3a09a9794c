// Listener registration and resolution. Trait and host listener definitions
// are expanded once at build time into per-concrete-type bindings, with
// duplicate (capability, listener) pairs collapsed; resolution afterwards is a
// cached map lookup, never a scan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::listener::{ChangeListener, ListenerTarget};
use crate::model::{EntityModel, HostBinding, ModelCatalog};

/// Malformed listener registration - fatal at startup, never retried
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Cannot register listener for unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Cannot register listener for unknown trait '{0}'")]
    UnknownTrait(String),

    #[error("Cannot register listener for unknown host '{0}'")]
    UnknownHost(String),

    #[error("Listener '{listener}' targets {actual} but was registered for {expected}")]
    TargetMismatch { listener: &'static str, expected: String, actual: String },

    #[error("Listener '{listener}' requires host '{host}' parameter '{param}'")]
    MissingHostParam { listener: &'static str, host: String, param: String },
}

type Bindings = HashMap<String, Vec<Arc<dyn ChangeListener>>>;

/// Immutable process-wide listener registry, built once at startup
pub struct ListenerRegistry {
    catalog: Arc<ModelCatalog>,
    bindings: Bindings,
}

impl ListenerRegistry {
    pub fn builder(catalog: Arc<ModelCatalog>) -> ListenerRegistryBuilder {
        ListenerRegistryBuilder {
            catalog,
            bindings: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Every listener bound to the given concrete entity type, in registration
    /// order (own-type plus every satisfied trait/host listener)
    pub fn listeners_for(&self, entity_type: &str) -> &[Arc<dyn ChangeListener>] {
        self.bindings.get(entity_type).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

pub struct ListenerRegistryBuilder {
    catalog: Arc<ModelCatalog>,
    bindings: Bindings,
    /// (capability, listener name) pairs already registered
    seen: HashSet<(String, &'static str)>,
}

impl std::fmt::Debug for ListenerRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistryBuilder")
            .field("seen", &self.seen)
            .finish_non_exhaustive()
    }
}

impl ListenerRegistryBuilder {
    /// Bind a listener to exactly one concrete entity type
    pub fn listen_entity(
        mut self,
        entity_type: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<Self, RegistryError> {
        let model = self
            .catalog
            .model(entity_type)
            .ok_or_else(|| RegistryError::UnknownEntityType(entity_type.to_string()))?
            .clone();

        let expected = ListenerTarget::Entity(entity_type.to_string());
        if listener.target() != expected {
            return Err(RegistryError::TargetMismatch {
                listener: listener.name(),
                expected: expected.to_string(),
                actual: listener.target().to_string(),
            });
        }

        if self.mark_seen(expected.to_string(), listener.name()) {
            self.bind(&model, listener);
        }
        Ok(self)
    }

    /// Bind a trait listener definition: the factory is invoked once per
    /// concrete entity type declaring the trait
    pub fn listen_trait<F>(
        mut self,
        trait_name: &str,
        listener_name: &'static str,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&Arc<EntityModel>) -> Arc<dyn ChangeListener>,
    {
        if self.catalog.trait_def(trait_name).is_none() {
            return Err(RegistryError::UnknownTrait(trait_name.to_string()));
        }

        let capability = ListenerTarget::Trait(trait_name.to_string()).to_string();
        if !self.mark_seen(capability, listener_name) {
            return Ok(self);
        }

        let satisfying: Vec<Arc<EntityModel>> = self
            .catalog
            .models()
            .filter(|m| m.satisfies_trait(trait_name))
            .cloned()
            .collect();

        for model in satisfying {
            let listener = factory(&model);
            self.check_target(&listener, &ListenerTarget::Trait(trait_name.to_string()))?;
            self.bind(&model, listener);
        }
        Ok(self)
    }

    /// Bind a host listener definition: the factory is invoked once per
    /// concrete entity type declaring the host, with its resolved binding
    pub fn listen_host<F>(
        mut self,
        host_name: &str,
        listener_name: &'static str,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&Arc<EntityModel>, &HostBinding) -> Result<Arc<dyn ChangeListener>, RegistryError>,
    {
        if self.catalog.host_def(host_name).is_none() {
            return Err(RegistryError::UnknownHost(host_name.to_string()));
        }

        let capability = ListenerTarget::Host(host_name.to_string()).to_string();
        if !self.mark_seen(capability, listener_name) {
            return Ok(self);
        }

        let satisfying: Vec<Arc<EntityModel>> = self
            .catalog
            .models()
            .filter(|m| m.host_binding(host_name).is_some())
            .cloned()
            .collect();

        for model in satisfying {
            let binding = model
                .host_binding(host_name)
                .cloned()
                .unwrap_or_else(|| HostBinding::new(host_name));
            let listener = factory(&model, &binding)?;
            self.check_target(&listener, &ListenerTarget::Host(host_name.to_string()))?;
            self.bind(&model, listener);
        }
        Ok(self)
    }

    pub fn build(self) -> ListenerRegistry {
        let total: usize = self.bindings.values().map(|v| v.len()).sum();
        tracing::debug!(
            "Listener registry built: {} bindings across {} entity types",
            total,
            self.bindings.len()
        );
        ListenerRegistry { catalog: self.catalog, bindings: self.bindings }
    }

    fn check_target(
        &self,
        listener: &Arc<dyn ChangeListener>,
        expected: &ListenerTarget,
    ) -> Result<(), RegistryError> {
        if &listener.target() != expected {
            return Err(RegistryError::TargetMismatch {
                listener: listener.name(),
                expected: expected.to_string(),
                actual: listener.target().to_string(),
            });
        }
        Ok(())
    }

    /// Returns false when the (capability, listener) pair was already registered
    fn mark_seen(&mut self, capability: String, listener_name: &'static str) -> bool {
        let fresh = self.seen.insert((capability.clone(), listener_name));
        if !fresh {
            tracing::debug!(
                "Skipping duplicate registration of '{}' for {}",
                listener_name,
                capability
            );
        }
        fresh
    }

    fn bind(&mut self, model: &Arc<EntityModel>, listener: Arc<dyn ChangeListener>) {
        tracing::debug!(
            "Bound listener '{}' to entity type '{}'",
            listener.name(),
            model.entity_type()
        );
        self.bindings.entry(model.entity_type().to_string()).or_default().push(listener);
    }
}

/// Per-unit-of-work resolution cache. Resolution for a type is computed once
/// per session lifetime; re-resolving per entity per save would be a severe
/// performance regression.
pub struct ListenerCache {
    registry: Arc<ListenerRegistry>,
    memo: HashMap<String, Arc<Vec<Arc<dyn ChangeListener>>>>,
}

impl ListenerCache {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry, memo: HashMap::new() }
    }

    pub fn resolve(&mut self, entity_type: &str) -> Arc<Vec<Arc<dyn ChangeListener>>> {
        if let Some(cached) = self.memo.get(entity_type) {
            return Arc::clone(cached);
        }
        let listeners = Arc::new(self.registry.listeners_for(entity_type).to_vec());
        self.memo.insert(entity_type.to_string(), Arc::clone(&listeners));
        listeners
    }
}
