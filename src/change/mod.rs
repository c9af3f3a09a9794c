// Change snapshot model: before/after property values for one tracked entity,
// captured at the moment persistence begins. Pure read model plus the two
// listener-writable knobs (live record, persist state, secondary-save flag).

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use serde_json::{Map, Value};

use crate::model::{EntityModel, EntityState};
use crate::store::SharedSecondary;

static NULL: Value = Value::Null;

/// One tracked entity at save time.
///
/// Original values are cloned at construction and never mutated afterward. The
/// captured `state` drives every derived predicate and the fail dispatch;
/// `persist_state` starts equal to it and is what the orchestrator physically
/// writes, so listeners (soft delete) can redirect the write without rewriting
/// history.
#[derive(Debug)]
pub struct EntityChange {
    model: Arc<EntityModel>,
    state: EntityState,
    persist_state: EntityState,
    original_values: Map<String, Value>,
    entity: Map<String, Value>,
    original_entity: OnceCell<Map<String, Value>>,
    secondary: Option<SharedSecondary>,
    needs_secondary_save: bool,
}

impl EntityChange {
    pub fn new(
        model: Arc<EntityModel>,
        state: EntityState,
        entity: Map<String, Value>,
        original_values: Map<String, Value>,
    ) -> Self {
        Self {
            model,
            state,
            persist_state: state,
            original_values,
            entity,
            original_entity: OnceCell::new(),
            secondary: None,
            needs_secondary_save: false,
        }
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    pub fn entity_type(&self) -> &str {
        self.model.entity_type()
    }

    /// Lifecycle state captured when the save began
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// The state the orchestrator will persist; listeners may redirect it
    pub fn persist_state(&self) -> EntityState {
        self.persist_state
    }

    pub fn set_persist_state(&mut self, state: EntityState) {
        self.persist_state = state;
    }

    /// Live record. Mutations made during BeforeSave land in the primary commit.
    pub fn entity(&self) -> &Map<String, Value> {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.entity
    }

    /// The entity's key value, from the live record
    pub fn key(&self) -> &Value {
        self.entity.get(self.model.key_field()).unwrap_or(&NULL)
    }

    /// Snapshot of original property values taken at construction
    pub fn original_values(&self) -> &Map<String, Value> {
        &self.original_values
    }

    /// Original entity materialized from the snapshot, built on first access
    pub fn original_entity(&self) -> &Map<String, Value> {
        self.original_entity.get_or_init(|| self.original_values.clone())
    }

    // === Derived predicates ===

    pub fn is_added(&self) -> bool {
        self.state == EntityState::Added
    }

    pub fn is_modified(&self) -> bool {
        self.state == EntityState::Modified || self.properties().any(|p| p.is_modified())
    }

    pub fn is_deleted(&self) -> bool {
        self.state == EntityState::Deleted
    }

    pub fn is_unchanged(&self) -> bool {
        self.state == EntityState::Unchanged
    }

    pub fn is_detached(&self) -> bool {
        self.state == EntityState::Detached
    }

    // === Property views ===

    /// Every property of the change: union of live and snapshot field names
    pub fn properties(&self) -> impl Iterator<Item = PropertyChange<'_>> {
        let names: BTreeSet<&str> = self
            .entity
            .keys()
            .map(|k| k.as_str())
            .chain(self.original_values.keys().map(|k| k.as_str()))
            .collect();
        names.into_iter().map(move |name| PropertyChange { name, change: self })
    }

    pub fn modified_properties(&self) -> impl Iterator<Item = PropertyChange<'_>> {
        self.properties().filter(|p| p.is_modified())
    }

    pub fn changed_properties(&self) -> impl Iterator<Item = PropertyChange<'_>> {
        self.properties().filter(|p| p.is_changed())
    }

    /// Index a property by name; None only for names the change never saw
    pub fn property<'a>(&'a self, name: &'a str) -> Option<PropertyChange<'a>> {
        if self.entity.contains_key(name) || self.original_values.contains_key(name) {
            Some(PropertyChange { name, change: self })
        } else {
            None
        }
    }

    // === Secondary-save plumbing ===

    /// Alternate persistence context for side-effect writes, bound by the
    /// orchestrator while the pending queue drains
    pub fn secondary(&self) -> Option<&SharedSecondary> {
        self.secondary.as_ref()
    }

    pub(crate) fn bind_secondary(&mut self, secondary: SharedSecondary) {
        self.secondary = Some(secondary);
    }

    pub fn needs_secondary_save(&self) -> bool {
        self.needs_secondary_save
    }

    pub fn set_needs_secondary_save(&mut self, value: bool) {
        self.needs_secondary_save = value;
    }
}

/// One named property's value pair. Owned by its parent change, never shared.
#[derive(Debug, Clone, Copy)]
pub struct PropertyChange<'a> {
    name: &'a str,
    change: &'a EntityChange,
}

impl<'a> PropertyChange<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// Current value from the live record
    pub fn value(&self) -> &'a Value {
        self.change.entity.get(self.name).unwrap_or(&NULL)
    }

    /// Original value, chosen by the captured state: the type default when
    /// Added, the captured snapshot when Modified/Unchanged, the current value
    /// otherwise
    pub fn original_value(&self) -> &'a Value {
        match self.change.state {
            EntityState::Added => &NULL,
            EntityState::Modified | EntityState::Unchanged => {
                self.change.original_values.get(self.name).unwrap_or(&NULL)
            }
            _ => self.value(),
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self.change.state, EntityState::Modified | EntityState::Unchanged)
            && self.value() != self.original_value()
    }

    pub fn is_changed(&self) -> bool {
        self.change.state == EntityState::Added || self.value() != self.original_value()
    }
}
