// Actor stamping for the created_by / updated_by / deleted_by traits.
// The embedder supplies the current actor through an ActorSource.

use std::sync::Arc;

use serde_json::json;

use crate::change::EntityChange;
use crate::listener::{ChangeListener, ListenerError, ListenerTarget};
use crate::schema::TableBuilder;

pub const CREATED_BY: &str = "created_by";
pub const UPDATED_BY: &str = "updated_by";
pub const DELETED_BY: &str = "deleted_by";

/// Resolves the actor performing the current save. Typically backed by the
/// embedder's request or session context.
pub trait ActorSource: Send + Sync {
    fn current_actor(&self) -> Option<String>;
}

/// Stamps `created_by` when a record is first persisted
pub struct CreatedByListener {
    actor: Arc<dyn ActorSource>,
}

impl CreatedByListener {
    pub fn new(actor: Arc<dyn ActorSource>) -> Self {
        Self { actor }
    }
}

impl ChangeListener for CreatedByListener {
    fn name(&self) -> &'static str {
        "CreatedBy"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(CREATED_BY.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(CREATED_BY);
    }

    fn before_added(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        stamp(change, CREATED_BY, &self.actor);
        Ok(())
    }
}

/// Stamps `updated_by` on every modification
pub struct UpdatedByListener {
    actor: Arc<dyn ActorSource>,
}

impl UpdatedByListener {
    pub fn new(actor: Arc<dyn ActorSource>) -> Self {
        Self { actor }
    }
}

impl ChangeListener for UpdatedByListener {
    fn name(&self) -> &'static str {
        "UpdatedBy"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(UPDATED_BY.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(UPDATED_BY);
    }

    fn before_modified(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        stamp(change, UPDATED_BY, &self.actor);
        Ok(())
    }
}

/// Stamps `deleted_by` when a record is deleted
pub struct DeletedByListener {
    actor: Arc<dyn ActorSource>,
}

impl DeletedByListener {
    pub fn new(actor: Arc<dyn ActorSource>) -> Self {
        Self { actor }
    }
}

impl ChangeListener for DeletedByListener {
    fn name(&self) -> &'static str {
        "DeletedBy"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(DELETED_BY.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(DELETED_BY);
    }

    fn before_deleted(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        stamp(change, DELETED_BY, &self.actor);
        Ok(())
    }
}

/// Anonymous saves stamp null, so the column still reflects "touched by the
/// listener" rather than keeping a stale value
fn stamp(change: &mut EntityChange, field: &str, actor: &Arc<dyn ActorSource>) {
    let value = match actor.current_actor() {
        Some(id) => json!(id),
        None => serde_json::Value::Null,
    };
    change.entity_mut().insert(field.to_string(), value);
}
