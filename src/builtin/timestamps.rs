// Timestamp stamping for the created_at / updated_at / deleted_at traits.
// Values are RFC 3339 UTC strings; each column gets a non-unique index.

use chrono::Utc;
use serde_json::{json, Value};

use crate::change::EntityChange;
use crate::listener::{ChangeListener, ListenerError, ListenerTarget};
use crate::schema::TableBuilder;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

/// Default for deleted_at columns: the Unix epoch, meaning "never deleted"
pub const EPOCH: &str = "1970-01-01T00:00:00+00:00";

fn now() -> Value {
    json!(Utc::now().to_rfc3339())
}

/// Stamps `created_at` when a record is first persisted
pub struct CreatedAtListener;

impl ChangeListener for CreatedAtListener {
    fn name(&self) -> &'static str {
        "CreatedAt"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(CREATED_AT.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(CREATED_AT);
    }

    fn before_added(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        change.entity_mut().insert(CREATED_AT.to_string(), now());
        Ok(())
    }
}

/// Stamps `updated_at` on every modification
pub struct UpdatedAtListener;

impl ChangeListener for UpdatedAtListener {
    fn name(&self) -> &'static str {
        "UpdatedAt"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(UPDATED_AT.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(UPDATED_AT);
    }

    fn before_modified(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        change.entity_mut().insert(UPDATED_AT.to_string(), now());
        Ok(())
    }
}

/// Stamps `deleted_at` when a record is deleted. Pairs with the soft-delete
/// listener, which turns the delete into an update carrying this stamp.
pub struct DeletedAtListener;

impl ChangeListener for DeletedAtListener {
    fn name(&self) -> &'static str {
        "DeletedAt"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(DELETED_AT.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.index(DELETED_AT);
        table.default_value(DELETED_AT, json!(EPOCH));
    }

    fn before_deleted(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        change.entity_mut().insert(DELETED_AT.to_string(), now());
        Ok(())
    }
}
