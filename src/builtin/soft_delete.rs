// Soft delete for the `deleted` trait: a delete becomes an update that sets
// `deleted = true`, unless the record carries the transient force flag.

use serde_json::{json, Map, Value};

use crate::change::EntityChange;
use crate::listener::{ChangeListener, ListenerError, ListenerTarget};
use crate::model::EntityState;
use crate::schema::TableBuilder;

pub const DELETED: &str = "deleted";

/// Transient marker; never persisted (ignored at schema build)
pub const FORCE_DELETED: &str = "force_deleted";

/// Mark a record so its next delete bypasses soft delete and removes the row
pub fn mark_force_deleted(record: &mut Map<String, Value>) {
    record.insert(FORCE_DELETED.to_string(), json!(true));
}

pub fn is_force_deleted(record: &Map<String, Value>) -> bool {
    record.get(FORCE_DELETED) == Some(&json!(true))
}

/// True when the record has not been soft-deleted
pub fn not_deleted(record: &Map<String, Value>) -> bool {
    record.get(DELETED) != Some(&json!(true))
}

pub struct SoftDeleteListener;

impl ChangeListener for SoftDeleteListener {
    fn name(&self) -> &'static str {
        "SoftDelete"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(DELETED.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.default_value(DELETED, json!(false));
        table.ignore(FORCE_DELETED);
    }

    /// Redirects the physical write to an update; the captured state stays
    /// Deleted, so other listeners still observe a delete
    fn before_deleted(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        if is_force_deleted(change.entity()) {
            return Ok(());
        }

        change.entity_mut().insert(DELETED.to_string(), json!(true));
        change.set_persist_state(EntityState::Modified);
        tracing::trace!(
            "Soft delete: '{}' key {} persists as an update",
            change.entity_type(),
            change.key()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityModel;
    use std::sync::Arc;

    fn change(record: Map<String, Value>) -> EntityChange {
        let model = EntityModel::new("post", "posts", "id").with_trait(DELETED);
        EntityChange::new(Arc::new(model), EntityState::Deleted, record, Map::new())
    }

    fn record() -> Map<String, Value> {
        let mut r = Map::new();
        r.insert("id".into(), json!("p1"));
        r
    }

    #[test]
    fn delete_becomes_update_with_flag_set() {
        let mut c = change(record());
        SoftDeleteListener.before_save(&mut c).unwrap();

        assert_eq!(c.state(), EntityState::Deleted);
        assert_eq!(c.persist_state(), EntityState::Modified);
        assert_eq!(c.entity()[DELETED], json!(true));
        assert!(!not_deleted(c.entity()));
    }

    #[test]
    fn force_deleted_record_is_really_removed() {
        let mut r = record();
        mark_force_deleted(&mut r);
        let mut c = change(r);
        SoftDeleteListener.before_save(&mut c).unwrap();

        assert_eq!(c.persist_state(), EntityState::Deleted);
        assert!(!c.entity().contains_key(DELETED));
    }
}
