// Listener capability contracts. Three shapes - entity-targeted,
// trait-targeted and host-targeted - all reducible to one base contract with
// state-dispatched default hooks, so concrete listeners override only what
// they need.

pub mod registry;

pub use registry::{ListenerCache, ListenerRegistry, ListenerRegistryBuilder, RegistryError};

use crate::change::EntityChange;
use crate::model::{EntityModel, EntityState};
use crate::schema::TableBuilder;

/// What a listener binds to: one concrete type, every type declaring a trait
/// capability, or every type declaring a host capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerTarget {
    Entity(String),
    Trait(String),
    Host(String),
}

impl std::fmt::Display for ListenerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerTarget::Entity(name) => write!(f, "entity:{}", name),
            ListenerTarget::Trait(name) => write!(f, "trait:{}", name),
            ListenerTarget::Host(name) => write!(f, "host:{}", name),
        }
    }
}

/// Errors raised by listener hooks. A BeforeSave error aborts the save before
/// the primary commit.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ListenerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Listener error: {0}")]
    Other(String),
}

/// Base contract every listener implements.
///
/// The generic phase hooks check the change's model against the listener's
/// target (a cheap capability lookup, no per-call reflection) and dispatch to
/// the state-specific hooks. Before/after dispatch intentionally uses
/// non-exclusive `if`s over the derived predicates, so an Unchanged entry with
/// modified properties fires both the unchanged and modified hooks. Fail
/// dispatch is a single exhaustive state match.
pub trait ChangeListener: Send + Sync {
    /// Listener name for logging and binding deduplication
    fn name(&self) -> &'static str;

    fn target(&self) -> ListenerTarget;

    fn applies_to(&self, model: &EntityModel) -> bool {
        match self.target() {
            ListenerTarget::Entity(name) => model.entity_type() == name,
            ListenerTarget::Trait(name) => model.satisfies_trait(&name),
            ListenerTarget::Host(name) => model.host_binding(&name).is_some(),
        }
    }

    /// Contribute indexes, defaults, transient fields or a table rename during
    /// schema build
    fn on_model_building(&self, _table: &mut TableBuilder) {}

    fn before_save(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        if !self.applies_to(change.model()) {
            return Ok(());
        }

        if change.is_added() {
            self.before_added(change)?;
        }
        if change.is_modified() {
            self.before_modified(change)?;
        }
        if change.is_deleted() {
            self.before_deleted(change)?;
        }
        if change.is_unchanged() {
            self.before_unchanged(change)?;
        }
        if change.is_detached() {
            self.before_detached(change)?;
        }
        Ok(())
    }

    fn after_save(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        if !self.applies_to(change.model()) {
            return Ok(());
        }

        if change.is_added() {
            self.after_added(change)?;
        }
        if change.is_modified() {
            self.after_modified(change)?;
        }
        if change.is_deleted() {
            self.after_deleted(change)?;
        }
        if change.is_unchanged() {
            self.after_unchanged(change)?;
        }
        if change.is_detached() {
            self.after_detached(change)?;
        }
        Ok(())
    }

    fn fail_save(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        if !self.applies_to(change.model()) {
            return Ok(());
        }

        match change.state() {
            EntityState::Detached => self.fail_detached(change),
            EntityState::Unchanged => self.fail_unchanged(change),
            EntityState::Deleted => self.fail_deleted(change),
            EntityState::Modified => self.fail_modified(change),
            EntityState::Added => self.fail_added(change),
        }
    }

    // === State-specific hooks, default no-ops ===

    fn before_added(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn before_modified(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn before_deleted(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn before_unchanged(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn before_detached(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn after_added(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn after_modified(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn after_deleted(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn after_unchanged(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn after_detached(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn fail_added(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn fail_modified(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn fail_deleted(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn fail_unchanged(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }

    fn fail_detached(&self, _change: &mut EntityChange) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityModel;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;
    use std::sync::Mutex;

    struct RecordingListener {
        target: ListenerTarget,
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingListener {
        fn new(target: ListenerTarget) -> Self {
            Self { target, calls: Mutex::new(Vec::new()) }
        }

        fn push(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ChangeListener for RecordingListener {
        fn name(&self) -> &'static str {
            "RecordingListener"
        }

        fn target(&self) -> ListenerTarget {
            self.target.clone()
        }

        fn before_added(&self, _: &mut EntityChange) -> Result<(), ListenerError> {
            self.push("before_added");
            Ok(())
        }

        fn before_modified(&self, _: &mut EntityChange) -> Result<(), ListenerError> {
            self.push("before_modified");
            Ok(())
        }

        fn before_unchanged(&self, _: &mut EntityChange) -> Result<(), ListenerError> {
            self.push("before_unchanged");
            Ok(())
        }

        fn fail_deleted(&self, _: &mut EntityChange) -> Result<(), ListenerError> {
            self.push("fail_deleted");
            Ok(())
        }
    }

    fn change(state: crate::model::EntityState, current: &[(&str, Value)], original: &[(&str, Value)]) -> EntityChange {
        let current: Map<String, Value> = current.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let original: Map<String, Value> = original.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        EntityChange::new(Arc::new(EntityModel::new("post", "posts", "id")), state, current, original)
    }

    #[test]
    fn mismatched_target_short_circuits() {
        let listener = RecordingListener::new(ListenerTarget::Entity("comment".into()));
        let mut ch = change(crate::model::EntityState::Added, &[("id", json!("p1"))], &[]);
        listener.before_save(&mut ch).unwrap();
        assert!(listener.calls().is_empty());
    }

    #[test]
    fn added_dispatches_only_added_hook() {
        let listener = RecordingListener::new(ListenerTarget::Entity("post".into()));
        let mut ch = change(crate::model::EntityState::Added, &[("id", json!("p1"))], &[]);
        listener.before_save(&mut ch).unwrap();
        assert_eq!(listener.calls(), vec!["before_added"]);
    }

    #[test]
    fn unchanged_with_edits_fires_both_hooks() {
        let listener = RecordingListener::new(ListenerTarget::Entity("post".into()));
        let mut ch = change(
            crate::model::EntityState::Unchanged,
            &[("id", json!("p1")), ("title", json!("edited"))],
            &[("id", json!("p1")), ("title", json!("original"))],
        );
        listener.before_save(&mut ch).unwrap();
        assert_eq!(listener.calls(), vec!["before_modified", "before_unchanged"]);
    }

    #[test]
    fn fail_dispatch_routes_by_state() {
        let listener = RecordingListener::new(ListenerTarget::Entity("post".into()));
        let mut ch = change(
            crate::model::EntityState::Deleted,
            &[("id", json!("p1"))],
            &[("id", json!("p1"))],
        );
        listener.fail_save(&mut ch).unwrap();
        assert_eq!(listener.calls(), vec!["fail_deleted"]);
    }

    #[test]
    fn trait_target_applies_via_capability() {
        let listener = RecordingListener::new(ListenerTarget::Trait("created_at".into()));
        let model = EntityModel::new("post", "posts", "id").with_trait("created_at");
        assert!(listener.applies_to(&model));
        let other = EntityModel::new("comment", "comments", "id");
        assert!(!listener.applies_to(&other));
    }
}
