// Lifecycle engine: owns the listener registry, the built schema and the
// store seam, and opens per-unit-of-work sessions that run the two-phase save
// protocol.

pub mod pending;
pub mod session;

pub use pending::PendingWrites;
pub use session::{SaveReport, Session, SessionError};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::listener::{ListenerError, ListenerRegistry};
use crate::schema::{self, Schema, TableBuilder};
use crate::store::{Store, StoreError};

/// Errors surfaced by `Session::save_changes`
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("BeforeSave failed in listener '{listener}': {source}")]
    BeforeSave { listener: &'static str, source: ListenerError },

    #[error("AfterSave failed in listener '{listener}': {source}")]
    AfterSave { listener: &'static str, source: ListenerError },

    #[error("FailSave failed in listener '{listener}': {source}")]
    FailSave { listener: &'static str, source: ListenerError },

    #[error("Primary commit failed: {0}")]
    Commit(#[source] StoreError),

    #[error("Secondary commit failed: {0}")]
    SecondaryCommit(#[source] StoreError),

    /// Raised when the Failed-phase drain itself errors; the primary commit
    /// failure that triggered it is kept as the root cause, never replaced
    #[error("{source}; primary commit failure: {commit}")]
    FailedSaveHandling { commit: StoreError, source: Box<SaveError> },
}

/// The engine facade. Built once from a registry and a store; the schema is
/// assembled here by giving every applicable listener its model-building hook,
/// once per exposed entity type.
pub struct Lifecycle {
    registry: Arc<ListenerRegistry>,
    schema: Arc<Schema>,
    store: Arc<dyn Store>,
}

impl Lifecycle {
    /// Engine exposing every entity type in the catalog
    pub fn new(registry: Arc<ListenerRegistry>, store: Arc<dyn Store>) -> Self {
        let exposed: BTreeSet<String> = registry
            .catalog()
            .models()
            .map(|m| m.entity_type().to_string())
            .collect();
        Self::with_exposed(registry, store, exposed)
    }

    /// Engine exposing only a subset of the catalog. Listeners bound to
    /// unexposed types are skipped during schema build but still fire for
    /// change events if such a type is tracked through this engine.
    pub fn with_exposed(
        registry: Arc<ListenerRegistry>,
        store: Arc<dyn Store>,
        exposed: BTreeSet<String>,
    ) -> Self {
        let schema = Arc::new(build_schema(&registry, &exposed));
        Self { registry, schema, store }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Open a fresh unit of work
    pub fn session(&self) -> Session {
        Session::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.schema),
            Arc::clone(&self.store),
        )
    }
}

fn build_schema(registry: &Arc<ListenerRegistry>, exposed: &BTreeSet<String>) -> Schema {
    let mut schema = Schema::default();

    for model in registry.catalog().models() {
        if !exposed.contains(model.entity_type()) {
            tracing::debug!(
                "Skipping schema build for unexposed entity type '{}'",
                model.entity_type()
            );
            continue;
        }

        let mut builder = TableBuilder::new(Arc::clone(model));
        for listener in registry.listeners_for(model.entity_type()) {
            tracing::trace!(
                "Listener '{}' contributing to schema of '{}'",
                listener.name(),
                model.entity_type()
            );
            listener.on_model_building(&mut builder);
        }
        schema.insert(schema::freeze(builder));
    }

    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::EntityChange;
    use crate::listener::{ChangeListener, ListenerTarget};
    use crate::model::{EntityModel, ModelCatalog, TraitDef};
    use crate::store::MemoryStore;

    struct IndexingListener;

    impl ChangeListener for IndexingListener {
        fn name(&self) -> &'static str {
            "IndexingListener"
        }

        fn target(&self) -> ListenerTarget {
            ListenerTarget::Trait("created_at".into())
        }

        fn on_model_building(&self, table: &mut TableBuilder) {
            table.index("created_at");
        }

        fn before_added(&self, _: &mut EntityChange) -> Result<(), crate::listener::ListenerError> {
            Ok(())
        }
    }

    fn registry() -> Arc<ListenerRegistry> {
        let catalog = Arc::new(
            ModelCatalog::builder()
                .define_trait(TraitDef::new("created_at"))
                .entity(EntityModel::new("post", "posts", "id").with_trait("created_at"))
                .entity(EntityModel::new("comment", "comments", "id").with_trait("created_at"))
                .build()
                .unwrap(),
        );
        Arc::new(
            ListenerRegistry::builder(catalog)
                .listen_trait("created_at", "IndexingListener", |_| Arc::new(IndexingListener))
                .unwrap()
                .build(),
        )
    }

    #[test]
    fn schema_covers_exposed_types_only() {
        let store = Arc::new(MemoryStore::new());
        let exposed: BTreeSet<String> = ["post".to_string()].into_iter().collect();
        let engine = Lifecycle::with_exposed(registry(), store, exposed);

        assert!(engine.schema().table_for("post").is_some());
        assert!(engine.schema().table_for("comment").is_none());

        let post = engine.schema().table_for("post").unwrap();
        assert_eq!(post.indexes().len(), 1);
    }

    #[test]
    fn default_constructor_exposes_everything() {
        let store = Arc::new(MemoryStore::new());
        let engine = Lifecycle::new(registry(), store);
        assert!(engine.schema().table_for("post").is_some());
        assert!(engine.schema().table_for("comment").is_some());
    }
}
