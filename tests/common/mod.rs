// Shared fixture for the integration suites: a blog-shaped catalog with the
// full built-in listener set wired up against a MemoryStore.

use std::sync::Arc;

use entity_lifecycle::builtin::soft_delete::DELETED;
use entity_lifecycle::builtin::timestamps::{CREATED_AT, UPDATED_AT};
use entity_lifecycle::builtin::versioning::{NUMBER, VERSIONED, VERSION_TYPE_PARAM};
use entity_lifecycle::builtin::{
    CreatedAtListener, IsActiveListener, SoftDeleteListener, UpdatedAtListener,
    VersionHostListener, VersionModelListener,
};
use entity_lifecycle::{
    EntityModel, HostBinding, HostDef, Lifecycle, ListenerRegistry, MemoryStore, ModelCatalog,
    TraitDef,
};
use serde_json::{Map, Value};

pub const IS_ACTIVE: &str = entity_lifecycle::builtin::is_active::IS_ACTIVE;

static TRACING: std::sync::Once = std::sync::Once::new();

/// Route dispatch logs through the test harness; filtered by RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn catalog() -> Arc<ModelCatalog> {
    let catalog = ModelCatalog::builder()
        .define_trait(TraitDef::new(CREATED_AT))
        .define_trait(TraitDef::new(UPDATED_AT))
        .define_trait(TraitDef::new(DELETED))
        .define_trait(TraitDef::new(IS_ACTIVE))
        .define_host(HostDef::new(VERSIONED, &[VERSION_TYPE_PARAM]))
        .entity(
            EntityModel::new("post", "posts", "id")
                .with_trait(CREATED_AT)
                .with_trait(UPDATED_AT)
                .with_trait(DELETED)
                .with_host(HostBinding::new(VERSIONED).param(VERSION_TYPE_PARAM, "post_version")),
        )
        .entity(EntityModel::new("post_version", "post_versions", NUMBER))
        .entity(EntityModel::new("tag", "tags", "id").with_trait(IS_ACTIVE))
        .build();

    Arc::new(catalog.expect("fixture catalog is valid"))
}

pub fn registry(catalog: Arc<ModelCatalog>) -> Arc<ListenerRegistry> {
    let host_model = Arc::clone(catalog.model("post").expect("post is in the fixture catalog"));

    let registry = ListenerRegistry::builder(Arc::clone(&catalog))
        .listen_trait(CREATED_AT, "CreatedAt", |_| Arc::new(CreatedAtListener))
        .and_then(|b| b.listen_trait(UPDATED_AT, "UpdatedAt", |_| Arc::new(UpdatedAtListener)))
        .and_then(|b| b.listen_trait(DELETED, "SoftDelete", |_| Arc::new(SoftDeleteListener)))
        .and_then(|b| b.listen_trait(IS_ACTIVE, "IsActive", |_| Arc::new(IsActiveListener)))
        .and_then(|b| {
            b.listen_host(VERSIONED, "VersionHost", |model, _binding| {
                Ok(Arc::new(VersionHostListener::new(model)))
            })
        })
        .and_then(|b| {
            b.listen_entity(
                "post_version",
                Arc::new(VersionModelListener::new("post_version", &host_model)),
            )
        })
        .expect("fixture registrations are valid")
        .build();

    Arc::new(registry)
}

pub fn engine() -> (Lifecycle, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Lifecycle::new(registry(catalog()), store.clone());
    store.apply_schema(engine.schema());
    (engine, store)
}

pub fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
