// Entity change lifecycle engine: per-property change snapshots, capability
// targeted listeners and a two-phase save protocol with an independent
// secondary transaction, all behind a narrow persistence seam.

pub mod builtin;
pub mod change;
pub mod lifecycle;
pub mod listener;
pub mod model;
pub mod schema;
pub mod store;

pub use change::{EntityChange, PropertyChange};
pub use lifecycle::{Lifecycle, PendingWrites, SaveError, SaveReport, Session, SessionError};
pub use listener::{
    ChangeListener, ListenerError, ListenerRegistry, ListenerRegistryBuilder, ListenerTarget,
    RegistryError,
};
pub use model::{
    CatalogError, EntityModel, EntityState, HostBinding, HostDef, ModelCatalog,
    ModelCatalogBuilder, TraitDef,
};
pub use schema::{Schema, TableBuilder, TableSchema};
pub use store::{MemoryStore, RowWrite, SecondaryContext, SharedSecondary, Store, StoreError};
