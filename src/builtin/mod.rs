// Reference listeners shipped with the engine. Each binds to a named trait or
// host capability; embedders wire them up through the registry builder.

pub mod audit;
pub mod is_active;
pub mod soft_delete;
pub mod timestamps;
pub mod versioning;

pub use audit::{ActorSource, CreatedByListener, DeletedByListener, UpdatedByListener};
pub use is_active::IsActiveListener;
pub use soft_delete::SoftDeleteListener;
pub use timestamps::{CreatedAtListener, DeletedAtListener, UpdatedAtListener};
pub use versioning::{VersionError, VersionHostListener, VersionModelListener};
