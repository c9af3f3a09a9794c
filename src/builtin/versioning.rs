// Versioning for the `versioned` host capability. Every insert or update of a
// host record stages a snapshot row into the secondary context; the version
// table lives beside the host table and is flushed in the secondary commit.

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::change::EntityChange;
use crate::listener::{ChangeListener, ListenerError, ListenerTarget};
use crate::model::EntityModel;
use crate::schema::TableBuilder;

pub const VERSIONED: &str = "versioned";

/// Host binding parameter naming the version entity type
pub const VERSION_TYPE_PARAM: &str = "version_type";

/// Auto-increment key of a version row
pub const NUMBER: &str = "number";
/// Key of the host record a version row belongs to (non-unique index)
pub const ENTITY_ID: &str = "entity_id";
/// JSON blob of the host record at snapshot time
pub const SERIALIZED: &str = "serialized";
pub const RECORDED_AT: &str = "recorded_at";

/// Version table name for a host table
pub fn version_table_name(host_table: &str) -> String {
    format!("{}_Versions", host_table)
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("Corrupt version snapshot for entity {entity_id}: {source} (payload: {payload})")]
    CorruptSnapshot {
        entity_id: String,
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Version row is missing its '{0}' field")]
    MissingField(&'static str),
}

/// Decode the host record stored in a version row. A payload that fails to
/// parse is surfaced with the raw stored text, never silently dropped.
pub fn decode_snapshot(row: &Map<String, Value>) -> Result<Map<String, Value>, VersionError> {
    let payload = row
        .get(SERIALIZED)
        .and_then(Value::as_str)
        .ok_or(VersionError::MissingField(SERIALIZED))?;

    let decoded: Map<String, Value> =
        serde_json::from_str(payload).map_err(|source| VersionError::CorruptSnapshot {
            entity_id: row.get(ENTITY_ID).cloned().unwrap_or(Value::Null).to_string(),
            payload: payload.to_string(),
            source,
        })?;
    Ok(decoded)
}

/// Bound to one versioned host type; created once per host by the registry
/// factory. Snapshots are staged AfterSave so they capture exactly what the
/// primary commit persisted.
///
/// Host records must carry caller-supplied keys. A store-assigned
/// auto-increment key is not visible to the session after the primary commit,
/// so a keyless record fails here instead of versioning under a null entity id.
pub struct VersionHostListener {
    version_table: String,
}

impl VersionHostListener {
    pub fn new(host_model: &EntityModel) -> Self {
        Self { version_table: version_table_name(host_model.table()) }
    }

    fn stage_snapshot(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        if change.key().is_null() {
            return Err(ListenerError::Other(format!(
                "Versioned host '{}' record has no key; store-assigned keys cannot be versioned",
                change.entity_type()
            )));
        }

        let serialized = serde_json::to_string(change.entity())
            .map_err(|e| ListenerError::Other(format!("Version snapshot failed: {}", e)))?;

        let mut row = Map::new();
        row.insert(ENTITY_ID.to_string(), change.key().clone());
        row.insert(SERIALIZED.to_string(), json!(serialized));
        row.insert(RECORDED_AT.to_string(), json!(Utc::now().to_rfc3339()));

        let Some(secondary) = change.secondary() else {
            return Err(ListenerError::Other(
                "Version snapshot requested outside a secondary phase".to_string(),
            ));
        };
        secondary.insert(self.version_table.clone(), row);
        change.set_needs_secondary_save(true);

        tracing::trace!(
            "Version snapshot staged: '{}' key {} -> {}",
            change.entity_type(),
            change.key(),
            self.version_table
        );
        Ok(())
    }
}

impl ChangeListener for VersionHostListener {
    fn name(&self) -> &'static str {
        "VersionHost"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Host(VERSIONED.to_string())
    }

    fn after_added(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        self.stage_snapshot(change)
    }

    fn after_modified(&self, change: &mut EntityChange) -> Result<(), ListenerError> {
        self.stage_snapshot(change)
    }
}

/// Bound to the version entity type itself; shapes the version table at
/// schema build. The version type is a regular catalog entity whose rows are
/// written only through the secondary context.
pub struct VersionModelListener {
    version_type: String,
    version_table: String,
}

impl VersionModelListener {
    pub fn new(version_type: impl Into<String>, host_model: &EntityModel) -> Self {
        Self {
            version_type: version_type.into(),
            version_table: version_table_name(host_model.table()),
        }
    }
}

impl ChangeListener for VersionModelListener {
    fn name(&self) -> &'static str {
        "VersionModel"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Entity(self.version_type.clone())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.rename_table(self.version_table.clone());
        table.auto_increment_key();
        table.index(ENTITY_ID);
    }
}
