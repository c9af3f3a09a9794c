// One unit of work: tracks entities, then runs the two-phase save protocol
// (Saving -> Saved | Failed) against the store. The secondary phase always
// completes before save_changes returns.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::change::EntityChange;
use crate::lifecycle::pending::PendingWrites;
use crate::lifecycle::SaveError;
use crate::listener::{ListenerCache, ListenerRegistry};
use crate::model::{EntityModel, EntityState};
use crate::schema::Schema;
use crate::store::{key_token, RowWrite, SecondaryContext, SharedSecondary, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("Record of type '{entity_type}' is missing its key field '{key_field}'")]
    MissingKey { entity_type: String, key_field: String },

    #[error("No tracked entity of type '{entity_type}' with key {key}")]
    NotTracked { entity_type: String, key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one completed save cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// Tracked entities that went through the lifecycle
    pub entities: usize,
    /// Physical writes in the primary commit
    pub primary_writes: usize,
    /// Physical writes flushed through the secondary context
    pub secondary_writes: usize,
}

#[derive(Debug)]
struct TrackedEntry {
    model: Arc<EntityModel>,
    state: EntityState,
    current: Map<String, Value>,
    original: Option<Map<String, Value>>,
}

impl TrackedEntry {
    /// State as it will be captured into the change: a loaded entry whose
    /// values drifted from the snapshot is Modified
    fn effective_state(&self) -> EntityState {
        match (self.state, &self.original) {
            (EntityState::Unchanged, Some(original)) if *original != self.current => {
                EntityState::Modified
            }
            _ => self.state,
        }
    }
}

enum SecondaryPhase {
    AfterSave,
    FailSave,
}

pub struct Session {
    registry: Arc<ListenerRegistry>,
    schema: Arc<Schema>,
    store: Arc<dyn Store>,
    cache: ListenerCache,
    pending: PendingWrites,
    tracked: Vec<TrackedEntry>,
    index: HashMap<(String, String), usize>,
    auto_seq: usize,
}

impl Session {
    pub(crate) fn new(
        registry: Arc<ListenerRegistry>,
        schema: Arc<Schema>,
        store: Arc<dyn Store>,
    ) -> Self {
        let cache = ListenerCache::new(Arc::clone(&registry));
        Self {
            registry,
            schema,
            store,
            cache,
            pending: PendingWrites::new(),
            tracked: Vec::new(),
            index: HashMap::new(),
            auto_seq: 0,
        }
    }

    /// Track a new record for insertion
    pub fn add(&mut self, entity_type: &str, record: Map<String, Value>) -> Result<(), SessionError> {
        let model = self.model(entity_type)?;

        let has_key = matches!(record.get(model.key_field()), Some(v) if !v.is_null());
        let auto_key = self
            .schema
            .table_for(entity_type)
            .map(|t| t.auto_increment_key())
            .unwrap_or(false);
        if !has_key && !auto_key {
            return Err(SessionError::MissingKey {
                entity_type: entity_type.to_string(),
                key_field: model.key_field().to_string(),
            });
        }

        let token = if has_key {
            key_token(&record[model.key_field()])
        } else {
            self.auto_seq += 1;
            format!("__pending_auto_{}", self.auto_seq)
        };

        self.track(TrackedEntry { model, state: EntityState::Added, current: record, original: None }, token);
        Ok(())
    }

    /// Load a row from the store and track it as Unchanged. Returns the
    /// already-tracked record when the key is in this session.
    pub async fn load(
        &mut self,
        entity_type: &str,
        key: &Value,
    ) -> Result<Option<&Map<String, Value>>, SessionError> {
        let model = self.model(entity_type)?;
        let token = key_token(key);

        if let Some(&pos) = self.index.get(&(entity_type.to_string(), token.clone())) {
            return Ok(Some(&self.tracked[pos].current));
        }

        let table = self.table_name(&model);
        let Some(row) = self.store.load(&table, key).await? else {
            return Ok(None);
        };

        self.track(
            TrackedEntry {
                model,
                state: EntityState::Unchanged,
                current: row.clone(),
                original: Some(row),
            },
            token,
        );
        Ok(self.tracked.last().map(|entry| &entry.current))
    }

    /// Tracked record by key, if present in this session
    pub fn entity(&self, entity_type: &str, key: &Value) -> Option<&Map<String, Value>> {
        self.entry_pos(entity_type, key).map(|pos| &self.tracked[pos].current)
    }

    /// Mutable access to a tracked record; edits are diffed at save time
    pub fn entity_mut(&mut self, entity_type: &str, key: &Value) -> Option<&mut Map<String, Value>> {
        let pos = self.entry_pos(entity_type, key)?;
        Some(&mut self.tracked[pos].current)
    }

    /// Mark a tracked entity for deletion
    pub fn delete(&mut self, entity_type: &str, key: &Value) -> Result<(), SessionError> {
        self.set_state(entity_type, key, EntityState::Deleted)
    }

    /// Detach a tracked entity: listeners still observe it, nothing is written
    pub fn detach(&mut self, entity_type: &str, key: &Value) -> Result<(), SessionError> {
        self.set_state(entity_type, key, EntityState::Detached)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Two-phase save.
    ///
    /// Saving: per tracked entity, build the change snapshot, run every
    /// resolved listener's BeforeSave in registration order (an error aborts
    /// before any commit), then queue the change. Primary commit is one batch.
    /// Saved: a fresh secondary context is bound onto each queued change while
    /// AfterSave runs; one secondary commit follows if any listener asked for
    /// it. Failed: same drain with FailSave, and the secondary commit is still
    /// attempted - compensating writes flush even though the primary failed -
    /// before the commit error is returned to the caller.
    pub async fn save_changes(&mut self) -> Result<SaveReport, SaveError> {
        let entries = std::mem::take(&mut self.tracked);
        self.index.clear();
        let entity_count = entries.len();
        let mut writes: Vec<RowWrite> = Vec::new();

        tracing::debug!("Save cycle starting: {} tracked entities", entity_count);

        for entry in entries {
            let state = entry.effective_state();
            let mut change = EntityChange::new(
                entry.model,
                state,
                entry.current,
                entry.original.unwrap_or_default(),
            );

            let listeners = self.cache.resolve(change.entity_type());
            for listener in listeners.iter() {
                tracing::trace!(
                    "BeforeSave: listener '{}' on '{}' ({:?})",
                    listener.name(),
                    change.entity_type(),
                    change.state()
                );
                if let Err(source) = listener.before_save(&mut change) {
                    tracing::warn!(
                        "BeforeSave aborted by listener '{}' on '{}': {}",
                        listener.name(),
                        change.entity_type(),
                        source
                    );
                    self.pending.clear();
                    return Err(SaveError::BeforeSave { listener: listener.name(), source });
                }
            }

            if let Some(write) = self.row_write(&change) {
                writes.push(write);
            }
            self.pending.enqueue(change);
        }

        let primary_writes = writes.len();

        match self.store.commit(writes).await {
            Ok(()) => {
                tracing::debug!("Primary commit succeeded ({} writes)", primary_writes);
                let secondary_writes = self.drain_pending(SecondaryPhase::AfterSave).await?;
                Ok(SaveReport { entities: entity_count, primary_writes, secondary_writes })
            }
            Err(err) => {
                tracing::warn!("Primary commit failed: {}", err);
                match self.drain_pending(SecondaryPhase::FailSave).await {
                    Ok(_) => Err(SaveError::Commit(err)),
                    // The drain error does not displace the root cause
                    Err(drain_err) => Err(SaveError::FailedSaveHandling {
                        commit: err,
                        source: Box::new(drain_err),
                    }),
                }
            }
        }
    }

    /// Drain the pending queue against a fresh secondary context and flush it
    /// with a single commit if any listener requested one. Runs to completion
    /// before the outer save call returns.
    async fn drain_pending(&mut self, phase: SecondaryPhase) -> Result<usize, SaveError> {
        let secondary: SharedSecondary = Arc::new(SecondaryContext::default());
        let mut needs_secondary_save = false;

        while let Some(mut change) = self.pending.dequeue() {
            change.bind_secondary(Arc::clone(&secondary));

            let listeners = self.cache.resolve(change.entity_type());
            for listener in listeners.iter() {
                let result = match phase {
                    SecondaryPhase::AfterSave => listener.after_save(&mut change),
                    SecondaryPhase::FailSave => listener.fail_save(&mut change),
                };
                if let Err(source) = result {
                    return Err(match phase {
                        SecondaryPhase::AfterSave => {
                            SaveError::AfterSave { listener: listener.name(), source }
                        }
                        SecondaryPhase::FailSave => {
                            SaveError::FailSave { listener: listener.name(), source }
                        }
                    });
                }
            }

            needs_secondary_save |= change.needs_secondary_save();
        }

        if !needs_secondary_save {
            return Ok(0);
        }

        let writes = secondary.take_writes();
        let count = writes.len();
        tracing::debug!("Secondary flush: {} writes", count);
        self.store.commit(writes).await.map_err(SaveError::SecondaryCommit)?;
        Ok(count)
    }

    /// Physical write for a change, driven by its persist state
    fn row_write(&self, change: &EntityChange) -> Option<RowWrite> {
        let table_schema = self.schema.table_for(change.entity_type());
        let table = table_schema
            .map(|t| t.table_name().to_string())
            .unwrap_or_else(|| change.model().table().to_string());

        match change.persist_state() {
            EntityState::Added => {
                let row = table_schema
                    .map(|t| t.to_persisted_row(change.entity(), true))
                    .unwrap_or_else(|| change.entity().clone());
                Some(RowWrite::Insert { table, row })
            }
            EntityState::Modified => {
                let row = table_schema
                    .map(|t| t.to_persisted_row(change.entity(), false))
                    .unwrap_or_else(|| change.entity().clone());
                Some(RowWrite::Update { table, key: change.key().clone(), row })
            }
            EntityState::Deleted => Some(RowWrite::Delete { table, key: change.key().clone() }),
            EntityState::Unchanged | EntityState::Detached => None,
        }
    }

    fn model(&self, entity_type: &str) -> Result<Arc<EntityModel>, SessionError> {
        self.registry
            .catalog()
            .model(entity_type)
            .cloned()
            .ok_or_else(|| SessionError::UnknownEntityType(entity_type.to_string()))
    }

    fn table_name(&self, model: &EntityModel) -> String {
        self.schema
            .table_for(model.entity_type())
            .map(|t| t.table_name().to_string())
            .unwrap_or_else(|| model.table().to_string())
    }

    fn track(&mut self, entry: TrackedEntry, token: String) {
        let key = (entry.model.entity_type().to_string(), token);
        self.index.insert(key, self.tracked.len());
        self.tracked.push(entry);
    }

    fn entry_pos(&self, entity_type: &str, key: &Value) -> Option<usize> {
        self.index.get(&(entity_type.to_string(), key_token(key))).copied()
    }

    fn set_state(
        &mut self,
        entity_type: &str,
        key: &Value,
        state: EntityState,
    ) -> Result<(), SessionError> {
        let pos = self.entry_pos(entity_type, key).ok_or_else(|| SessionError::NotTracked {
            entity_type: entity_type.to_string(),
            key: key_token(key),
        })?;
        self.tracked[pos].state = state;
        Ok(())
    }
}
