// Narrow persistence seam consumed by the lifecycle engine.
// The engine never generates SQL or manages connections; it hands the store a
// batch of row writes and expects a single atomic commit.

pub mod memory;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::MemoryStore;

/// One physical write produced by a save cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RowWrite {
    Insert { table: String, row: Map<String, Value> },
    Update { table: String, key: Value, row: Map<String, Value> },
    Delete { table: String, key: Value },
}

impl RowWrite {
    pub fn table(&self) -> &str {
        match self {
            RowWrite::Insert { table, .. }
            | RowWrite::Update { table, .. }
            | RowWrite::Delete { table, .. } => table,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Row in table '{table}' is missing key field '{key_field}'")]
    MissingKey { table: String, key_field: String },

    #[error("Duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("No row with key {key} in table '{table}'")]
    RowNotFound { table: String, key: String },

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

/// Per-unit-of-work view of the underlying persistence engine.
///
/// `commit` applies the whole batch atomically; partial application on error is
/// the store's own concern, not the lifecycle engine's.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, table: &str, key: &Value) -> Result<Option<Map<String, Value>>, StoreError>;

    async fn commit(&self, writes: Vec<RowWrite>) -> Result<(), StoreError>;
}

/// Staging buffer for the secondary save phase. Listeners append writes here
/// during after/fail hooks; the orchestrator flushes it with one commit after
/// the whole pending queue is drained.
#[derive(Debug, Default)]
pub struct SecondaryContext {
    staged: Mutex<Vec<RowWrite>>,
}

impl SecondaryContext {
    pub fn insert(&self, table: impl Into<String>, row: Map<String, Value>) {
        self.stage(RowWrite::Insert { table: table.into(), row });
    }

    pub fn update(&self, table: impl Into<String>, key: Value, row: Map<String, Value>) {
        self.stage(RowWrite::Update { table: table.into(), key, row });
    }

    pub fn delete(&self, table: impl Into<String>, key: Value) {
        self.stage(RowWrite::Delete { table: table.into(), key });
    }

    pub fn stage(&self, write: RowWrite) {
        self.lock().push(write);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn take_writes(&self) -> Vec<RowWrite> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RowWrite>> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared handle to the secondary context, rebound onto each change while the
/// pending queue drains. One secondary context per outer save cycle.
pub type SharedSecondary = Arc<SecondaryContext>;

/// Normalize a key value into a map token. Numeric keys are zero-padded so
/// ordered-map iteration stays in numeric order.
pub(crate) fn key_token(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => format!("{:020}", i),
            None => n.to_string(),
        },
        other => other.to_string(),
    }
}
