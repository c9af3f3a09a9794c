// In-process reference store. Stands in for a real database behind the Store
// seam: explicit key-typed tables, atomic batch commit, injectable commit
// failure for exercising the failed-save phase.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::store::{key_token, RowWrite, Store, StoreError};

#[derive(Debug, Clone)]
struct TableState {
    key_field: String,
    /// Key values are generated on insert when true (monotonic i64 counter)
    auto_key: bool,
    next_auto: i64,
    rows: BTreeMap<String, Map<String, Value>>,
}

impl TableState {
    fn new(key_field: &str, auto_key: bool) -> Self {
        Self {
            key_field: key_field.to_string(),
            auto_key,
            next_auto: 1,
            rows: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, TableState>>,
    fail_next_commit: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table whose rows carry their own key values
    pub fn define_table(&self, table: impl Into<String>, key_field: &str) {
        self.lock_tables().insert(table.into(), TableState::new(key_field, false));
    }

    /// Declare a table with a store-generated auto-increment key
    pub fn define_auto_table(&self, table: impl Into<String>, key_field: &str) {
        self.lock_tables().insert(table.into(), TableState::new(key_field, true));
    }

    /// Declare every table the built schema describes
    pub fn apply_schema(&self, schema: &crate::schema::Schema) {
        for table in schema.tables() {
            if table.auto_increment_key() {
                self.define_auto_table(table.table_name(), table.key_field());
            } else {
                self.define_table(table.table_name(), table.key_field());
            }
        }
    }

    /// Make the next commit fail with the given message, then recover
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        *self.lock_failure() = Some(message.into());
    }

    /// All rows of a table in key order (test/inspection helper)
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.lock_tables()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, table: &str, key: &Value) -> Option<Map<String, Value>> {
        self.lock_tables().get(table).and_then(|t| t.rows.get(&key_token(key)).cloned())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock_tables().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TableState>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failure(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.fail_next_commit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, table: &str, key: &Value) -> Result<Option<Map<String, Value>>, StoreError> {
        let tables = self.lock_tables();
        let state = tables.get(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(state.rows.get(&key_token(key)).cloned())
    }

    async fn commit(&self, writes: Vec<RowWrite>) -> Result<(), StoreError> {
        if let Some(message) = self.lock_failure().take() {
            tracing::warn!("MemoryStore commit failing by injection: {}", message);
            return Err(StoreError::CommitFailed(message));
        }

        let mut tables = self.lock_tables();

        // Batch is atomic: apply against a copy, swap in on success
        let mut staged = tables.clone();
        for write in writes {
            apply_write(&mut staged, write)?;
        }
        *tables = staged;

        Ok(())
    }
}

fn apply_write(tables: &mut BTreeMap<String, TableState>, write: RowWrite) -> Result<(), StoreError> {
    let table_name = write.table().to_string();
    let state = tables
        .get_mut(&table_name)
        .ok_or_else(|| StoreError::UnknownTable(table_name.clone()))?;

    match write {
        RowWrite::Insert { mut row, .. } => {
            let missing_key = match row.get(state.key_field.as_str()) {
                None | Some(Value::Null) => true,
                Some(_) => false,
            };

            if missing_key {
                if !state.auto_key {
                    return Err(StoreError::MissingKey {
                        table: table_name,
                        key_field: state.key_field.clone(),
                    });
                }
                row.insert(state.key_field.clone(), Value::from(state.next_auto));
                state.next_auto += 1;
            }

            // serde_json::Value is infallible here; key presence checked above
            let key = row.get(state.key_field.as_str()).cloned().unwrap_or(Value::Null);
            let token = key_token(&key);
            if state.rows.contains_key(&token) {
                return Err(StoreError::DuplicateKey { table: table_name, key: token });
            }
            state.rows.insert(token, row);
        }
        RowWrite::Update { key, row, .. } => {
            let token = key_token(&key);
            if !state.rows.contains_key(&token) {
                return Err(StoreError::RowNotFound { table: table_name, key: token });
            }
            state.rows.insert(token, row);
        }
        RowWrite::Delete { key, .. } => {
            let token = key_token(&key);
            if state.rows.remove(&token).is_none() {
                return Err(StoreError::RowNotFound { table: table_name, key: token });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn insert_load_update_delete_roundtrip() {
        let store = MemoryStore::new();
        store.define_table("users", "id");

        store
            .commit(vec![RowWrite::Insert {
                table: "users".into(),
                row: row(&[("id", json!("u1")), ("name", json!("Alice"))]),
            }])
            .await
            .unwrap();

        let loaded = store.load("users", &json!("u1")).await.unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&json!("Alice")));

        store
            .commit(vec![RowWrite::Update {
                table: "users".into(),
                key: json!("u1"),
                row: row(&[("id", json!("u1")), ("name", json!("Alice B"))]),
            }])
            .await
            .unwrap();
        assert_eq!(store.get("users", &json!("u1")).unwrap().get("name"), Some(&json!("Alice B")));

        store
            .commit(vec![RowWrite::Delete { table: "users".into(), key: json!("u1") }])
            .await
            .unwrap();
        assert!(store.load("users", &json!("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_key_is_assigned_and_strictly_increasing() {
        let store = MemoryStore::new();
        store.define_auto_table("posts_Versions", "number");

        for _ in 0..3 {
            store
                .commit(vec![RowWrite::Insert {
                    table: "posts_Versions".into(),
                    row: row(&[("entity_id", json!("p1"))]),
                }])
                .await
                .unwrap();
        }

        let numbers: Vec<i64> =
            store.rows("posts_Versions").iter().map(|r| r["number"].as_i64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        store.define_table("users", "id");

        let result = store
            .commit(vec![
                RowWrite::Insert {
                    table: "users".into(),
                    row: row(&[("id", json!("u1"))]),
                },
                RowWrite::Update {
                    table: "users".into(),
                    key: json!("missing"),
                    row: row(&[("id", json!("missing"))]),
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::RowNotFound { .. })));
        assert_eq!(store.row_count("users"), 0);
    }

    #[tokio::test]
    async fn injected_failure_hits_once() {
        let store = MemoryStore::new();
        store.define_table("users", "id");
        store.fail_next_commit("disk full");

        let write = vec![RowWrite::Insert {
            table: "users".into(),
            row: row(&[("id", json!("u1"))]),
        }];
        assert!(matches!(store.commit(write.clone()).await, Err(StoreError::CommitFailed(_))));
        store.commit(write).await.unwrap();
        assert_eq!(store.row_count("users"), 1);
    }
}
