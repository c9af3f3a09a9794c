// Schema-build collaborator surface. Listeners contribute indexes, column
// defaults, transient fields and table naming here, once per entity type at
// engine construction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::model::EntityModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub field: String,
    pub unique: bool,
}

/// Mutable per-entity builder handed to `on_model_building`
#[derive(Debug)]
pub struct TableBuilder {
    model: Arc<EntityModel>,
    table_name: String,
    auto_increment_key: bool,
    indexes: Vec<IndexDef>,
    defaults: Map<String, Value>,
    transient: BTreeSet<String>,
}

impl TableBuilder {
    pub(crate) fn new(model: Arc<EntityModel>) -> Self {
        let table_name = model.table().to_string();
        Self {
            model,
            table_name,
            auto_increment_key: false,
            indexes: Vec::new(),
            defaults: Map::new(),
            transient: BTreeSet::new(),
        }
    }

    pub fn model(&self) -> &EntityModel {
        &self.model
    }

    /// Register a non-unique index on a column
    pub fn index(&mut self, field: impl Into<String>) -> &mut Self {
        self.push_index(field.into(), false);
        self
    }

    pub fn unique_index(&mut self, field: impl Into<String>) -> &mut Self {
        self.push_index(field.into(), true);
        self
    }

    /// Column default applied when an added row omits the field
    pub fn default_value(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.defaults.insert(field.into(), value);
        self
    }

    /// Mark a field transient: visible to listeners, never persisted
    pub fn ignore(&mut self, field: impl Into<String>) -> &mut Self {
        self.transient.insert(field.into());
        self
    }

    /// Key values are generated by the store on insert
    pub fn auto_increment_key(&mut self) -> &mut Self {
        self.auto_increment_key = true;
        self
    }

    pub fn rename_table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table_name = name.into();
        self
    }

    fn push_index(&mut self, field: String, unique: bool) {
        let def = IndexDef { field, unique };
        if !self.indexes.contains(&def) {
            self.indexes.push(def);
        }
    }

    fn freeze(self) -> TableSchema {
        TableSchema {
            entity_type: self.model.entity_type().to_string(),
            key_field: self.model.key_field().to_string(),
            table_name: self.table_name,
            auto_increment_key: self.auto_increment_key,
            indexes: self.indexes,
            defaults: self.defaults,
            transient: self.transient,
        }
    }
}

/// Frozen physical description of one entity type's table
#[derive(Debug, Clone)]
pub struct TableSchema {
    entity_type: String,
    table_name: String,
    key_field: String,
    auto_increment_key: bool,
    indexes: Vec<IndexDef>,
    defaults: Map<String, Value>,
    transient: BTreeSet<String>,
}

impl TableSchema {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn auto_increment_key(&self) -> bool {
        self.auto_increment_key
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn default_for(&self, field: &str) -> Option<&Value> {
        self.defaults.get(field)
    }

    pub fn is_transient(&self, field: &str) -> bool {
        self.transient.contains(field)
    }

    /// Fill schema defaults into an added row and strip transient fields.
    /// Returns the row as it will be physically written.
    pub fn to_persisted_row(&self, record: &Map<String, Value>, apply_defaults: bool) -> Map<String, Value> {
        let mut row: Map<String, Value> = record
            .iter()
            .filter(|(field, _)| !self.is_transient(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();

        if apply_defaults {
            for (field, value) in &self.defaults {
                match row.get(field.as_str()) {
                    None | Some(Value::Null) => {
                        row.insert(field.clone(), value.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        row
    }
}

/// The full built schema: one table per exposed entity type
#[derive(Debug, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
    by_table: HashMap<String, String>,
}

impl Schema {
    pub(crate) fn insert(&mut self, table: TableSchema) {
        self.by_table.insert(table.table_name.clone(), table.entity_type.clone());
        self.tables.insert(table.entity_type.clone(), table);
    }

    pub fn table_for(&self, entity_type: &str) -> Option<&TableSchema> {
        self.tables.get(entity_type)
    }

    pub fn entity_for_table(&self, table_name: &str) -> Option<&str> {
        self.by_table.get(table_name).map(|s| s.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

pub(crate) fn freeze(builder: TableBuilder) -> TableSchema {
    builder.freeze()
}
