// Active flag for the `is_active` trait: new rows default to active, and a
// filter helper hides inactive rows from query results.

use serde_json::{json, Map, Value};

use crate::listener::{ChangeListener, ListenerTarget};
use crate::schema::TableBuilder;

pub const IS_ACTIVE: &str = "is_active";

pub fn is_active(record: &Map<String, Value>) -> bool {
    record.get(IS_ACTIVE) != Some(&json!(false))
}

/// Filter an iterator of rows down to the active ones
pub fn only_active<'a, I>(rows: I) -> impl Iterator<Item = &'a Map<String, Value>>
where
    I: Iterator<Item = &'a Map<String, Value>>,
{
    rows.filter(|row| is_active(row))
}

pub struct IsActiveListener;

impl ChangeListener for IsActiveListener {
    fn name(&self) -> &'static str {
        "IsActive"
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget::Trait(IS_ACTIVE.to_string())
    }

    fn on_model_building(&self, table: &mut TableBuilder) {
        table.default_value(IS_ACTIVE, json!(true));
    }
}
