// Pending-writes queue shared between the Saving phase and the secondary
// phase. Internally synchronized because the triggering events may originate
// from independent unit-of-work instances sharing a process-wide listener
// list.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::change::EntityChange;

#[derive(Clone, Default)]
pub struct PendingWrites {
    inner: Arc<Mutex<VecDeque<EntityChange>>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, change: EntityChange) {
        self.lock().push_back(change);
    }

    /// FIFO dequeue; entries are cleared as they are drained
    pub fn dequeue(&self) -> Option<EntityChange> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<EntityChange>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityModel, EntityState};
    use serde_json::Map;
    use std::sync::Arc as StdArc;

    fn change(n: i64) -> EntityChange {
        let mut entity = Map::new();
        entity.insert("id".to_string(), serde_json::json!(n));
        EntityChange::new(
            StdArc::new(EntityModel::new("post", "posts", "id")),
            EntityState::Added,
            entity,
            Map::new(),
        )
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = PendingWrites::new();
        for n in 0..3 {
            queue.enqueue(change(n));
        }
        assert_eq!(queue.len(), 3);

        let drained: Vec<i64> = std::iter::from_fn(|| queue.dequeue())
            .map(|c| c.entity()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_enqueue_is_safe() {
        let queue = PendingWrites::new();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        queue.enqueue(change(n * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
    }
}
