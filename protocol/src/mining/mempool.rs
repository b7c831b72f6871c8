//! # Work Mempool
//!
//! Thread-safe FIFO of work items awaiting block inclusion, deduplicated
//! by item id. `take` is a peek; items leave the pool only through
//! `remove`, which the miner calls after a block containing them is
//! emitted. A crash between template construction and block emission
//! therefore loses nothing.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use super::work::WorkItem;

/// A deduplicated FIFO work pool. Share as `Arc<Mempool>`.
#[derive(Debug, Default)]
pub struct Mempool {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Items in submission order.
    queue: VecDeque<WorkItem>,
    /// Resident ids, mirroring `queue`.
    ids: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a work item. An item whose id is already resident is
    /// dropped silently; returns whether the item was accepted.
    pub fn add(&self, item: WorkItem) -> bool {
        let mut inner = self.inner.lock();
        if inner.ids.contains(&item.id) {
            return false;
        }
        inner.ids.insert(item.id.clone());
        inner.queue.push_back(item);
        true
    }

    /// The first `n` items in submission order, without removing them.
    pub fn take(&self, n: usize) -> Vec<WorkItem> {
        let inner = self.inner.lock();
        inner.queue.iter().take(n).cloned().collect()
    }

    /// Delete the items with the given ids. Unknown ids are ignored.
    pub fn remove(&self, ids_to_remove: &[String]) {
        let mut inner = self.inner.lock();
        let Inner { queue, ids } = &mut *inner;
        for id in ids_to_remove {
            ids.remove(id);
        }
        queue.retain(|item| ids.contains(&item.id));
    }

    /// Number of resident items.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Whether an item with this id is resident.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::work::WorkKind;
    use serde_json::json;
    use std::sync::Arc;

    fn item(id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            kind: WorkKind::Validation,
            data: json!({}),
            timestamp: 1_000,
        }
    }

    #[test]
    fn add_dedups_by_id() {
        let pool = Mempool::new();
        assert!(pool.add(item("a")));
        assert!(!pool.add(item("a")), "same id is dropped silently");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn take_preserves_fifo_order_without_removing() {
        let pool = Mempool::new();
        for id in ["first", "second", "third"] {
            pool.add(item(id));
        }

        let batch = pool.take(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "first");
        assert_eq!(batch[1].id, "second");
        assert_eq!(pool.len(), 3, "take is a peek");

        // A second take sees the same items.
        let again = pool.take(2);
        assert_eq!(again[0].id, "first");
    }

    #[test]
    fn take_more_than_resident_returns_all() {
        let pool = Mempool::new();
        pool.add(item("only"));
        assert_eq!(pool.take(100).len(), 1);
    }

    #[test]
    fn remove_deletes_and_allows_resubmission() {
        let pool = Mempool::new();
        for id in ["a", "b", "c"] {
            pool.add(item(id));
        }
        pool.remove(&["a".to_string(), "c".to_string(), "ghost".to_string()]);

        assert_eq!(pool.len(), 1);
        assert!(pool.contains("b"));
        assert!(!pool.contains("a"));

        // Removed ids can be submitted again (a fresh unit of work).
        assert!(pool.add(item("a")));
        assert_eq!(pool.take(10).last().unwrap().id, "a");
    }

    #[test]
    fn concurrent_adds_keep_ids_unique() {
        let pool = Arc::new(Mempool::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    // Half the ids collide across threads on purpose.
                    pool.add(item(&format!("shared-{}", i)));
                    pool.add(item(&format!("t{}-{}", t, i)));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.len(), 100 + 4 * 100);
    }
}
