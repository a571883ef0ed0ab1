//! Helpers for sites that poll an HTTP endpoint for recent comments.

use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::FxHashSet;

/// Default pause between polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Remembers the most recent `capacity` ids so overlapping poll responses
/// emit each comment once.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: FxHashSet<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            seen: FxHashSet::default(),
        }
    }

    /// Record `id`, returning `false` if it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_ids_evicts_oldest() {
        let mut ids = RecentIds::new(2);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        assert!(ids.insert("a"));
        assert!(!ids.insert("c"));
    }
}
