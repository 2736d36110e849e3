//! Bounded FIFO set of request ids this listener already dispatched.
//!
//! Only stops the poller from re-invoking the handler on every tick while a
//! request sits in the pending directory; exclusivity comes from the claims.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct ProcessedSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl ProcessedSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ProcessedSet {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Adds `id`, evicting the oldest entries beyond capacity. Returns the
    /// evicted ids.
    pub fn insert(&mut self, id: &str) -> Vec<String> {
        if !self.members.insert(id.to_string()) {
            return Vec::new();
        }
        self.order.push_back(id.to_string());

        let mut evicted = Vec::new();
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|entry| entry != id);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
