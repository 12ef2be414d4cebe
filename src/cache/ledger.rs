//! Seen-Id Ledger Module
//!
//! Bounded, insertion-ordered record of notification ids already surfaced.

use std::collections::{HashSet, VecDeque};

// == Seen Ledger ==
/// Remembers the most recent `capacity` ids.
///
/// Ids are stored in a VecDeque where:
/// - Front = Oldest recorded
/// - Back = Most recently recorded
#[derive(Debug, Clone, Default)]
pub struct SeenLedger {
    /// Ids by recording order
    order: VecDeque<String>,
    /// Membership index over `order`
    index: HashSet<String>,
    /// Maximum ids retained
    capacity: usize,
}

impl SeenLedger {
    // == Constructor ==
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            index: HashSet::new(),
            capacity,
        }
    }

    /// Rebuilds a ledger from persisted ids, oldest first.
    pub fn from_ids(ids: impl IntoIterator<Item = String>, capacity: usize) -> Self {
        let mut ledger = Self::new(capacity);
        for id in ids {
            ledger.record(id);
        }
        ledger
    }

    // == Record ==
    /// Records `id`, evicting the oldest ids past capacity.
    ///
    /// Returns false if the id was already recorded.
    pub fn record(&mut self, id: String) -> bool {
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.index.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Ids oldest first, the persisted layout.
    pub fn ids(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
