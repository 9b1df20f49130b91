//! Least-used-first provider selection for a single service name.
//!
//! A [`ProviderHeap`] holds every provider currently registered for one
//! service and always offers the one with the fewest prior selections,
//! approximating even load distribution across providers ("soft round
//! robin" with persistent counters). Selection is stateful: every call to
//! [`ProviderHeap::select_next`] increments the chosen provider's use count.
//!
//! The heap is an indexed binary min-heap: a position map from identity key
//! to heap slot supports true O(log n) removal of arbitrary providers, so
//! unregistering a provider that has been selected before drops it cleanly
//! with no residual entries.

use std::collections::HashMap;

/// One provider registered for a service.
///
/// Identity key is `(caller_id, address)`; two records with the same key are
/// the same provider and never coexist in one heap.
#[derive(Debug, Clone)]
struct ProviderRecord {
    caller_id: String,
    address: String,
    use_count: u64,
    /// Insertion sequence, the deterministic tie-break between equal counts.
    seq: u64,
}

impl ProviderRecord {
    fn rank(&self) -> (u64, u64) {
        (self.use_count, self.seq)
    }

    fn matches(&self, caller_id: &str, address: &str) -> bool {
        self.caller_id == caller_id && self.address == address
    }

    fn key(&self) -> (String, String) {
        (self.caller_id.clone(), self.address.clone())
    }
}

/// Mutable set of providers for one service, ordered by use count.
#[derive(Debug, Default)]
pub struct ProviderHeap {
    records: Vec<ProviderRecord>,
    /// Identity key -> current slot in `records`.
    positions: HashMap<(String, String), usize>,
    next_seq: u64,
}

impl ProviderHeap {
    /// Creates an empty heap. An empty heap is a valid state: the service
    /// currently has zero local providers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider with a use count of zero.
    ///
    /// No-op if the identity key is already present; duplicates are never
    /// stored.
    pub fn insert(&mut self, caller_id: &str, address: &str) {
        let key = (caller_id.to_owned(), address.to_owned());
        if self.positions.contains_key(&key) {
            return;
        }

        let record = ProviderRecord {
            caller_id: caller_id.to_owned(),
            address: address.to_owned(),
            use_count: 0,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let slot = self.records.len();
        self.records.push(record);
        self.positions.insert(key, slot);
        self.sift_up(slot);
    }

    /// Exact identity-key membership test.
    #[must_use]
    pub fn has(&self, caller_id: &str, address: &str) -> bool {
        self.positions
            .contains_key(&(caller_id.to_owned(), address.to_owned()))
    }

    /// Removes the provider with the given identity key.
    ///
    /// Returns true if a provider was removed, false if it was absent.
    pub fn remove(&mut self, caller_id: &str, address: &str) -> bool {
        let key = (caller_id.to_owned(), address.to_owned());
        let Some(slot) = self.positions.remove(&key) else {
            return false;
        };

        let last = self.records.len() - 1;
        if slot != last {
            self.records.swap(slot, last);
            self.positions.insert(self.records[slot].key(), slot);
        }
        self.records.pop();

        // The element moved into the vacated slot may violate the heap
        // property in either direction.
        if slot < self.records.len() {
            self.sift_down(slot);
            self.sift_up(slot);
        }

        true
    }

    /// Picks the least-used provider, increments its use count by one, and
    /// returns its identity as `(caller_id, address)`.
    ///
    /// Returns `None` when the heap has no records. Ties between equal use
    /// counts break by insertion order.
    pub fn select_next(&mut self) -> Option<(String, String)> {
        let root = self.records.first_mut()?;
        root.use_count += 1;
        let selected = (root.caller_id.clone(), root.address.clone());
        self.sift_down(0);
        Some(selected)
    }

    /// Current use count of a provider, if registered.
    #[must_use]
    pub fn use_count(&self, caller_id: &str, address: &str) -> Option<u64> {
        let slot = *self
            .positions
            .get(&(caller_id.to_owned(), address.to_owned()))?;
        debug_assert!(self.records[slot].matches(caller_id, address));
        Some(self.records[slot].use_count)
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the service has zero providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.records.swap(a, b);
        self.positions.insert(self.records[a].key(), a);
        self.positions.insert(self.records[b].key(), b);
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.records[slot].rank() < self.records[parent].rank() {
                self.swap_slots(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            let right = 2 * slot + 2;
            let mut smallest = slot;

            if left < self.records.len()
                && self.records[left].rank() < self.records[smallest].rank()
            {
                smallest = left;
            }
            if right < self.records.len()
                && self.records[right].rank() < self.records[smallest].rank()
            {
                smallest = right;
            }

            if smallest == slot {
                break;
            }
            self.swap_slots(slot, smallest);
            slot = smallest;
        }
    }
}
