//! Storage for backpropagated quantities

use crate::tensor::TensorId;
use std::collections::HashMap;

/// Cache mapping a tensor identity to a backpropagated quantity
///
/// One store belongs to one running extension; the payload type `Q` is the
/// extension family's private contract with itself across modules. Entries
/// are consumed on retrieval by the protocol: at most one live entry per
/// key exists at any time, so stale data from a previous pass cannot leak
/// into a new one and graph-reuse bugs surface as absent quantities.
pub struct QuantityStore<Q> {
    entries: HashMap<TensorId, Q>,
}

impl<Q> QuantityStore<Q> {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert or overwrite the quantity for a key
    pub fn save(&mut self, key: TensorId, quantity: Q) {
        self.entries.insert(key, quantity);
    }

    /// Get the quantity for a key, or `None` if absent
    ///
    /// With `consume` (the protocol default) the entry is removed after
    /// being read. Callers must treat `None` as "absent", distinct from a
    /// present-but-empty payload.
    pub fn retrieve(&mut self, key: TensorId, consume: bool) -> Option<Q>
    where
        Q: Clone,
    {
        if consume {
            self.entries.remove(&key)
        } else {
            self.entries.get(&key).cloned()
        }
    }

    /// Check if a quantity exists for a key
    pub fn contains(&self, key: TensorId) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of stored quantities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<Q> Default for QuantityStore<Q> {
    fn default() -> Self {
        Self::new()
    }
}
