//! Gradient storage for the backward traversal

use crate::error::Result;
use crate::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Storage for first-order gradients computed during one backward pass
///
/// Gradients are stored by tensor ID and accumulated when a tensor receives
/// contributions from several consumers.
pub struct GradStore {
    grads: HashMap<TensorId, Tensor>,
}

impl GradStore {
    /// Create a new empty gradient store
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Get the gradient for a tensor
    pub fn get(&self, id: TensorId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    /// Insert a gradient (overwrites if exists)
    pub fn insert(&mut self, id: TensorId, grad: Tensor) {
        self.grads.insert(id, grad);
    }

    /// Remove and return a gradient
    pub fn remove(&mut self, id: TensorId) -> Option<Tensor> {
        self.grads.remove(&id)
    }

    /// Add a gradient contribution, accumulating with any existing one
    pub fn accumulate(&mut self, id: TensorId, grad: Tensor) -> Result<()> {
        use std::collections::hash_map::Entry;

        match self.grads.entry(id) {
            Entry::Occupied(entry) => {
                let existing = entry.remove();
                self.grads.insert(id, existing.add(&grad)?);
            }
            Entry::Vacant(entry) => {
                entry.insert(grad);
            }
        }
        Ok(())
    }

    /// Check if a gradient exists
    pub fn contains(&self, id: TensorId) -> bool {
        self.grads.contains_key(&id)
    }

    /// Number of stored gradients
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

impl Default for GradStore {
    fn default() -> Self {
        Self::new()
    }
}
