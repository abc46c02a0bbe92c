//! Module parameters and their savefield slots

use crate::error::Result;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// A named, trainable tensor owned by a module
///
/// Besides the value and its accumulated first-order gradient, a parameter
/// carries one savefield slot per extension: the destination under which an
/// extension stores its per-parameter result (e.g. `diag_ggn`). Savefields
/// are overwritten on every run, gradients accumulate until cleared.
pub struct Param {
    value: Tensor,
    trainable: bool,
    grad: Option<Tensor>,
    saved: HashMap<&'static str, Tensor>,
}

impl Param {
    /// Create a trainable parameter from a value tensor
    pub fn new(value: Tensor) -> Self {
        Self {
            value: value.with_requires_grad(true),
            trainable: true,
            grad: None,
            saved: HashMap::new(),
        }
    }

    /// Get the value tensor
    #[inline]
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Replace the value tensor
    pub fn set_value(&mut self, value: Tensor) {
        self.value = value.with_requires_grad(self.trainable);
    }

    /// Whether this parameter participates in differentiation
    #[inline]
    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Mark this parameter as trainable or frozen
    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
        self.value.set_requires_grad(trainable);
    }

    /// Get the accumulated gradient, if any backward pass has run
    #[inline]
    pub fn grad(&self) -> Option<&Tensor> {
        self.grad.as_ref()
    }

    /// Add a gradient contribution, accumulating over backward passes
    pub fn accumulate_grad(&mut self, grad: Tensor) -> Result<()> {
        self.grad = match self.grad.take() {
            Some(existing) => Some(existing.add(&grad)?),
            None => Some(grad),
        };
        Ok(())
    }

    /// Drop the accumulated gradient
    pub fn clear_grad(&mut self) {
        self.grad = None;
    }

    /// Store an extension result under a savefield name, overwriting
    pub fn save(&mut self, savefield: &'static str, value: Tensor) {
        self.saved.insert(savefield, value);
    }

    /// Read back an extension result by savefield name
    pub fn saved(&self, savefield: &str) -> Option<&Tensor> {
        self.saved.get(savefield)
    }
}
