//! Sequential container

use super::{Args, Module};
use crate::error::Result;
use std::any::Any;

/// Runs child modules one after another
///
/// A transparent container: it records no pass state of its own and fires
/// no hook; the backward traversal visits its children in reverse order.
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    /// Create a container from an ordered list of modules
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Self { layers }
    }

    /// Append a module
    pub fn push(&mut self, module: Box<dyn Module>) {
        self.layers.push(module);
    }

    /// Number of child modules
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the container is empty
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Access a child by position
    pub fn get(&self, index: usize) -> Option<&dyn Module> {
        self.layers.get(index).map(|m| m.as_ref())
    }

    /// Access a child by position, mutably
    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Module + 'static)> {
        self.layers.get_mut(index).map(|m| m.as_mut())
    }
}

impl Module for Sequential {
    fn kind(&self) -> &'static str {
        "Sequential"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let mut current = input;
        for layer in &mut self.layers {
            current = layer.forward(current)?;
        }
        Ok(current)
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.layers.iter().map(|m| m.as_ref() as &dyn Module).collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        self.layers
            .iter_mut()
            .map(|m| m.as_mut() as &mut dyn Module)
            .collect()
    }

    fn has_hook(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
