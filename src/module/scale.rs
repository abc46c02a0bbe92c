//! Scaling and identity nodes

use super::{Args, Module, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// Multiplication by a fixed scalar
///
/// The factor is a plain number, not a tracked parameter.
pub struct Scale {
    factor: f64,
    pass: Option<PassState>,
}

impl Scale {
    /// Create a scaling node with the given factor
    pub fn new(factor: f64) -> Self {
        Self { factor, pass: None }
    }

    /// The scaling factor
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Module for Scale {
    fn kind(&self) -> &'static str {
        "Scale"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        let out = x.scale(self.factor);
        self.pass = Some(PassState::simple(x, out.clone()));
        Ok(Args::Single(out))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "Scale has one output, got {} matrices",
                mats.len()
            )));
        };
        Ok(vec![mat.scale(self.factor)])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Identity function realized as a distinct graph node
///
/// Semantically a no-op with a forced unit scaling factor. It exists so that
/// traversals observing node boundaries can still intercept the identity:
/// an identity performed inline (bare pass-through of a tensor) never
/// becomes an addressable node and is invisible to the backward walk.
pub struct ActiveIdentity {
    pass: Option<PassState>,
}

impl ActiveIdentity {
    /// Create the identity node
    pub fn new() -> Self {
        Self { pass: None }
    }
}

impl Default for ActiveIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ActiveIdentity {
    fn kind(&self) -> &'static str {
        "ActiveIdentity"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        // unit scale, but a fresh node in the graph
        let out = x.scale(1.0);
        self.pass = Some(PassState::simple(x, out.clone()));
        Ok(Args::Single(out))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "ActiveIdentity has one output, got {} matrices",
                mats.len()
            )));
        };
        Ok(vec![mat.clone()])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
