//! Shape-flattening node

use super::{Args, Module, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// Flatten all dimensions after the batch dimension
///
/// `[N, d1, d2, ...] -> [N, d1 * d2 * ...]`. A regular graph node: the
/// backward traversal fires its hook like any other module, including when
/// the reshape is a no-op.
pub struct Flatten {
    pass: Option<PassState>,
}

impl Flatten {
    /// Create the flatten node
    pub fn new() -> Self {
        Self { pass: None }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Flatten {
    fn kind(&self) -> &'static str {
        "Flatten"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        if x.ndim() < 1 {
            return Err(Error::ShapeMismatch {
                expected: vec![1],
                got: x.shape().to_vec(),
            });
        }
        let batch = x.shape()[0];
        let rest: usize = x.shape()[1..].iter().product();
        let out = x.reshape(&[batch, rest])?;
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
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: self.kind(),
        })?;
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "Flatten has one output, got {} matrices",
                mats.len()
            )));
        };
        Ok(vec![mat.reshape(pass.inputs[0].shape())?])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
