//! Loss modules

use super::{Args, Module, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// How a loss aggregates per-element terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Average over all elements
    Mean,
    /// Plain sum
    Sum,
}

/// Mean squared error loss, the terminal node of a backward traversal
///
/// The target tensor is a constant, not part of the graph; set it before
/// calling `forward`. As a designated loss node, its extension hook
/// tolerates an absent incoming quantity and instead seeds the propagation
/// with the factorized square root of the loss Hessian.
pub struct MseLoss {
    reduction: Reduction,
    target: Option<Tensor>,
    pass: Option<PassState>,
}

impl MseLoss {
    /// Create an MSE loss with the given reduction
    pub fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            target: None,
            pass: None,
        }
    }

    /// Set the regression target
    pub fn set_target(&mut self, target: Tensor) {
        self.target = Some(target);
    }

    fn normalization(&self, numel: usize) -> f64 {
        match self.reduction {
            Reduction::Mean => 1.0 / numel as f64,
            Reduction::Sum => 1.0,
        }
    }

    /// Square root of the loss Hessian w.r.t. the recorded input
    ///
    /// Returns one `[N, D]` factor per output coordinate; summing the
    /// per-row outer products over all factors recovers the (block
    /// diagonal, here constant) Hessian. This seeds every second-order
    /// propagation.
    pub fn sqrt_hessian(&self) -> Result<Vec<Tensor>> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: self.kind(),
        })?;
        let x = &pass.inputs[0];
        let (n, d) = (x.shape()[0], x.shape()[1]);
        let entry = (2.0 * self.normalization(x.numel())).sqrt();
        let mut factors = Vec::with_capacity(d);
        for v in 0..d {
            let mut data = vec![0.0; n * d];
            for row in 0..n {
                data[row * d + v] = entry;
            }
            factors.push(Tensor::from_slice(&data, &[n, d])?);
        }
        Ok(factors)
    }
}

impl Module for MseLoss {
    fn kind(&self) -> &'static str {
        "MseLoss"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        if x.ndim() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![2],
                got: vec![x.ndim()],
            });
        }
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| Error::Internal("MseLoss target not set".into()))?;
        let diff = x.sub(target)?;
        let value = diff.pow2().sum() * self.normalization(x.numel());
        let out = Tensor::from_slice(&[value], &[1])?.with_requires_grad(x.requires_grad());
        self.pass = Some(PassState::simple(x, out.clone()));
        Ok(Args::Single(out))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn is_loss(&self) -> bool {
        true
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: self.kind(),
        })?;
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "MseLoss has one output, got {} matrices",
                mats.len()
            )));
        };
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| Error::Internal("MseLoss target not set".into()))?;
        let x = &pass.inputs[0];
        let g = mat.data()[0];
        let grad = x
            .sub(target)?
            .scale(2.0 * self.normalization(x.numel()) * g);
        Ok(vec![grad])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
