//! Fully-connected layer

use super::{Args, Module, Param, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// Affine transformation `y = x W^T + b`
///
/// Weight has shape `[out_features, in_features]`, bias `[out_features]`.
pub struct Linear {
    weight: Param,
    bias: Option<Param>,
    pass: Option<PassState>,
}

impl Linear {
    /// Create a layer with uniform random initialization
    pub fn new(in_features: usize, out_features: usize) -> Self {
        let k = 1.0 / (in_features as f64).sqrt();
        let weight = Tensor::rand_uniform(&[out_features, in_features], -k, k);
        let bias = Tensor::rand_uniform(&[out_features], -k, k);
        Self {
            weight: Param::new(weight),
            bias: Some(Param::new(bias)),
            pass: None,
        }
    }

    /// Create a layer from explicit weight and bias tensors
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weight.ndim() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![2],
                got: vec![weight.ndim()],
            });
        }
        if let Some(b) = &bias {
            if b.shape() != [weight.shape()[0]] {
                return Err(Error::ShapeMismatch {
                    expected: vec![weight.shape()[0]],
                    got: b.shape().to_vec(),
                });
            }
        }
        Ok(Self {
            weight: Param::new(weight),
            bias: bias.map(Param::new),
            pass: None,
        })
    }

    /// The weight parameter
    pub fn weight(&self) -> &Param {
        &self.weight
    }

    /// The weight parameter, mutably
    pub fn weight_mut(&mut self) -> &mut Param {
        &mut self.weight
    }

    /// The bias parameter, if present
    pub fn bias(&self) -> Option<&Param> {
        self.bias.as_ref()
    }

    /// The bias parameter mutably, if present
    pub fn bias_mut(&mut self) -> Option<&mut Param> {
        self.bias.as_mut()
    }
}

impl Module for Linear {
    fn kind(&self) -> &'static str {
        "Linear"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        let mut out = x.matmul(&self.weight.value().transpose()?)?;
        if let Some(bias) = &self.bias {
            out = out.add_row(bias.value())?;
        }
        self.pass = Some(PassState::simple(x, out.clone()));
        Ok(Args::Single(out))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["weight", "bias"]
    }

    fn param(&self, name: &str) -> Option<&Param> {
        match name {
            "weight" => Some(&self.weight),
            "bias" => self.bias.as_ref(),
            _ => None,
        }
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Param> {
        match name {
            "weight" => Some(&mut self.weight),
            "bias" => self.bias.as_mut(),
            _ => None,
        }
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "Linear has one output, got {} matrices",
                mats.len()
            )));
        };
        Ok(vec![mat.matmul(self.weight.value())?])
    }

    fn param_jac_t_mat_prod(&self, name: &str, mat: &Tensor) -> Result<Tensor> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: self.kind(),
        })?;
        match name {
            "weight" => mat.transpose()?.matmul(&pass.inputs[0]),
            "bias" => mat.column_sums(),
            _ => Err(Error::Unsupported {
                op: "param_jac_t_mat_prod",
                module: self.kind(),
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
