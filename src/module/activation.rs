//! Elementwise activation modules

use super::{Args, Module, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;
use std::marker::PhantomData;

/// An elementwise scalar function with first and second derivatives
pub trait Elementwise: 'static {
    /// Module kind name of the activation built on this function
    const KIND: &'static str;

    /// The function value
    fn apply(x: f64) -> f64;

    /// First derivative
    fn first(x: f64) -> f64;

    /// Second derivative, used for Hessian residual terms
    fn second(x: f64) -> f64;
}

/// Hyperbolic tangent
pub struct TanhFn;

impl Elementwise for TanhFn {
    const KIND: &'static str = "Tanh";

    fn apply(x: f64) -> f64 {
        x.tanh()
    }

    fn first(x: f64) -> f64 {
        1.0 - x.tanh() * x.tanh()
    }

    fn second(x: f64) -> f64 {
        let t = x.tanh();
        -2.0 * t * (1.0 - t * t)
    }
}

/// Logistic sigmoid
pub struct SigmoidFn;

impl Elementwise for SigmoidFn {
    const KIND: &'static str = "Sigmoid";

    fn apply(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    fn first(x: f64) -> f64 {
        let s = Self::apply(x);
        s * (1.0 - s)
    }

    fn second(x: f64) -> f64 {
        let s = Self::apply(x);
        s * (1.0 - s) * (1.0 - 2.0 * s)
    }
}

/// Rectified linear unit
///
/// Piecewise linear: the second derivative is zero everywhere it exists, so
/// diagonal Hessian and diagonal GGN coincide for ReLU networks.
pub struct ReluFn;

impl Elementwise for ReluFn {
    const KIND: &'static str = "ReLU";

    fn apply(x: f64) -> f64 {
        x.max(0.0)
    }

    fn first(x: f64) -> f64 {
        if x > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn second(_x: f64) -> f64 {
        0.0
    }
}

/// Elementwise activation module over a scalar function `E`
pub struct Activation<E: Elementwise> {
    pass: Option<PassState>,
    _marker: PhantomData<E>,
}

/// Hyperbolic tangent activation
pub type Tanh = Activation<TanhFn>;
/// Logistic sigmoid activation
pub type Sigmoid = Activation<SigmoidFn>;
/// Rectified linear activation
pub type ReLU = Activation<ReluFn>;

impl<E: Elementwise> Activation<E> {
    /// Create the activation module
    pub fn new() -> Self {
        Self {
            pass: None,
            _marker: PhantomData,
        }
    }

    /// First derivative evaluated at the recorded pre-activation input
    pub fn first_derivative(&self) -> Result<Tensor> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: E::KIND,
        })?;
        Ok(pass.inputs[0].map(E::first))
    }

    /// Second derivative evaluated at the recorded pre-activation input
    pub fn second_derivative(&self) -> Result<Tensor> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: E::KIND,
        })?;
        Ok(pass.inputs[0].map(E::second))
    }
}

impl<E: Elementwise> Default for Activation<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Elementwise> Module for Activation<E> {
    fn kind(&self) -> &'static str {
        E::KIND
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        let out = x.map(E::apply);
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
                "{} has one output, got {} matrices",
                E::KIND,
                mats.len()
            )));
        };
        let d1 = self.first_derivative()?;
        Ok(vec![mat.mul(&d1)?])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
