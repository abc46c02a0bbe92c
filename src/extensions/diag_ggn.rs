//! Exact diagonal of the generalized Gauss-Newton matrix

use super::{
    factor_backprop, linear_bias_diag, linear_weight_diag, register_ggn_transport, SqrtFactors,
};
use crate::backprop::{Backpropagation, ExtensionCtx, ModuleExtension, ParamFn};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Extension family computing the exact GGN diagonal per parameter
///
/// Propagates the GGN square root backward and stores
/// `diag(J_p^T H J_p)` under the `diag_ggn` savefield of every trainable
/// parameter. Supports branched (fan-out/fan-in) graphs.
pub struct DiagGgn {
    driver: Backpropagation<SqrtFactors>,
}

impl DiagGgn {
    /// Savefield name under which results are stored
    pub const SAVEFIELD: &'static str = "diag_ggn";

    /// Build the family with its full module-kind table
    pub fn new() -> Result<Self> {
        let mut driver = Backpropagation::new("DiagGGN", Self::SAVEFIELD, true);

        let mut functions: HashMap<&'static str, ParamFn<SqrtFactors>> = HashMap::new();
        functions.insert("weight", weight);
        functions.insert("bias", bias);
        driver.register(
            "Linear",
            ModuleExtension::new(
                "DiagGGN",
                &["weight", "bias"],
                functions,
                Some(factor_backprop),
            )?,
        );
        register_ggn_transport(&mut driver);

        Ok(Self { driver })
    }

    /// Run a backward pass, filling `diag_ggn` savefields and gradients
    pub fn backward(
        &mut self,
        loss: &mut dyn Module,
        model: &mut dyn Module,
        retain_graph: bool,
    ) -> Result<()> {
        self.driver.backward(loss, model, retain_graph)
    }
}

fn weight(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&SqrtFactors>,
) -> Result<Tensor> {
    let factors = quantity.ok_or(Error::MissingBackpropQuantity {
        module: module.kind(),
        extension: ctx.extension,
    })?;
    linear_weight_diag(module, factors.iter().map(|s| (s, 1.0)))
}

fn bias(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&SqrtFactors>,
) -> Result<Tensor> {
    let factors = quantity.ok_or(Error::MissingBackpropQuantity {
        module: module.kind(),
        extension: ctx.extension,
    })?;
    linear_bias_diag(factors.iter().map(|s| (s, 1.0)))
}
