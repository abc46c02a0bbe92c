//! GGN/Fisher matrix square root per parameter

use super::{factor_backprop, register_ggn_transport, SqrtFactors};
use crate::backprop::{Backpropagation, ExtensionCtx, ModuleExtension, ParamFn};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Extension family storing the factorized GGN instead of its diagonal
///
/// For a parameter `p` with `P` elements the savefield `sqrt_ggn` receives
/// a `[V * N, P]` matrix `S_p` with `S_p^T S_p` the parameter's GGN block;
/// its column-wise squared sums are exactly `diag_ggn`. Propagating the
/// square root keeps the per-module cost linear in the factor count.
pub struct SqrtGgn {
    driver: Backpropagation<SqrtFactors>,
}

impl SqrtGgn {
    /// Savefield name under which results are stored
    pub const SAVEFIELD: &'static str = "sqrt_ggn";

    /// Build the family with its full module-kind table
    pub fn new() -> Result<Self> {
        let mut driver = Backpropagation::new("SqrtGGN", Self::SAVEFIELD, true);

        let mut functions: HashMap<&'static str, ParamFn<SqrtFactors>> = HashMap::new();
        functions.insert("weight", weight);
        functions.insert("bias", bias);
        driver.register(
            "Linear",
            ModuleExtension::new(
                "SqrtGGN",
                &["weight", "bias"],
                functions,
                Some(factor_backprop),
            )?,
        );
        register_ggn_transport(&mut driver);

        Ok(Self { driver })
    }

    /// Run a backward pass, filling `sqrt_ggn` savefields and gradients
    pub fn backward(
        &mut self,
        loss: &mut dyn Module,
        model: &mut dyn Module,
        retain_graph: bool,
    ) -> Result<()> {
        self.driver.backward(loss, model, retain_graph)
    }
}

fn fetch<'q>(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    quantity: Option<&'q SqrtFactors>,
) -> Result<&'q SqrtFactors> {
    quantity.ok_or(Error::MissingBackpropQuantity {
        module: module.kind(),
        extension: ctx.extension,
    })
}

fn weight(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&SqrtFactors>,
) -> Result<Tensor> {
    let factors = fetch(ctx, module, quantity)?;
    let pass = module.pass().ok_or(Error::NoForwardPass {
        module: module.kind(),
    })?;
    let x = &pass.inputs[0];
    let (n, d_in) = (x.shape()[0], x.shape()[1]);
    let d_out = factors[0].shape()[1];

    // row (v * N + n) is the flattened outer product S_v[n, :] x[n, :]^T
    let mut data = vec![0.0; factors.len() * n * d_out * d_in];
    for (v, s) in factors.iter().enumerate() {
        for row in 0..n {
            let base = (v * n + row) * d_out * d_in;
            for o in 0..d_out {
                let s_entry = s.data()[row * d_out + o];
                for i in 0..d_in {
                    data[base + o * d_in + i] = s_entry * x.data()[row * d_in + i];
                }
            }
        }
    }
    Tensor::from_slice(&data, &[factors.len() * n, d_out * d_in])
}

fn bias(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&SqrtFactors>,
) -> Result<Tensor> {
    let factors = fetch(ctx, module, quantity)?;
    let (n, d_out) = (factors[0].shape()[0], factors[0].shape()[1]);

    let mut data = Vec::with_capacity(factors.len() * n * d_out);
    for s in factors {
        data.extend_from_slice(s.data());
    }
    Tensor::from_slice(&data, &[factors.len() * n, d_out])
}
