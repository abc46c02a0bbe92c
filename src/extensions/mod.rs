//! Concrete second-order extension families
//!
//! Every family here is an ordinary consumer of the module extension
//! protocol: a [`Backpropagation`] driver with one [`ModuleExtension`] per
//! module kind. The GGN-based families propagate the same quantity — a
//! list of square-root factor matrices — and differ only in what they
//! contract it into per parameter.

mod diag_ggn;
mod diag_hessian;
mod sqrt_ggn;

pub use diag_ggn::DiagGgn;
pub use diag_hessian::{DiagHessian, HessFactors};
pub use sqrt_ggn::SqrtGgn;

use crate::backprop::{Backpropagation, ExtensionCtx, ModuleExtension};
use crate::error::{Error, Result};
use crate::module::{Module, MseLoss};
use crate::tensor::Tensor;

/// Square root of a backpropagated curvature matrix
///
/// One `[N, D]` matrix per factor column; row `n` of factor `v` is one
/// rank-one contribution to the per-sample curvature. Linear maps act on
/// each factor independently, which is what lets a single transposed-
/// Jacobian rule carry the whole bundle.
pub type SqrtFactors = Vec<Tensor>;

/// Push a factor bundle through a module's transposed Jacobian
///
/// The shared backpropagation rule of all GGN square-root families: one
/// fetched bundle per module output, one produced bundle per module input.
/// Factor counts must agree across outputs (they all stem from the same
/// loss factorization).
pub(crate) fn factor_backprop(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    fetched: Vec<Option<SqrtFactors>>,
) -> Result<Vec<SqrtFactors>> {
    let n_inputs = module
        .pass()
        .ok_or(Error::NoForwardPass {
            module: module.kind(),
        })?
        .inputs
        .len();

    let outputs: Vec<&SqrtFactors> = fetched
        .iter()
        .map(|slot| {
            slot.as_ref().ok_or(Error::MissingBackpropQuantity {
                module: module.kind(),
                extension: ctx.extension,
            })
        })
        .collect::<Result<_>>()?;
    let v = outputs[0].len();
    if outputs.iter().any(|f| f.len() != v) {
        return Err(Error::Internal(format!(
            "misaligned factor counts at '{}'",
            module.kind()
        )));
    }

    let mut produced: Vec<SqrtFactors> = vec![Vec::new(); n_inputs];
    for i in 0..v {
        let mats: Vec<Tensor> = outputs.iter().map(|f| f[i].clone()).collect();
        let ins = module.jac_t_mat_prod(&mats)?;
        if ins.len() != n_inputs {
            return Err(Error::Internal(format!(
                "jac_t_mat_prod of '{}' produced {} factor bundles for {} inputs",
                module.kind(),
                ins.len(),
                n_inputs
            )));
        }
        for (bundle, mat) in produced.iter_mut().zip(ins) {
            bundle.push(mat);
        }
    }
    Ok(produced)
}

/// Seed rule for the loss node: emit the loss-Hessian square root
pub(crate) fn mse_seed_backprop(
    _ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    _fetched: Vec<Option<SqrtFactors>>,
) -> Result<Vec<SqrtFactors>> {
    let loss = module
        .as_any()
        .downcast_ref::<MseLoss>()
        .ok_or_else(|| Error::Internal("MseLoss rule fired on a different module".into()))?;
    Ok(vec![loss.sqrt_hessian()?])
}

/// Register the factor-transport rules shared by the GGN families
pub(crate) fn register_ggn_transport(driver: &mut Backpropagation<SqrtFactors>) {
    for kind in [
        "Tanh",
        "Sigmoid",
        "ReLU",
        "Scale",
        "ActiveIdentity",
        "Flatten",
        "Branch",
        "Sum",
    ] {
        driver.register(kind, ModuleExtension::no_params(factor_backprop));
    }
    driver.register("MseLoss", ModuleExtension::no_params(mse_seed_backprop));
}

/// Sign-weighted diagonal curvature of a linear weight
///
/// `diag[o, i] = sum_k sign_k * sum_n (S_k[n, o] * x[n, i])^2`, i.e.
/// squared factors contracted against the squared layer input.
pub(crate) fn linear_weight_diag<'a>(
    module: &dyn Module,
    factors: impl Iterator<Item = (&'a Tensor, f64)>,
) -> Result<Tensor> {
    let pass = module.pass().ok_or(Error::NoForwardPass {
        module: module.kind(),
    })?;
    let x2 = pass.inputs[0].pow2();
    let mut acc: Option<Tensor> = None;
    for (s, sign) in factors {
        let term = s.pow2().transpose()?.matmul(&x2)?.scale(sign);
        acc = Some(match acc {
            Some(total) => total.add(&term)?,
            None => term,
        });
    }
    acc.ok_or_else(|| Error::Internal("empty factor bundle".into()))
}

/// Sign-weighted diagonal curvature of a linear bias
pub(crate) fn linear_bias_diag<'a>(
    factors: impl Iterator<Item = (&'a Tensor, f64)>,
) -> Result<Tensor> {
    let mut acc: Option<Tensor> = None;
    for (s, sign) in factors {
        let term = s.pow2().column_sums()?.scale(sign);
        acc = Some(match acc {
            Some(total) => total.add(&term)?,
            None => term,
        });
    }
    acc.ok_or_else(|| Error::Internal("empty factor bundle".into()))
}
