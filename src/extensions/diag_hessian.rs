//! Exact diagonal of the Hessian

use super::{linear_bias_diag, linear_weight_diag};
use crate::backprop::{Backpropagation, ExtensionCtx, ModuleExtension, ParamFn};
use crate::error::{Error, Result};
use crate::module::{Activation, Elementwise, Module, MseLoss, ReluFn, SigmoidFn, TanhFn};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Signed square-root factorization of a backpropagated Hessian
///
/// Unlike the GGN, the Hessian is not positive semi-definite: curvature
/// contributed by the second derivative of a nonlinearity can be negative.
/// Each factor matrix therefore carries a sign, and the represented
/// curvature is the sign-weighted sum of the per-factor outer products.
#[derive(Clone)]
pub struct HessFactors {
    /// Square-root factor matrices, each `[N, D]`
    pub matrices: Vec<Tensor>,
    /// One sign (+1.0 or -1.0) per factor matrix
    pub signs: Vec<f64>,
}

/// Extension family computing the exact Hessian diagonal per parameter
///
/// Results land under the `diag_h` savefield. Linear maps transport the
/// signed factors unchanged in count; elementwise nonlinearities scale
/// them by the first derivative and append signed residual factors from
/// the second derivative. For piecewise-linear networks no residuals
/// appear and `diag_h` coincides with `diag_ggn`.
///
/// Branched graphs are not supported by this family: residual factors
/// from different branches cannot be aligned for the fan-out merge, so a
/// `Branch` node fails with a dispatch error. Use [`super::DiagGgn`] on
/// branched architectures.
pub struct DiagHessian {
    driver: Backpropagation<HessFactors>,
}

impl DiagHessian {
    /// Savefield name under which results are stored
    pub const SAVEFIELD: &'static str = "diag_h";

    /// Build the family with its module-kind table
    pub fn new() -> Result<Self> {
        let mut driver = Backpropagation::new("DiagHessian", Self::SAVEFIELD, true);

        let mut functions: HashMap<&'static str, ParamFn<HessFactors>> = HashMap::new();
        functions.insert("weight", weight);
        functions.insert("bias", bias);
        driver.register(
            "Linear",
            ModuleExtension::new(
                "DiagHessian",
                &["weight", "bias"],
                functions,
                Some(transport),
            )?,
        );

        driver.register("Tanh", ModuleExtension::no_params(elementwise::<TanhFn>));
        driver.register(
            "Sigmoid",
            ModuleExtension::no_params(elementwise::<SigmoidFn>),
        );
        driver.register("ReLU", ModuleExtension::no_params(elementwise::<ReluFn>));
        driver.register("Scale", ModuleExtension::no_params(transport));
        driver.register("ActiveIdentity", ModuleExtension::no_params(transport));
        driver.register("Flatten", ModuleExtension::no_params(transport));
        driver.register("MseLoss", ModuleExtension::no_params(seed));

        Ok(Self { driver })
    }

    /// Run a backward pass, filling `diag_h` savefields and gradients
    pub fn backward(
        &mut self,
        loss: &mut dyn Module,
        model: &mut dyn Module,
        retain_graph: bool,
    ) -> Result<()> {
        self.driver.backward(loss, model, retain_graph)
    }
}

fn take_bundle(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    fetched: Vec<Option<HessFactors>>,
) -> Result<HessFactors> {
    fetched
        .into_iter()
        .next()
        .flatten()
        .ok_or(Error::MissingBackpropQuantity {
            module: module.kind(),
            extension: ctx.extension,
        })
}

/// Transport rule for modules linear in their input: transform every
/// factor, keep the signs
fn transport(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    fetched: Vec<Option<HessFactors>>,
) -> Result<Vec<HessFactors>> {
    let bundle = take_bundle(ctx, module, fetched)?;
    let mut matrices = Vec::with_capacity(bundle.matrices.len());
    for mat in &bundle.matrices {
        let mut ins = module.jac_t_mat_prod(std::slice::from_ref(mat))?;
        if ins.len() != 1 {
            return Err(Error::Internal(format!(
                "Hessian transport expects a single-input module, '{}' has {} inputs",
                module.kind(),
                ins.len()
            )));
        }
        matrices.push(ins.remove(0));
    }
    Ok(vec![HessFactors {
        matrices,
        signs: bundle.signs,
    }])
}

/// Elementwise rule: first-derivative transport plus signed residual
/// factors from the second derivative
fn elementwise<E: Elementwise>(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    g_out: &[Tensor],
    fetched: Vec<Option<HessFactors>>,
) -> Result<Vec<HessFactors>> {
    let bundle = take_bundle(ctx, module, fetched)?;
    let act = module
        .as_any()
        .downcast_ref::<Activation<E>>()
        .ok_or_else(|| Error::Internal("elementwise Hessian rule fired on a different module".into()))?;

    let d1 = act.first_derivative()?;
    let mut matrices = Vec::with_capacity(bundle.matrices.len());
    for mat in &bundle.matrices {
        matrices.push(mat.mul(&d1)?);
    }
    let mut signs = bundle.signs;

    // residual curvature of the nonlinearity itself: diag(phi''(z) * g_out),
    // split per column into a positive and a negative square-root factor
    let residual = act.second_derivative()?.mul(&g_out[0])?;
    let (n, d) = (residual.shape()[0], residual.shape()[1]);
    for sign in [1.0, -1.0] {
        for col in 0..d {
            let mut data = vec![0.0; n * d];
            let mut nonzero = false;
            for row in 0..n {
                let r = sign * residual.data()[row * d + col];
                if r > 0.0 {
                    data[row * d + col] = r.sqrt();
                    nonzero = true;
                }
            }
            if nonzero {
                matrices.push(Tensor::from_slice(&data, &[n, d])?);
                signs.push(sign);
            }
        }
    }

    Ok(vec![HessFactors { matrices, signs }])
}

/// Seed rule for the loss node: the MSE Hessian is positive, all signs +1
fn seed(
    _ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    _fetched: Vec<Option<HessFactors>>,
) -> Result<Vec<HessFactors>> {
    let loss = module
        .as_any()
        .downcast_ref::<MseLoss>()
        .ok_or_else(|| Error::Internal("MseLoss rule fired on a different module".into()))?;
    let matrices = loss.sqrt_hessian()?;
    let signs = vec![1.0; matrices.len()];
    Ok(vec![HessFactors { matrices, signs }])
}

fn weight(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&HessFactors>,
) -> Result<Tensor> {
    let bundle = quantity.ok_or(Error::MissingBackpropQuantity {
        module: module.kind(),
        extension: ctx.extension,
    })?;
    linear_weight_diag(
        module,
        bundle.matrices.iter().zip(bundle.signs.iter().copied()),
    )
}

fn bias(
    ctx: &ExtensionCtx,
    module: &dyn Module,
    _g_inp: &[Tensor],
    _g_out: &[Tensor],
    quantity: Option<&HessFactors>,
) -> Result<Tensor> {
    let bundle = quantity.ok_or(Error::MissingBackpropQuantity {
        module: module.kind(),
        extension: ctx.extension,
    })?;
    linear_bias_diag(bundle.matrices.iter().zip(bundle.signs.iter().copied()))
}
