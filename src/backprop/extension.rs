//! The module extension protocol
//!
//! A [`ModuleExtension`] is the per-module-kind unit every second-order
//! extension family implements: it declares which parameters need
//! treatment, registers one computation function per declared parameter,
//! and optionally a backpropagation rule that transforms the quantity
//! attached to the module output into one for the module input.

use super::QuantityStore;
use crate::error::{Error, Result};
use crate::module::Module;
use crate::tensor::{Tensor, TensorId};
use std::collections::HashMap;
use tracing::warn;

/// Identity of the extension run a hook fires under
///
/// Handed to every computation function so rules can report context and
/// honor the active savefield.
pub struct ExtensionCtx {
    /// Name of the running extension family
    pub extension: &'static str,
    /// Destination attribute for per-parameter results
    pub savefield: &'static str,
    /// Whether the family propagates quantities through the graph
    pub expects_backprop: bool,
}

/// Computation rule for one parameter of one module kind
///
/// `f(context, module, grad_inputs, grad_outputs, quantity) -> value`; the
/// value is stored on the parameter under the active savefield.
pub type ParamFn<Q> =
    fn(&ExtensionCtx, &dyn Module, &[Tensor], &[Tensor], Option<&Q>) -> Result<Tensor>;

/// Backpropagation rule of one module kind
///
/// Receives one fetched quantity slot per module output and produces one
/// quantity per module input.
pub type BackpropFn<Q> =
    fn(&ExtensionCtx, &dyn Module, &[Tensor], &[Tensor], Vec<Option<Q>>) -> Result<Vec<Q>>;

/// Parameter treatment and quantity propagation for one module kind
///
/// The parameter-name-to-function table is validated eagerly: declaring a
/// parameter without registering its function is a configuration error at
/// construction time, before any data flows.
pub struct ModuleExtension<Q> {
    params: Vec<&'static str>,
    functions: HashMap<&'static str, ParamFn<Q>>,
    backpropagate: Option<BackpropFn<Q>>,
}

// manual impl: fn-pointer maps have no derivable Debug
impl<Q> std::fmt::Debug for ModuleExtension<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExtension")
            .field("params", &self.params)
            .field("functions", &self.functions.keys())
            .field("backpropagate", &self.backpropagate.is_some())
            .finish()
    }
}

impl<Q: Clone> ModuleExtension<Q> {
    /// Create an extension for a module kind with tracked parameters
    ///
    /// Fails with [`Error::MissingParamFunction`] if any declared parameter
    /// name has no entry in `functions`.
    pub fn new(
        extension: &'static str,
        params: &[&'static str],
        functions: HashMap<&'static str, ParamFn<Q>>,
        backpropagate: Option<BackpropFn<Q>>,
    ) -> Result<Self> {
        for param in params {
            if !functions.contains_key(param) {
                return Err(Error::MissingParamFunction { extension, param });
            }
        }
        Ok(Self {
            params: params.to_vec(),
            functions,
            backpropagate,
        })
    }

    /// Create an extension for a parameter-free module kind
    pub fn no_params(backpropagate: BackpropFn<Q>) -> Self {
        Self {
            params: Vec::new(),
            functions: HashMap::new(),
            backpropagate: Some(backpropagate),
        }
    }

    /// Apply all actions required by the extension for one module hook
    ///
    /// Fetches (and consumes) the quantities attached to the module
    /// outputs, validates the driver's expectation, runs the per-parameter
    /// computations into the savefield, applies the backpropagation rule,
    /// and stores the produced quantities for the module inputs.
    pub fn apply(
        &self,
        ctx: &ExtensionCtx,
        store: &mut QuantityStore<Q>,
        module: &mut dyn Module,
        g_inp: &[Tensor],
        g_out: &[Tensor],
    ) -> Result<()> {
        let pass = module.pass().ok_or(Error::NoForwardPass {
            module: module.kind(),
        })?;
        let output_ids: Vec<TensorId> = pass.outputs.iter().map(|t| t.id()).collect();
        let input_meta: Vec<(TensorId, bool)> = pass
            .inputs
            .iter()
            .map(|t| (t.id(), t.requires_grad()))
            .collect();

        let fetched: Vec<Option<Q>> = output_ids
            .iter()
            .map(|&id| store.retrieve(id, true))
            .collect();

        if ctx.expects_backprop && fetched.iter().all(Option::is_none) && !module.is_loss() {
            return Err(Error::MissingBackpropQuantity {
                module: module.kind(),
                extension: ctx.extension,
            });
        }

        for name in &self.params {
            let exists_and_trainable = module.param(name).is_some_and(|p| p.trainable());
            if !exists_and_trainable {
                continue;
            }
            // construction guarantees an entry per declared parameter
            let Some(func) = self.functions.get(name) else {
                continue;
            };
            let value = func(
                ctx,
                module,
                g_inp,
                g_out,
                fetched.first().and_then(|q| q.as_ref()),
            )?;
            if let Some(param) = module.param_mut(name) {
                param.save(ctx.savefield, value);
            }
        }

        let input_requires_grad = input_meta.iter().any(|(_, rg)| *rg);
        if input_requires_grad && ctx.expects_backprop {
            match self.backpropagate {
                Some(backpropagate) => {
                    let produced = backpropagate(ctx, module, g_inp, g_out, fetched)?;
                    if produced.len() != input_meta.len() {
                        return Err(Error::Internal(format!(
                            "backpropagate of '{}' produced {} quantities for {} inputs",
                            module.kind(),
                            produced.len(),
                            input_meta.len()
                        )));
                    }
                    for (quantity, &(id, rg)) in produced.into_iter().zip(&input_meta) {
                        if rg {
                            store.save(id, quantity);
                        }
                    }
                }
                None => {
                    warn!(
                        module = module.kind(),
                        extension = ctx.extension,
                        "backpropagate has not been overridden; no quantity propagated"
                    );
                }
            }
        }

        Ok(())
    }
}
