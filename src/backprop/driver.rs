//! Backward traversal driver

use super::{ExtensionCtx, GradStore, ModuleExtension, QuantityStore};
use crate::error::{Error, Result};
use crate::module::{clear_pass_recursive, Module};
use crate::tensor::{Tensor, TensorId};
use std::collections::HashMap;
use tracing::trace;

/// Drives one extension family over the backward traversal
///
/// Owns everything a run needs: the module-kind dispatch table, the
/// quantity store, and the expectation/savefield configuration the hooks
/// consult. The traversal is an explicit structural walk of the module
/// tree: containers are visited through their children in reverse
/// execution order, hooks fire on every addressable node whose output
/// participates in differentiation, and gradients are carried through the
/// modules' transposed-Jacobian products. Hooks therefore fire only after
/// every quantity they depend on has been stored, exactly as a
/// dependency-scheduled engine would order them.
pub struct Backpropagation<Q> {
    extension: &'static str,
    savefield: &'static str,
    expects_backprop: bool,
    table: HashMap<&'static str, ModuleExtension<Q>>,
    quantities: QuantityStore<Q>,
}

impl<Q: Clone> Backpropagation<Q> {
    /// Create a driver for an extension family
    pub fn new(extension: &'static str, savefield: &'static str, expects_backprop: bool) -> Self {
        Self {
            extension,
            savefield,
            expects_backprop,
            table: HashMap::new(),
            quantities: QuantityStore::new(),
        }
    }

    /// Register the extension for a module kind
    pub fn register(&mut self, kind: &'static str, extension: ModuleExtension<Q>) {
        self.table.insert(kind, extension);
    }

    /// Name of the extension family
    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// Destination attribute for per-parameter results
    pub fn savefield(&self) -> &'static str {
        self.savefield
    }

    /// Whether this family propagates auxiliary quantities
    pub fn expects_backpropagation_quantities(&self) -> bool {
        self.expects_backprop
    }

    /// Access the quantity store (verification tooling)
    pub fn quantities(&self) -> &QuantityStore<Q> {
        &self.quantities
    }

    /// Run a backward pass from `loss` through `model`
    ///
    /// Requires a completed forward pass through both. With `retain_graph`
    /// the per-pass module state is kept for replay; a later pass must
    /// re-populate the quantity store. Without it, all pass state and any
    /// unconsumed quantities are dropped at the end.
    pub fn backward(
        &mut self,
        loss: &mut dyn Module,
        model: &mut dyn Module,
        retain_graph: bool,
    ) -> Result<()> {
        let mut grads = GradStore::new();

        // seed dL/dL = 1 at the loss output
        let loss_output = {
            let pass = loss.pass().ok_or(Error::NoForwardPass {
                module: loss.kind(),
            })?;
            pass.outputs[0].id()
        };
        grads.insert(loss_output, Tensor::ones(&[1]));

        self.fire(loss, &mut grads)?;
        self.visit(model, &mut grads)?;

        if !retain_graph {
            clear_pass_recursive(loss);
            clear_pass_recursive(model);
            self.quantities.clear();
        }
        Ok(())
    }

    /// Visit a subtree: children in reverse execution order, then the
    /// node's own hook
    fn visit(&mut self, module: &mut dyn Module, grads: &mut GradStore) -> Result<()> {
        for child in module.children_mut().into_iter().rev() {
            self.visit(child, grads)?;
        }
        if module.has_hook() {
            self.fire(module, grads)?;
        }
        Ok(())
    }

    /// Fire the backward hook of one module
    fn fire(&mut self, module: &mut dyn Module, grads: &mut GradStore) -> Result<()> {
        let (output_ids, input_meta) = {
            let pass = module.pass().ok_or(Error::NoForwardPass {
                module: module.kind(),
            })?;
            // nodes outside the differentiated subgraph never see a hook
            if !module.is_loss() && !pass.outputs.iter().any(|t| t.requires_grad()) {
                return Ok(());
            }
            let output_ids: Vec<TensorId> = pass.outputs.iter().map(|t| t.id()).collect();
            let input_meta: Vec<(TensorId, bool)> = pass
                .inputs
                .iter()
                .map(|t| (t.id(), t.requires_grad()))
                .collect();
            (output_ids, input_meta)
        };
        trace!(module = module.kind(), extension = self.extension, "hook");

        let g_out: Vec<Tensor> = output_ids
            .iter()
            .map(|&id| {
                grads.remove(id).ok_or(Error::MissingGradient {
                    module: module.kind(),
                })
            })
            .collect::<Result<_>>()?;

        let g_inp = module.jac_t_mat_prod(&g_out)?;
        if g_inp.len() != input_meta.len() {
            return Err(Error::Internal(format!(
                "jac_t_mat_prod of '{}' produced {} gradients for {} inputs",
                module.kind(),
                g_inp.len(),
                input_meta.len()
            )));
        }

        for name in module.param_names() {
            let trainable = module.param(name).is_some_and(|p| p.trainable());
            if !trainable {
                continue;
            }
            let grad = module.param_jac_t_mat_prod(name, &g_out[0])?;
            if let Some(param) = module.param_mut(name) {
                param.accumulate_grad(grad)?;
            }
        }

        for (grad, &(id, requires_grad)) in g_inp.iter().zip(&input_meta) {
            if requires_grad {
                grads.accumulate(id, grad.clone())?;
            }
        }

        let extension = self
            .table
            .get(module.kind())
            .ok_or(Error::NoExtensionForModule {
                module: module.kind(),
                extension: self.extension,
            })?;
        let ctx = ExtensionCtx {
            extension: self.extension,
            savefield: self.savefield,
            expects_backprop: self.expects_backprop,
        };
        extension.apply(&ctx, &mut self.quantities, module, &g_inp, &g_out)
    }
}
