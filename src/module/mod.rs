//! Module tree: the extensible computation units
//!
//! Every node of the network is a [`Module`]: it maps an input bundle to an
//! output bundle, retains its per-pass input/output tensors for the next
//! backward traversal, and exposes the transposed-Jacobian products the
//! extensions build on. Fan-out, fan-in, scaling and identity are explicit
//! module kinds ([`Branch`], [`SumModule`], [`Scale`], [`ActiveIdentity`])
//! so the backward traversal can intercept them; arithmetic performed
//! outside a module is invisible to it.

mod activation;
mod branching;
mod flatten;
mod linear;
mod loss;
mod param;
mod scale;
mod sequential;

pub use activation::{Activation, Elementwise, ReLU, ReluFn, Sigmoid, SigmoidFn, Tanh, TanhFn};
pub use branching::{Branch, Parallel, SumModule};
pub use flatten::Flatten;
pub use linear::Linear;
pub use loss::{MseLoss, Reduction};
pub use param::Param;
pub use scale::{ActiveIdentity, Scale};
pub use sequential::Sequential;

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// Input or output bundle of a module
///
/// Most modules consume and produce a single tensor; merge-like nodes
/// consume a tuple and fan-out nodes produce one. Merge-like nodes reject
/// `Single` with [`Error::ExpectedTuple`] so that an incorrect invocation
/// fails loudly instead of silently reinterpreting its argument.
#[derive(Debug, Clone)]
pub enum Args {
    /// A single tensor
    Single(Tensor),
    /// An ordered tuple of tensors
    Tuple(Vec<Tensor>),
}

impl Args {
    /// Extract the single tensor, or fail with a shape-contract error
    pub fn single(self, module: &'static str) -> Result<Tensor> {
        match self {
            Args::Single(t) => Ok(t),
            Args::Tuple(ts) => Err(Error::Internal(format!(
                "module '{module}' expects a single tensor, got a tuple of {}",
                ts.len()
            ))),
        }
    }

    /// Extract the tuple, or fail with [`Error::ExpectedTuple`]
    pub fn tuple(self, module: &'static str) -> Result<Vec<Tensor>> {
        match self {
            Args::Tuple(ts) => Ok(ts),
            Args::Single(_) => Err(Error::ExpectedTuple { module }),
        }
    }
}

/// Input/output tensors retained by a module for one backward pass
///
/// Recorded at forward time and cleared once a non-retained backward pass
/// completes. Leftover pass state after that point is a detectable
/// integrity bug (see [`crate::verify`]).
#[derive(Debug, Clone)]
pub struct PassState {
    /// The input tensors, in positional order
    pub inputs: Vec<Tensor>,
    /// The output tensors, in positional order
    pub outputs: Vec<Tensor>,
}

impl PassState {
    /// Pass state of a single-input, single-output module
    pub fn simple(input: Tensor, output: Tensor) -> Self {
        Self {
            inputs: vec![input],
            outputs: vec![output],
        }
    }
}

/// A computation unit extensible by second-order backpropagation
///
/// Leaf modules implement `forward`, record their pass state, and provide
/// the transposed-Jacobian products; containers implement `forward` and
/// `children`/`children_mut` and leave `has_hook` false.
pub trait Module: Any {
    /// Stable name of this module kind, used for extension dispatch and
    /// error messages
    fn kind(&self) -> &'static str;

    /// Run the forward computation, recording pass state on hooked modules
    fn forward(&mut self, input: Args) -> Result<Args>;

    /// The retained input/output tensors of the last forward pass
    fn pass(&self) -> Option<&PassState> {
        None
    }

    /// Drop the retained pass state
    fn clear_pass(&mut self) {}

    /// Child modules in forward execution order (containers only)
    fn children(&self) -> Vec<&dyn Module> {
        Vec::new()
    }

    /// Mutable child modules in forward execution order (containers only)
    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        Vec::new()
    }

    /// Whether the backward traversal fires an extension hook on this node
    ///
    /// True for every addressable graph node; false for transparent
    /// containers such as [`Sequential`] and [`Parallel`].
    fn has_hook(&self) -> bool {
        true
    }

    /// Whether this is a designated loss/terminal node
    fn is_loss(&self) -> bool {
        false
    }

    /// Names of the tracked parameters of this module kind
    fn param_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Look up a parameter by name
    fn param(&self, _name: &str) -> Option<&Param> {
        None
    }

    /// Look up a parameter by name, mutably
    fn param_mut(&mut self, _name: &str) -> Option<&mut Param> {
        None
    }

    /// Multiply matrices by the transposed Jacobian of this module
    ///
    /// Takes one matrix per recorded output and returns one per recorded
    /// input. The vector-Jacobian product of the gradient bookkeeping is
    /// the single-column case; the extensions push whole factor matrices
    /// through the same rule.
    fn jac_t_mat_prod(&self, _mats: &[Tensor]) -> Result<Vec<Tensor>> {
        Err(Error::Unsupported {
            op: "jac_t_mat_prod",
            module: self.kind(),
        })
    }

    /// Multiply a matrix by the transposed Jacobian w.r.t. a parameter
    ///
    /// Returns a parameter-shaped tensor. Used for gradient accumulation
    /// and by extensions that contract factors against parameters.
    fn param_jac_t_mat_prod(&self, _name: &str, _mat: &Tensor) -> Result<Tensor> {
        Err(Error::Unsupported {
            op: "param_jac_t_mat_prod",
            module: self.kind(),
        })
    }

    /// Upcast for extension rules that need the concrete module type
    fn as_any(&self) -> &dyn Any;
}

/// Recursively drop all retained pass state below and including `module`
pub fn clear_pass_recursive(module: &mut dyn Module) {
    module.clear_pass();
    for child in module.children_mut() {
        clear_pass_recursive(child);
    }
}
