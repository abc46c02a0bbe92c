//! # curvr
//!
//! **Second-order quantities from a single extended backward pass.**
//!
//! curvr computes diagonal Hessians, diagonal generalized Gauss-Newton
//! (GGN) matrices and GGN/Fisher matrix square roots for neural-network
//! modules. Instead of materializing curvature matrices, it extends the
//! backward traversal with per-module hooks: each hook consumes an
//! auxiliary quantity attached to the module's output, contracts it into
//! per-parameter results, and attaches a transformed quantity to the
//! module's input for the next hook upstream.
//!
//! ## Design
//!
//! - **Explicit graph nodes**: fan-out, fan-in, scaling and identity are
//!   materialized as [`module::Branch`], [`module::SumModule`],
//!   [`module::Parallel`], [`module::Scale`] and
//!   [`module::ActiveIdentity`], so hook-based propagation sees them.
//! - **Single-consumption store**: quantities live in a
//!   [`backprop::QuantityStore`] keyed by tensor identity and are removed
//!   on retrieval, turning graph-reuse bugs into immediate errors instead
//!   of silent staleness.
//! - **Eagerly validated extensions**: each
//!   [`backprop::ModuleExtension`] maps declared parameter names to typed
//!   computation functions, checked at construction.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use curvr::prelude::*;
//!
//! let mut model = Sequential::new(vec![
//!     Box::new(Linear::new(4, 8)),
//!     Box::new(Tanh::new()),
//!     Box::new(Linear::new(8, 2)),
//! ]);
//! let mut loss = MseLoss::new(Reduction::Mean);
//!
//! let logits = model.forward(Args::Single(x))?;
//! loss.set_target(y);
//! loss.forward(logits)?;
//!
//! let mut extension = DiagGgn::new()?;
//! extension.backward(&mut loss, &mut model, false)?;
//!
//! let lin = model.get(0).unwrap().as_any().downcast_ref::<Linear>().unwrap();
//! let diag = lin.weight().saved(DiagGgn::SAVEFIELD).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backprop;
pub mod error;
pub mod extensions;
pub mod module;
pub mod tensor;
pub mod verify;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backprop::{Backpropagation, ExtensionCtx, ModuleExtension, QuantityStore};
    pub use crate::error::{Error, Result};
    pub use crate::extensions::{DiagGgn, DiagHessian, SqrtGgn};
    pub use crate::module::{
        ActiveIdentity, Args, Branch, Flatten, Linear, Module, MseLoss, Parallel, Param,
        Reduction, ReLU, Scale, Sequential, Sigmoid, SumModule, Tanh,
    };
    pub use crate::tensor::{Tensor, TensorId};
}
