//! Backpropagation core: quantity store, gradient store, the module
//! extension protocol and the traversal driver
//!
//! An extension family is a [`Backpropagation`] driver configured with one
//! [`ModuleExtension`] per module kind. During `backward`, each hook
//! retrieves the auxiliary quantity attached to the module's output from
//! the [`QuantityStore`] (consuming it), computes per-parameter results
//! into the family's savefield, and attaches a new quantity to the module's
//! input for the next hook upstream.

mod driver;
mod extension;
mod grad_store;
mod store;

pub use driver::Backpropagation;
pub use extension::{BackpropFn, ExtensionCtx, ModuleExtension, ParamFn};
pub use grad_store::GradStore;
pub use store::QuantityStore;
