//! Tensor type and identity handles
//!
//! This module provides the dense `Tensor` used by the host modules and the
//! `TensorId` handle that keys backpropagated quantities.

mod core;
mod id;

pub use core::Tensor;
pub use id::TensorId;
