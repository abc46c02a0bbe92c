//! Error types for curvr

use thiserror::Error;

/// Result type alias using curvr's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extending a backward pass
#[derive(Error, Debug)]
pub enum Error {
    /// Shape mismatch in a tensor operation
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// A merge-like module was invoked with a single tensor instead of a tuple
    #[error("Module '{module}' expects a tuple of tensors, got a single tensor")]
    ExpectedTuple {
        /// The module kind that rejected the input
        module: &'static str,
    },

    /// A declared parameter has no registered computation function
    ///
    /// Raised at extension construction time, before any data flows.
    #[error(
        "Extension '{extension}' declares parameter '{param}' but no computation \
         function is registered for it"
    )]
    MissingParamFunction {
        /// The extension being constructed
        extension: &'static str,
        /// The parameter without a function
        param: &'static str,
    },

    /// An expected backpropagated quantity was absent from the store
    #[error(
        "Extension '{extension}' expects a backpropagated quantity for module \
         '{module}' but none was found"
    )]
    MissingBackpropQuantity {
        /// The module whose hook fired
        module: &'static str,
        /// The extension that expected the quantity
        extension: &'static str,
    },

    /// A module kind has no registered extension in the driver's table
    #[error("Extension '{extension}' has no rule for module kind '{module}'")]
    NoExtensionForModule {
        /// The unsupported module kind
        module: &'static str,
        /// The extension that was running
        extension: &'static str,
    },

    /// A gradient expected by the backward traversal was not available
    #[error("No gradient recorded for an output of module '{module}'")]
    MissingGradient {
        /// The module whose output gradient is missing
        module: &'static str,
    },

    /// A module holds no recorded forward pass state
    #[error("Module '{module}' has no recorded forward pass; run forward() first")]
    NoForwardPass {
        /// The module without pass state
        module: &'static str,
    },

    /// Leftover per-pass state found after a completed, non-retained backward
    #[error("Module '{module}' still retains input/output references")]
    StaleState {
        /// The module with leftover state
        module: &'static str,
    },

    /// Operation not supported by this module kind
    #[error("Operation '{op}' is not supported by module '{module}'")]
    Unsupported {
        /// The operation name
        op: &'static str,
        /// The module kind
        module: &'static str,
    },

    /// Internal error (bug in curvr)
    #[error("Internal error: {0}")]
    Internal(String),
}
