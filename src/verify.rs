//! Graph-integrity verification tooling
//!
//! Not part of the normal runtime flow: these checks surface stale-state
//! bugs in tests and debugging sessions, e.g. per-pass input/output
//! references that survived a completed, non-retained backward pass.

use crate::error::{Error, Result};
use crate::module::Module;

/// Check that no module in the tree retains per-pass input/output state
///
/// Succeeds after a non-retained backward pass; fails with
/// [`Error::StaleState`] naming the first offending module otherwise.
pub fn io_clear(module: &dyn Module) -> Result<()> {
    if module.pass().is_some() {
        return Err(Error::StaleState {
            module: module.kind(),
        });
    }
    for child in module.children() {
        io_clear(child)?;
    }
    Ok(())
}
