//! Branching and merging nodes
//!
//! Second-order backpropagation walks the computation graph node by node.
//! Fan-out and fan-in performed inline (reusing a tensor, adding two
//! tensors) never become addressable nodes and are invisible to that walk;
//! [`Branch`], [`SumModule`] and [`Parallel`] materialize them.

use super::{Args, Module, PassState};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use std::any::Any;

/// Fan-out node: feeds one input through N ordered sub-modules
///
/// ```text
///       ↗ module 1 → output 1
/// input → module 2 → output 2
///       ↘ ...      → ...
/// ```
///
/// Each sub-module receives a fresh-identity alias of the input, so every
/// quantity-store key keeps a single producer even under fan-out. The
/// aliases are recorded as this node's outputs; its hook merges the
/// quantities the sub-modules propagated onto them.
pub struct Branch {
    children: Vec<(String, Box<dyn Module>)>,
    pass: Option<PassState>,
}

impl Branch {
    /// Create a branch with positionally named sub-modules
    pub fn new(modules: Vec<Box<dyn Module>>) -> Result<Self> {
        Self::named(
            modules
                .into_iter()
                .enumerate()
                .map(|(idx, m)| (idx.to_string(), m))
                .collect(),
        )
    }

    /// Create a branch with explicitly named sub-modules
    ///
    /// Registration order is stable and determines the order of outputs.
    pub fn named(modules: Vec<(String, Box<dyn Module>)>) -> Result<Self> {
        if modules.is_empty() {
            return Err(Error::Internal(
                "Branch requires at least one sub-module".into(),
            ));
        }
        Ok(Self {
            children: modules,
            pass: None,
        })
    }

    /// Number of sub-modules
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the branch has no sub-modules (never true after construction)
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Names of the sub-modules in registration order
    pub fn names(&self) -> Vec<&str> {
        self.children.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Module for Branch {
    fn kind(&self) -> &'static str {
        "Branch"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let x = input.single(self.kind())?;
        let mut aliases = Vec::with_capacity(self.children.len());
        let mut outputs = Vec::with_capacity(self.children.len());
        for (_, child) in &mut self.children {
            let alias = x.alias();
            aliases.push(alias.clone());
            outputs.push(child.forward(Args::Single(alias))?.single("Branch")?);
        }
        self.pass = Some(PassState {
            inputs: vec![x],
            outputs: aliases,
        });
        Ok(Args::Tuple(outputs))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn children(&self) -> Vec<&dyn Module> {
        self.children
            .iter()
            .map(|(_, m)| m.as_ref() as &dyn Module)
            .collect()
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        self.children
            .iter_mut()
            .map(|(_, m)| m.as_mut() as &mut dyn Module)
            .collect()
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        if mats.len() != self.children.len() {
            return Err(Error::Internal(format!(
                "Branch has {} outputs, got {} matrices",
                self.children.len(),
                mats.len()
            )));
        }
        let mut total = mats[0].clone();
        for mat in &mats[1..] {
            total = total.add(mat)?;
        }
        Ok(vec![total])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fan-in node: element-wise sum of a tuple of equal-shape tensors
///
/// ```text
/// module 1 ↘
/// module 2 → SumModule (sum)
/// ...      ↗
/// ```
pub struct SumModule {
    pass: Option<PassState>,
}

impl SumModule {
    /// Create the merge node
    pub fn new() -> Self {
        Self { pass: None }
    }
}

impl Default for SumModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for SumModule {
    fn kind(&self) -> &'static str {
        "Sum"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let xs = input.tuple(self.kind())?;
        if xs.is_empty() {
            return Err(Error::Internal("Sum requires at least one input".into()));
        }
        let mut out = xs[0].clone();
        for x in &xs[1..] {
            out = out.add(x)?;
        }
        // re-scale by 1.0 so a single-input sum still creates a new node
        if xs.len() == 1 {
            out = out.scale(1.0);
        }
        self.pass = Some(PassState {
            inputs: xs,
            outputs: vec![out.clone()],
        });
        Ok(Args::Single(out))
    }

    fn pass(&self) -> Option<&PassState> {
        self.pass.as_ref()
    }

    fn clear_pass(&mut self) {
        self.pass = None;
    }

    fn jac_t_mat_prod(&self, mats: &[Tensor]) -> Result<Vec<Tensor>> {
        let pass = self.pass.as_ref().ok_or(Error::NoForwardPass {
            module: self.kind(),
        })?;
        let [mat] = mats else {
            return Err(Error::Internal(format!(
                "Sum has one output, got {} matrices",
                mats.len()
            )));
        };
        Ok(vec![mat.clone(); pass.inputs.len()])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Branch followed by a merge: run one input through N sub-computations
/// and combine the results
///
/// ```text
///        ↗ module 1 ↘
/// Branch → module 2 → merge (default: sum)
///        ↘ ...      ↗
/// ```
///
/// The merge defaults to [`SumModule`]; any module satisfying the
/// N-inputs-to-one-output contract can substitute a custom reduction.
/// Constructed once with static topology and reused across passes; all
/// per-call state lives on the child nodes and in the quantity store.
pub struct Parallel {
    branch: Branch,
    merge: Box<dyn Module>,
}

impl Parallel {
    /// Create a parallel sequence merged by summation
    pub fn new(modules: Vec<Box<dyn Module>>) -> Result<Self> {
        Self::with_merge(modules, Box::new(SumModule::new()))
    }

    /// Create a parallel sequence with a custom merge module
    pub fn with_merge(modules: Vec<Box<dyn Module>>, merge: Box<dyn Module>) -> Result<Self> {
        Ok(Self {
            branch: Branch::new(modules)?,
            merge,
        })
    }
}

impl Module for Parallel {
    fn kind(&self) -> &'static str {
        "Parallel"
    }

    fn forward(&mut self, input: Args) -> Result<Args> {
        let branched = self.branch.forward(input)?;
        self.merge.forward(branched)
    }

    fn children(&self) -> Vec<&dyn Module> {
        vec![&self.branch as &dyn Module, self.merge.as_ref()]
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        vec![&mut self.branch as &mut dyn Module, self.merge.as_mut()]
    }

    fn has_hook(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
