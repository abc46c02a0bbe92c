//! Dense tensor type used by modules and extensions

use super::TensorId;
use crate::error::{Error, Result};
use rand::Rng;
use rayon::prelude::*;
use std::sync::Arc;

/// A dense, row-major `f64` tensor with shared storage
///
/// Cloning a `Tensor` is cheap and preserves its identity: the clone shares
/// both the storage and the [`TensorId`]. Every operation result is a fresh
/// tensor with a fresh ID, so the ID always names one node of the forward
/// computation.
///
/// The `requires_grad` flag marks tensors that participate in
/// differentiation. Module outputs inherit it from their inputs and from the
/// presence of trainable parameters.
#[derive(Clone)]
pub struct Tensor {
    id: TensorId,
    shape: Vec<usize>,
    data: Arc<Vec<f64>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from a flat slice and a shape
    pub fn from_slice(data: &[f64], shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            id: TensorId::new(),
            shape: shape.to_vec(),
            data: Arc::new(data.to_vec()),
            requires_grad: false,
        })
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize]) -> Self {
        Self::filled(shape, 1.0)
    }

    /// Create a tensor filled with a constant
    pub fn filled(shape: &[usize], value: f64) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            id: TensorId::new(),
            shape: shape.to_vec(),
            data: Arc::new(vec![value; numel]),
            requires_grad: false,
        }
    }

    /// Create a tensor with uniform random entries in `[lo, hi)`
    pub fn rand_uniform(shape: &[usize], lo: f64, hi: f64) -> Self {
        let mut rng = rand::thread_rng();
        let numel: usize = shape.iter().product();
        let data: Vec<f64> = (0..numel).map(|_| rng.gen_range(lo..hi)).collect();
        Self {
            id: TensorId::new(),
            shape: shape.to_vec(),
            data: Arc::new(data),
            requires_grad: false,
        }
    }

    /// Get the tensor ID
    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Access the underlying data
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Copy the data into a `Vec`
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// Check whether this tensor participates in differentiation
    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Set the `requires_grad` flag
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// Builder-style variant of [`set_requires_grad`](Self::set_requires_grad)
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// Create an alias: shared storage and flags, fresh identity
    ///
    /// Used by fan-out nodes to hand each sub-computation a distinct handle
    /// to the same values, so every store key keeps a single producer.
    pub fn alias(&self) -> Self {
        Self {
            id: TensorId::new(),
            shape: self.shape.clone(),
            data: Arc::clone(&self.data),
            requires_grad: self.requires_grad,
        }
    }

    /// Reinterpret the tensor with a new shape of equal element count
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != self.numel() {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: shape.to_vec(),
            });
        }
        Ok(Self {
            id: TensorId::new(),
            shape: shape.to_vec(),
            data: Arc::clone(&self.data),
            requires_grad: self.requires_grad,
        })
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        let data: Vec<f64> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            id: TensorId::new(),
            shape: self.shape.clone(),
            data: Arc::new(data),
            requires_grad: self.requires_grad || other.requires_grad,
        })
    }

    /// Element-wise addition
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Element-wise multiplication
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Multiply every element by a scalar
    pub fn scale(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    /// Apply a function to every element
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let data: Vec<f64> = self.data.iter().map(|&x| f(x)).collect();
        Self {
            id: TensorId::new(),
            shape: self.shape.clone(),
            data: Arc::new(data),
            requires_grad: self.requires_grad,
        }
    }

    /// Square every element
    pub fn pow2(&self) -> Self {
        self.map(|x| x * x)
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Matrix multiplication of two rank-2 tensors
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        let (m, k) = (self.shape[0], self.shape[1]);
        let (k2, n) = (other.shape[0], other.shape[1]);
        if k != k2 {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }

        let a = &self.data;
        let b = &other.data;
        let mut out = vec![0.0; m * n];
        out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for p in 0..k {
                let aip = a[i * k + p];
                if aip == 0.0 {
                    continue;
                }
                let brow = &b[p * n..(p + 1) * n];
                for (j, rj) in row.iter_mut().enumerate() {
                    *rj += aip * brow[j];
                }
            }
        });

        Ok(Self {
            id: TensorId::new(),
            shape: vec![m, n],
            data: Arc::new(out),
            requires_grad: self.requires_grad || other.requires_grad,
        })
    }

    /// Transpose a rank-2 tensor
    pub fn transpose(&self) -> Result<Self> {
        if self.ndim() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![2],
                got: vec![self.ndim()],
            });
        }
        let (m, n) = (self.shape[0], self.shape[1]);
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                out[j * m + i] = self.data[i * n + j];
            }
        }
        Ok(Self {
            id: TensorId::new(),
            shape: vec![n, m],
            data: Arc::new(out),
            requires_grad: self.requires_grad,
        })
    }

    /// Add a rank-1 row vector to every row of a rank-2 tensor
    pub fn add_row(&self, row: &Self) -> Result<Self> {
        if self.ndim() != 2 || row.ndim() != 1 || row.shape[0] != self.shape[1] {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: row.shape.clone(),
            });
        }
        let n = self.shape[1];
        let data: Vec<f64> = self
            .data
            .iter()
            .enumerate()
            .map(|(idx, &x)| x + row.data[idx % n])
            .collect();
        Ok(Self {
            id: TensorId::new(),
            shape: self.shape.clone(),
            data: Arc::new(data),
            requires_grad: self.requires_grad || row.requires_grad,
        })
    }

    /// Sum a rank-2 tensor over its rows, producing a rank-1 tensor
    pub fn column_sums(&self) -> Result<Self> {
        if self.ndim() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![2],
                got: vec![self.ndim()],
            });
        }
        let (m, n) = (self.shape[0], self.shape[1]);
        let mut out = vec![0.0; n];
        for i in 0..m {
            for j in 0..n {
                out[j] += self.data[i * n + j];
            }
        }
        Ok(Self {
            id: TensorId::new(),
            shape: vec![n],
            data: Arc::new(out),
            requires_grad: self.requires_grad,
        })
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}
