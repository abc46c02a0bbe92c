//! Shared helpers for the integration tests: tolerance assertions,
//! deterministic test data, and finite-difference references.

#![allow(dead_code)]

use curvr::prelude::*;

/// Assert element-wise closeness with relative and absolute tolerance
pub fn assert_allclose(actual: &[f64], expected: &[f64], rtol: f64, atol: f64) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let tol = atol + rtol * e.abs();
        assert!(
            (a - e).abs() <= tol,
            "mismatch at index {i}: actual {a}, expected {e}, tol {tol}"
        );
    }
}

/// Deterministic pseudo-random tensor, reproducible across runs
pub fn pattern(shape: &[usize], offset: f64) -> Tensor {
    let numel: usize = shape.iter().product();
    let data: Vec<f64> = (0..numel)
        .map(|i| ((i as f64) * 0.7 + offset).sin() * 0.6)
        .collect();
    Tensor::from_slice(&data, shape).unwrap()
}

/// Deterministic flat parameter vector
pub fn pattern_vec(len: usize, offset: f64) -> Vec<f64> {
    (0..len)
        .map(|i| ((i as f64) * 0.7 + offset).sin() * 0.6)
        .collect()
}

/// Run a model and loss forward, returning the scalar loss value
pub fn loss_value(model: &mut dyn Module, loss: &mut MseLoss, x: &Tensor) -> f64 {
    let out = model.forward(Args::Single(x.clone())).unwrap();
    let l = loss.forward(out).unwrap().single("test").unwrap();
    l.data()[0]
}

/// Run a model forward, returning the flat output values
pub fn output_values(model: &mut dyn Module, x: &Tensor) -> Vec<f64> {
    model
        .forward(Args::Single(x.clone()))
        .unwrap()
        .single("test")
        .unwrap()
        .to_vec()
}

/// Central-difference gradient of a scalar function
pub fn fd_gradient(eval: &mut dyn FnMut(&[f64]) -> f64, theta: &[f64], h: f64) -> Vec<f64> {
    let mut grad = Vec::with_capacity(theta.len());
    for k in 0..theta.len() {
        let mut plus = theta.to_vec();
        plus[k] += h;
        let mut minus = theta.to_vec();
        minus[k] -= h;
        grad.push((eval(&plus) - eval(&minus)) / (2.0 * h));
    }
    grad
}

/// Second-difference Hessian diagonal of a scalar function
pub fn fd_hessian_diag(eval: &mut dyn FnMut(&[f64]) -> f64, theta: &[f64], h: f64) -> Vec<f64> {
    let center = eval(theta);
    let mut diag = Vec::with_capacity(theta.len());
    for k in 0..theta.len() {
        let mut plus = theta.to_vec();
        plus[k] += h;
        let mut minus = theta.to_vec();
        minus[k] -= h;
        diag.push((eval(&plus) - 2.0 * center + eval(&minus)) / (h * h));
    }
    diag
}

/// Finite-difference GGN diagonal
///
/// `eval` maps a flat parameter vector to the flat network outputs;
/// `curvature` is the (constant) loss-Hessian diagonal entry, e.g.
/// `2 / numel` for mean-reduced MSE. The GGN diagonal for parameter `k`
/// is `curvature * sum_j (d out_j / d theta_k)^2`.
pub fn fd_ggn_diag(
    eval: &mut dyn FnMut(&[f64]) -> Vec<f64>,
    theta: &[f64],
    curvature: f64,
    h: f64,
) -> Vec<f64> {
    let mut diag = Vec::with_capacity(theta.len());
    for k in 0..theta.len() {
        let mut plus = theta.to_vec();
        plus[k] += h;
        let mut minus = theta.to_vec();
        minus[k] -= h;
        let out_plus = eval(&plus);
        let out_minus = eval(&minus);
        let value: f64 = out_plus
            .iter()
            .zip(out_minus.iter())
            .map(|(&p, &m)| {
                let j = (p - m) / (2.0 * h);
                j * j
            })
            .sum();
        diag.push(curvature * value);
    }
    diag
}

/// Linear layer from flat row-major weight data
pub fn linear(weight: &[f64], bias: &[f64], out_features: usize, in_features: usize) -> Linear {
    Linear::from_weights(
        Tensor::from_slice(weight, &[out_features, in_features]).unwrap(),
        Some(Tensor::from_slice(bias, &[out_features]).unwrap()),
    )
    .unwrap()
}
