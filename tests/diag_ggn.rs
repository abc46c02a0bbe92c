//! DiagGGN and SqrtGGN against finite-difference references

mod common;

use common::*;
use curvr::prelude::*;

const N: usize = 3;
const D_IN: usize = 2;
const HIDDEN: usize = 4;
const D_OUT: usize = 2;

fn data() -> (Tensor, Tensor) {
    (pattern(&[N, D_IN], 0.0), pattern(&[N, D_OUT], 1.3))
}

/// Loss-Hessian diagonal entry of mean-reduced MSE on an `[N, D_OUT]` output
fn mse_curvature() -> f64 {
    2.0 / (N * D_OUT) as f64
}

struct Params {
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
}

fn params() -> Params {
    Params {
        w1: pattern_vec(HIDDEN * D_IN, 0.2),
        b1: pattern_vec(HIDDEN, 0.5),
        w2: pattern_vec(D_OUT * HIDDEN, 0.8),
        b2: pattern_vec(D_OUT, 1.7),
    }
}

fn linear_net(p: &Params) -> Sequential {
    Sequential::new(vec![
        Box::new(linear(&p.w1, &p.b1, HIDDEN, D_IN)) as Box<dyn Module>,
        Box::new(linear(&p.w2, &p.b2, D_OUT, HIDDEN)),
    ])
}

fn tanh_net(p: &Params) -> Sequential {
    Sequential::new(vec![
        Box::new(linear(&p.w1, &p.b1, HIDDEN, D_IN)) as Box<dyn Module>,
        Box::new(Tanh::new()),
        Box::new(linear(&p.w2, &p.b2, D_OUT, HIDDEN)),
    ])
}

fn run_diag_ggn(model: &mut dyn Module) {
    let (x, y) = data();
    let mut loss = MseLoss::new(Reduction::Mean);
    loss.set_target(y);
    let out = model.forward(Args::Single(x)).unwrap();
    loss.forward(out).unwrap();
    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, model, false).unwrap();
}

fn saved_on(model: &Sequential, index: usize, name: &str, savefield: &str) -> Vec<f64> {
    model
        .get(index)
        .unwrap()
        .param(name)
        .unwrap()
        .saved(savefield)
        .unwrap()
        .to_vec()
}

fn grad_on(model: &Sequential, index: usize, name: &str) -> Vec<f64> {
    model
        .get(index)
        .unwrap()
        .param(name)
        .unwrap()
        .grad()
        .unwrap()
        .to_vec()
}

#[test]
fn test_linear_net_weight_diag_matches_finite_differences() {
    let p = params();
    let mut model = linear_net(&p);
    run_diag_ggn(&mut model);

    let (x, _) = data();
    let mut eval = |w1: &[f64]| {
        let rebuilt = Params {
            w1: w1.to_vec(),
            ..params()
        };
        output_values(&mut linear_net(&rebuilt), &x)
    };
    let expected = fd_ggn_diag(&mut eval, &p.w1, mse_curvature(), 1e-5);
    assert_allclose(
        &saved_on(&model, 0, "weight", DiagGgn::SAVEFIELD),
        &expected,
        1e-6,
        1e-9,
    );
}

#[test]
fn test_linear_net_bias_diag_matches_finite_differences() {
    let p = params();
    let mut model = linear_net(&p);
    run_diag_ggn(&mut model);

    let (x, _) = data();
    let mut eval = |b1: &[f64]| {
        let rebuilt = Params {
            b1: b1.to_vec(),
            ..params()
        };
        output_values(&mut linear_net(&rebuilt), &x)
    };
    let expected = fd_ggn_diag(&mut eval, &p.b1, mse_curvature(), 1e-5);
    assert_allclose(
        &saved_on(&model, 0, "bias", DiagGgn::SAVEFIELD),
        &expected,
        1e-6,
        1e-9,
    );
}

#[test]
fn test_tanh_net_diag_matches_finite_differences() {
    let p = params();
    let mut model = tanh_net(&p);
    run_diag_ggn(&mut model);

    let (x, _) = data();
    for (name, theta, index) in [
        ("weight", &p.w1, 0usize),
        ("bias", &p.b1, 0),
        ("weight", &p.w2, 2),
        ("bias", &p.b2, 2),
    ] {
        let mut eval = |t: &[f64]| {
            let mut rebuilt = params();
            match (name, index) {
                ("weight", 0) => rebuilt.w1 = t.to_vec(),
                ("bias", 0) => rebuilt.b1 = t.to_vec(),
                ("weight", 2) => rebuilt.w2 = t.to_vec(),
                _ => rebuilt.b2 = t.to_vec(),
            }
            output_values(&mut tanh_net(&rebuilt), &x)
        };
        let expected = fd_ggn_diag(&mut eval, theta, mse_curvature(), 1e-5);
        assert_allclose(
            &saved_on(&model, index, name, DiagGgn::SAVEFIELD),
            &expected,
            1e-5,
            1e-9,
        );
    }
}

#[test]
fn test_gradients_match_finite_differences() {
    let p = params();
    let mut model = tanh_net(&p);
    run_diag_ggn(&mut model);

    let (x, y) = data();
    let mut eval = |w1: &[f64]| {
        let rebuilt = Params {
            w1: w1.to_vec(),
            ..params()
        };
        let mut loss = MseLoss::new(Reduction::Mean);
        loss.set_target(y.clone());
        loss_value(&mut tanh_net(&rebuilt), &mut loss, &x)
    };
    let expected = fd_gradient(&mut eval, &p.w1, 1e-6);
    assert_allclose(&grad_on(&model, 0, "weight"), &expected, 1e-5, 1e-9);
}

#[test]
fn test_sqrt_ggn_squared_column_sums_equal_diag_ggn() {
    let p = params();
    let mut model = tanh_net(&p);

    let (x, y) = data();
    let mut loss = MseLoss::new(Reduction::Mean);
    loss.set_target(y);
    let out = model.forward(Args::Single(x)).unwrap();
    loss.forward(out).unwrap();

    let mut diag = DiagGgn::new().unwrap();
    diag.backward(&mut loss, &mut model, true).unwrap();
    let mut sqrt = SqrtGgn::new().unwrap();
    sqrt.backward(&mut loss, &mut model, false).unwrap();

    for index in [0usize, 2] {
        for name in ["weight", "bias"] {
            let diag_values = saved_on(&model, index, name, DiagGgn::SAVEFIELD);
            let factor = model
                .get(index)
                .unwrap()
                .param(name)
                .unwrap()
                .saved(SqrtGgn::SAVEFIELD)
                .unwrap()
                .pow2()
                .column_sums()
                .unwrap();
            assert_allclose(factor.data(), &diag_values, 1e-10, 1e-12);
        }
    }
}

#[test]
fn test_noop_flatten_leaves_diag_ggn_unchanged() {
    // a flatten whose reshape changes nothing still fires its hook and
    // must transport the factors untouched
    let p = params();
    let mut plain = tanh_net(&p);
    run_diag_ggn(&mut plain);

    let mut flattened = Sequential::new(vec![
        Box::new(linear(&p.w1, &p.b1, HIDDEN, D_IN)) as Box<dyn Module>,
        Box::new(Flatten::new()),
        Box::new(Tanh::new()),
        Box::new(linear(&p.w2, &p.b2, D_OUT, HIDDEN)),
    ]);
    run_diag_ggn(&mut flattened);

    for index in [0usize, 3] {
        let plain_index = if index == 3 { 2 } else { 0 };
        for name in ["weight", "bias"] {
            assert_allclose(
                &saved_on(&flattened, index, name, DiagGgn::SAVEFIELD),
                &saved_on(&plain, plain_index, name, DiagGgn::SAVEFIELD),
                1e-12,
                0.0,
            );
        }
    }
}

#[test]
fn test_sum_reduction_scales_the_curvature() {
    // mean vs sum differ by exactly numel in loss, gradient and curvature
    let p = params();

    let mut mean_model = tanh_net(&p);
    run_diag_ggn(&mut mean_model);

    let (x, y) = data();
    let mut sum_model = tanh_net(&p);
    let mut loss = MseLoss::new(Reduction::Sum);
    loss.set_target(y);
    let out = sum_model.forward(Args::Single(x)).unwrap();
    loss.forward(out).unwrap();
    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, &mut sum_model, false).unwrap();

    let numel = (N * D_OUT) as f64;
    let mean_diag = saved_on(&mean_model, 0, "weight", DiagGgn::SAVEFIELD);
    let sum_diag = saved_on(&sum_model, 0, "weight", DiagGgn::SAVEFIELD);
    let scaled: Vec<f64> = mean_diag.iter().map(|v| v * numel).collect();
    assert_allclose(&sum_diag, &scaled, 1e-10, 1e-12);
}

#[test]
fn test_residual_network_diag_matches_finite_differences() {
    // x -> Linear -> [Linear -> Tanh -> Linear -> Scale(dt)] + identity -> MSE
    let dt = 0.1;
    let w0 = pattern_vec(D_IN * D_IN, 2.3);
    let b0 = pattern_vec(D_IN, 2.9);
    let p = params();

    let build = |w0: &[f64], w1: &[f64]| -> Sequential {
        Sequential::new(vec![
            Box::new(linear(w0, &b0, D_IN, D_IN)) as Box<dyn Module>,
            Box::new(
                Parallel::new(vec![
                    Box::new(Sequential::new(vec![
                        Box::new(linear(w1, &p.b1, HIDDEN, D_IN)) as Box<dyn Module>,
                        Box::new(Tanh::new()),
                        Box::new(linear(&p.w2, &p.b2, D_IN, HIDDEN)),
                        Box::new(Scale::new(dt)),
                    ])) as Box<dyn Module>,
                    Box::new(ActiveIdentity::new()),
                ])
                .unwrap(),
            ),
        ])
    };

    let (x, y) = data();
    let mut model = build(&w0, &p.w1);

    // forward equality with the hand-written skip connection
    let out = model
        .forward(Args::Single(x.clone()))
        .unwrap()
        .single("test")
        .unwrap();
    let z = {
        let w0t = Tensor::from_slice(&w0, &[D_IN, D_IN]).unwrap();
        let b0t = Tensor::from_slice(&b0, &[D_IN]).unwrap();
        x.matmul(&w0t.transpose().unwrap())
            .unwrap()
            .add_row(&b0t)
            .unwrap()
    };
    let manual = {
        let w1t = Tensor::from_slice(&p.w1, &[HIDDEN, D_IN]).unwrap();
        let b1t = Tensor::from_slice(&p.b1, &[HIDDEN]).unwrap();
        let w2t = Tensor::from_slice(&p.w2, &[D_IN, HIDDEN]).unwrap();
        let b2t = Tensor::from_slice(&p.b2, &[D_IN]).unwrap();
        let hidden = z
            .matmul(&w1t.transpose().unwrap())
            .unwrap()
            .add_row(&b1t)
            .unwrap()
            .map(f64::tanh);
        let residual = hidden
            .matmul(&w2t.transpose().unwrap())
            .unwrap()
            .add_row(&b2t)
            .unwrap()
            .scale(dt);
        z.add(&residual).unwrap()
    };
    assert_allclose(out.data(), manual.data(), 1e-12, 0.0);

    let mut loss = MseLoss::new(Reduction::Mean);
    loss.set_target(y);
    loss.forward(Args::Single(out)).unwrap();
    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, &mut model, false).unwrap();

    // the first layer sits below the fan-out, so its quantity is the
    // merged sum of both branch contributions
    let mut eval_w0 = |t: &[f64]| output_values(&mut build(t, &p.w1), &x);
    let expected_w0 = fd_ggn_diag(&mut eval_w0, &w0, mse_curvature(), 1e-5);
    assert_allclose(
        &saved_on(&model, 0, "weight", DiagGgn::SAVEFIELD),
        &expected_w0,
        1e-5,
        1e-9,
    );

    // a parameter inside the residual branch
    let mut eval_w1 = |t: &[f64]| output_values(&mut build(&w0, t), &x);
    let expected_w1 = fd_ggn_diag(&mut eval_w1, &p.w1, mse_curvature(), 1e-5);
    let branch_weight = {
        let parallel = model
            .get(1)
            .unwrap()
            .as_any()
            .downcast_ref::<Parallel>()
            .unwrap();
        let branch = parallel.children()[0]
            .as_any()
            .downcast_ref::<Branch>()
            .unwrap();
        let seq = branch.children()[0]
            .as_any()
            .downcast_ref::<Sequential>()
            .unwrap();
        seq.get(0)
            .unwrap()
            .param("weight")
            .unwrap()
            .saved(DiagGgn::SAVEFIELD)
            .unwrap()
            .to_vec()
    };
    assert_allclose(&branch_weight, &expected_w1, 1e-5, 1e-9);
}
