//! Pass-state lifecycle: retained backward passes, final cleanup and the
//! stale-state verifier

mod common;

use common::*;
use curvr::prelude::*;
use curvr::verify::io_clear;

fn model() -> Sequential {
    Sequential::new(vec![
        Box::new(linear(&pattern_vec(8, 0.2), &pattern_vec(4, 0.5), 4, 2)) as Box<dyn Module>,
        Box::new(Tanh::new()),
        Box::new(linear(&pattern_vec(8, 0.8), &pattern_vec(2, 1.7), 2, 4)),
    ])
}

fn forward(model: &mut Sequential, loss: &mut MseLoss) {
    let x = pattern(&[3, 2], 0.0);
    loss.set_target(pattern(&[3, 2], 1.3));
    let out = model.forward(Args::Single(x)).unwrap();
    loss.forward(out).unwrap();
}

fn weight_grad(model: &Sequential) -> Vec<f64> {
    model
        .get(0)
        .unwrap()
        .param("weight")
        .unwrap()
        .grad()
        .unwrap()
        .to_vec()
}

#[test]
fn test_io_clear_flags_state_after_forward() {
    let mut net = model();
    let mut loss = MseLoss::new(Reduction::Mean);
    assert!(io_clear(&net).is_ok());

    forward(&mut net, &mut loss);
    let err = io_clear(&net).unwrap_err();
    assert!(matches!(err, Error::StaleState { .. }));
    assert!(io_clear(&loss).is_err());
}

#[test]
fn test_retained_backward_replays_on_one_forward_pass() {
    let mut net = model();
    let mut loss = MseLoss::new(Reduction::Mean);
    forward(&mut net, &mut loss);

    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, &mut net, true).unwrap();
    let single_grad = weight_grad(&net);
    let single_diag = {
        let lin = net.get(0).unwrap();
        lin.param("weight")
            .unwrap()
            .saved(DiagGgn::SAVEFIELD)
            .unwrap()
            .to_vec()
    };

    // pass state survives, further backwards work without a new forward
    assert!(io_clear(&net).is_err());
    extension.backward(&mut loss, &mut net, true).unwrap();
    assert!(io_clear(&net).is_err());
    extension.backward(&mut loss, &mut net, true).unwrap();

    // gradients accumulate, savefields overwrite
    let tripled: Vec<f64> = single_grad.iter().map(|g| 3.0 * g).collect();
    assert_allclose(&weight_grad(&net), &tripled, 1e-12, 0.0);
    let lin = net.get(0).unwrap();
    assert_allclose(
        &lin.param("weight")
            .unwrap()
            .saved(DiagGgn::SAVEFIELD)
            .unwrap()
            .to_vec(),
        &single_diag,
        1e-12,
        0.0,
    );
}

#[test]
fn test_final_backward_clears_all_state() {
    let mut net = model();
    let mut loss = MseLoss::new(Reduction::Mean);
    forward(&mut net, &mut loss);

    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, &mut net, true).unwrap();
    extension.backward(&mut loss, &mut net, false).unwrap();

    assert!(io_clear(&net).is_ok());
    assert!(io_clear(&loss).is_ok());

    // without a fresh forward pass there is nothing to traverse
    let err = extension.backward(&mut loss, &mut net, false).unwrap_err();
    assert!(matches!(err, Error::NoForwardPass { .. }));
}

#[test]
fn test_results_survive_cleanup() {
    let mut net = model();
    let mut loss = MseLoss::new(Reduction::Mean);
    forward(&mut net, &mut loss);

    let mut extension = DiagGgn::new().unwrap();
    extension.backward(&mut loss, &mut net, false).unwrap();

    // savefields and gradients are results, not per-pass state
    let lin = net.get(0).unwrap();
    assert!(lin.param("weight").unwrap().saved(DiagGgn::SAVEFIELD).is_some());
    assert!(lin.param("weight").unwrap().grad().is_some());
    assert!(io_clear(&net).is_ok());
}
