//! Single-voxel fitting.
//!
//! Given:
//! - a forward model and the acquisition protocol
//! - one voxel's observed signal
//! - a noise model and σ
//!
//! we:
//! - detect degenerate signal and skip optimization for it
//! - seed from the model's deterministic initial guess
//! - run Levenberg–Marquardt on `r = (obs - effective prediction) / σ`
//! - canonicalize the parameters and evaluate the log-likelihood

use crate::domain::{FitResult, FitStatus, NoiseModel, Protocol};
use crate::fit::lm::{LeastSquaresProblem, LmSettings, Termination, minimize};
use crate::models::{ForwardModel, total_log_likelihood};

/// Log-likelihood reported when it cannot be evaluated to a finite value.
///
/// NaN rather than a huge negative number: ROI statistics skip it and the
/// information criteria stay NaN instead of overflowing.
pub const DEGENERATE_LOG_LIKELIHOOD: f64 = f64::NAN;

/// Everything a voxel fit needs besides the voxel itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub noise_model: NoiseModel,
    pub sigma: f64,
    pub lm: LmSettings,
}

struct VoxelObjective<'a> {
    model: &'a dyn ForwardModel,
    protocol: &'a Protocol,
    observed: &'a [f64],
    noise_model: NoiseModel,
    sigma: f64,
}

impl LeastSquaresProblem for VoxelObjective<'_> {
    fn n_residuals(&self) -> usize {
        self.observed.len()
    }

    fn residuals(&self, x: &[f64], out: &mut [f64]) {
        self.model.predict_all(self.protocol, x, out);
        for (r, obs) in out.iter_mut().zip(self.observed) {
            *r = (obs - self.noise_model.effective_prediction(*r, self.sigma)) / self.sigma;
        }
    }

    fn project(&self, x: &mut [f64]) {
        self.model.constrain(x);
    }
}

/// A voxel with no finite positive sample, or with any non-finite sample.
pub fn is_degenerate(signal: &[f64]) -> bool {
    signal.iter().any(|v| !v.is_finite()) || !signal.iter().any(|v| *v > 0.0)
}

/// Log-likelihood of `signal` under `params`, or the sentinel when that is
/// not finite.
pub fn log_likelihood(
    model: &dyn ForwardModel,
    protocol: &Protocol,
    signal: &[f64],
    params: &[f64],
    options: &FitOptions,
) -> f64 {
    let mut predicted = vec![0.0; signal.len()];
    model.predict_all(protocol, params, &mut predicted);
    let ll = total_log_likelihood(options.noise_model, signal, &predicted, options.sigma);
    if ll.is_finite() { ll } else { DEGENERATE_LOG_LIKELIHOOD }
}

/// Log-likelihood over the finite samples of `signal` only.
fn finite_log_likelihood(
    model: &dyn ForwardModel,
    protocol: &Protocol,
    signal: &[f64],
    params: &[f64],
    options: &FitOptions,
) -> f64 {
    let mut predicted = vec![0.0; signal.len()];
    model.predict_all(protocol, params, &mut predicted);
    let (observed, predicted): (Vec<f64>, Vec<f64>) = signal
        .iter()
        .zip(&predicted)
        .filter(|(o, _)| o.is_finite())
        .map(|(&o, &p)| (o, p))
        .unzip();
    if observed.is_empty() {
        return DEGENERATE_LOG_LIKELIHOOD;
    }
    let ll = total_log_likelihood(options.noise_model, &observed, &predicted, options.sigma);
    if ll.is_finite() { ll } else { DEGENERATE_LOG_LIKELIHOOD }
}

/// Fit `model` to one voxel.
pub fn fit_voxel(model: &dyn ForwardModel, protocol: &Protocol, signal: &[f64], options: &FitOptions) -> FitResult {
    if is_degenerate(signal) {
        let params = model.defaults();
        return FitResult {
            log_likelihood: finite_log_likelihood(model, protocol, signal, &params, options),
            params,
            status: FitStatus::Degenerate,
            iterations: 0,
        };
    }

    let mut x0 = model.initial_guess(protocol, signal);
    model.constrain(&mut x0);
    let scale: Vec<f64> = model
        .params()
        .iter()
        .zip(&x0)
        .map(|(spec, x)| {
            let s = spec.scale.max(x.abs());
            if s.is_finite() && s > 0.0 { s } else { 1.0 }
        })
        .collect();

    let objective = VoxelObjective {
        model,
        protocol,
        observed: signal,
        noise_model: options.noise_model,
        sigma: options.sigma,
    };
    let outcome = minimize(&objective, x0, &scale, &options.lm);

    let mut params = outcome.x;
    model.finalize(&mut params);
    let log_likelihood = log_likelihood(model, protocol, signal, &params, options);
    let status = match outcome.termination {
        Termination::Converged => FitStatus::Converged,
        Termination::MaxIterations => FitStatus::MaxIterations,
        Termination::NonFinite => FitStatus::NumericalFailure,
    };

    FitResult {
        params,
        log_likelihood,
        status,
        iterations: outcome.iterations,
    }
}
