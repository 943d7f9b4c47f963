//! Levenberg–Marquardt for small dense least-squares problems.
//!
//! Minimizes `½ Σ rᵢ(x)²`. The optimizer works in scaled coordinates
//! `u = x / scale` so that parameters of very different magnitude (S0 in
//! signal units, diffusivities around 1e-9 m²/s) take comparable steps.
//!
//! - Jacobian: central differences in `u`
//! - damping: Marquardt, `(JᵀJ + λ diag(JᵀJ)) δ = -Jᵀr`
//! - λ: ×0.1 on accept, ×10 on reject, clamped to `[1e-12, 1e12]`
//!
//! Every trial point is passed through [`LeastSquaresProblem::project`] before
//! it is evaluated.

use nalgebra::{DMatrix, DVector};

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
/// Relative central-difference step in scaled coordinates.
const FD_STEP: f64 = 1e-6;
/// Floor for zero diagonal entries of `JᵀJ`, relative to the largest one.
const DIAG_FLOOR: f64 = 1e-12;

/// A residual vector over a parameter vector.
pub trait LeastSquaresProblem {
    fn n_residuals(&self) -> usize;

    fn residuals(&self, x: &[f64], out: &mut [f64]);

    /// Pull `x` back into the feasible set.
    fn project(&self, _x: &mut [f64]) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmSettings {
    pub max_iterations: usize,
    pub step_tolerance: f64,
    pub objective_tolerance: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 250,
            step_tolerance: 1e-8,
            objective_tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    MaxIterations,
    /// The objective (or Jacobian) stopped being finite.
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    /// Last accepted point; always one where the objective was finite, unless
    /// the starting point itself was not.
    pub x: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

fn half_sum_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

/// Minimize `problem` from `x0`. `scale` has one positive entry per parameter.
pub fn minimize<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    x0: Vec<f64>,
    scale: &[f64],
    settings: &LmSettings,
) -> LmOutcome {
    let n = x0.len();
    let m = problem.n_residuals();

    let mut x = x0;
    problem.project(&mut x);
    let mut r = vec![0.0; m];
    problem.residuals(&x, &mut r);
    let mut cost = half_sum_sq(&r);

    let done = |x: Vec<f64>, cost: f64, iterations: usize, termination: Termination| LmOutcome {
        x,
        cost,
        iterations,
        termination,
    };

    if !cost.is_finite() {
        return done(x, cost, 0, Termination::NonFinite);
    }
    if n == 0 || cost == 0.0 {
        return done(x, cost, 0, Termination::Converged);
    }

    let mut lambda = LAMBDA_INIT;
    let mut jac = DMatrix::<f64>::zeros(m, n);
    let mut trial = vec![0.0; n];
    let mut r_trial = vec![0.0; m];

    for iteration in 1..=settings.max_iterations {
        if !jacobian(problem, &x, scale, &mut jac) {
            return done(x, cost, iteration, Termination::NonFinite);
        }
        let jtj = jac.transpose() * &jac;
        let neg_grad = -(jac.transpose() * DVector::from_column_slice(&r));
        if neg_grad.iter().all(|g| *g == 0.0) {
            return done(x, cost, iteration, Termination::Converged);
        }

        let max_diag = (0..n).map(|j| jtj[(j, j)]).fold(0.0f64, f64::max);
        let floor = (DIAG_FLOOR * max_diag).max(f64::MIN_POSITIVE);

        loop {
            let mut a = jtj.clone();
            for j in 0..n {
                a[(j, j)] += lambda * jtj[(j, j)].max(floor);
            }

            let accepted = match a.cholesky() {
                Some(chol) => {
                    let du = chol.solve(&neg_grad);
                    for j in 0..n {
                        trial[j] = x[j] + du[j] * scale[j];
                    }
                    problem.project(&mut trial);
                    problem.residuals(&trial, &mut r_trial);
                    let cost_trial = half_sum_sq(&r_trial);
                    if !cost_trial.is_finite() {
                        return done(x, cost, iteration, Termination::NonFinite);
                    }
                    (cost_trial < cost).then_some(cost_trial)
                }
                None => None,
            };

            if let Some(cost_trial) = accepted {
                let step_norm = (0..n)
                    .map(|j| ((trial[j] - x[j]) / scale[j]).powi(2))
                    .sum::<f64>()
                    .sqrt();
                let improvement = (cost - cost_trial) / cost;

                x.copy_from_slice(&trial);
                r.copy_from_slice(&r_trial);
                cost = cost_trial;
                lambda = (lambda * 0.1).max(LAMBDA_MIN);

                if step_norm < settings.step_tolerance || improvement < settings.objective_tolerance {
                    return done(x, cost, iteration, Termination::Converged);
                }
                break;
            }

            if lambda >= LAMBDA_MAX {
                // No descent direction left at maximal damping: a stationary point.
                return done(x, cost, iteration, Termination::Converged);
            }
            lambda = (lambda * 10.0).min(LAMBDA_MAX);
        }
    }

    done(x, cost, settings.max_iterations, Termination::MaxIterations)
}

/// Central-difference Jacobian with respect to the scaled coordinates.
/// Returns `false` if any entry is not finite.
fn jacobian<P: LeastSquaresProblem + ?Sized>(problem: &P, x: &[f64], scale: &[f64], jac: &mut DMatrix<f64>) -> bool {
    let m = jac.nrows();
    let mut probe = x.to_vec();
    let mut r_plus = vec![0.0; m];
    let mut r_minus = vec![0.0; m];

    for j in 0..x.len() {
        let h = FD_STEP * (x[j] / scale[j]).abs().max(1.0);
        probe[j] = x[j] + h * scale[j];
        problem.residuals(&probe, &mut r_plus);
        probe[j] = x[j] - h * scale[j];
        problem.residuals(&probe, &mut r_minus);
        probe[j] = x[j];

        for i in 0..m {
            let d = (r_plus[i] - r_minus[i]) / (2.0 * h);
            if !d.is_finite() {
                return false;
            }
            jac[(i, j)] = d;
        }
    }
    true
}
