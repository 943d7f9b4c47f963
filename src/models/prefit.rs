//! Closed-form log-linear tensor fit used to seed the nonlinear models.
//!
//! `ln S = ln S0 - b gᵀ D g` is linear in `(ln S0, Dxx, Dyy, Dzz, Dxy, Dxz, Dyz)`.
//! We solve it by weighted least squares with weights `S²` (the usual
//! first-order correction for the log transform) and eigen-decompose `D`.

use nalgebra::{DMatrix, DVector, Matrix3, SymmetricEigen, Vector3};

use crate::domain::Protocol;
use crate::math::solve_weighted_least_squares;

/// b-values are expressed in units of 1e9 s/m² inside the design matrix so
/// that all columns have comparable magnitude.
const B_UNIT: f64 = 1e9;

/// Eigen-decomposed result of the log-linear fit.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPrefit {
    pub s0: f64,
    /// Eigenvalues in m²/s, sorted descending and clamped to `>= 0`.
    pub eigenvalues: [f64; 3],
    /// Unit eigenvectors matching `eigenvalues`.
    pub eigenvectors: [Vector3<f64>; 3],
}

impl TensorPrefit {
    pub fn mean_diffusivity(&self) -> f64 {
        self.eigenvalues.iter().sum::<f64>() / 3.0
    }

    pub fn fractional_anisotropy(&self) -> f64 {
        fractional_anisotropy(self.eigenvalues)
    }
}

/// Fractional anisotropy of three eigenvalues (0 when all are zero).
pub fn fractional_anisotropy(l: [f64; 3]) -> f64 {
    let md = (l[0] + l[1] + l[2]) / 3.0;
    let num = (l[0] - md).powi(2) + (l[1] - md).powi(2) + (l[2] - md).powi(2);
    let den = l[0] * l[0] + l[1] * l[1] + l[2] * l[2];
    if den <= 0.0 || !den.is_finite() {
        return 0.0;
    }
    (1.5 * num / den).sqrt().min(1.0)
}

/// Log-linear tensor fit. `None` when fewer than seven usable (positive,
/// finite) measurements remain or the design is rank deficient.
pub fn log_linear_tensor(protocol: &Protocol, signal: &[f64]) -> Option<TensorPrefit> {
    let m = protocol.len().min(signal.len());
    let mut x = DMatrix::<f64>::zeros(m, 7);
    let mut y = DVector::<f64>::zeros(m);
    let mut w = vec![0.0; m];

    for (i, row) in protocol.rows().iter().take(m).enumerate() {
        let s = signal[i];
        let b = row.b / B_UNIT;
        let [gx, gy, gz] = row.g;
        x[(i, 0)] = 1.0;
        x[(i, 1)] = -b * gx * gx;
        x[(i, 2)] = -b * gy * gy;
        x[(i, 3)] = -b * gz * gz;
        x[(i, 4)] = -2.0 * b * gx * gy;
        x[(i, 5)] = -2.0 * b * gx * gz;
        x[(i, 6)] = -2.0 * b * gy * gz;
        if s.is_finite() && s > 0.0 {
            y[i] = s.ln();
            w[i] = s * s;
        }
    }

    // Normalize weights so their magnitude does not depend on signal scale.
    let w_max = w.iter().copied().fold(0.0f64, f64::max);
    if w_max <= 0.0 {
        return None;
    }
    for wi in w.iter_mut() {
        *wi /= w_max;
    }

    let beta = solve_weighted_least_squares(&x, &y, &w)?;
    let s0 = beta[0].exp();
    if !s0.is_finite() {
        return None;
    }

    let d = Matrix3::new(
        beta[1], beta[4], beta[5], //
        beta[4], beta[2], beta[6], //
        beta[5], beta[6], beta[3],
    ) / B_UNIT;
    let eig = SymmetricEigen::new(d);

    let mut pairs: Vec<(f64, Vector3<f64>)> = (0..3)
        .map(|k| (eig.eigenvalues[k].max(0.0), eig.eigenvectors.column(k).into_owned()))
        .collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let eigenvalues = [pairs[0].0, pairs[1].0, pairs[2].0];
    if eigenvalues.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(TensorPrefit {
        s0,
        eigenvalues,
        eigenvectors: [pairs[0].1.normalize(), pairs[1].1.normalize(), pairs[2].1.normalize()],
    })
}
