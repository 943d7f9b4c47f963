//! Linear least squares used by the closed-form pre-fits.
//!
//! Initial guesses for the diffusion models come from a log-linear tensor fit:
//!
//! ```text
//! minimize Σ w_i (ln S_i - x_i^T β)^2
//! ```
//!
//! which is linear in β. We scale rows by `sqrt(w_i)` and solve with SVD so that
//! tall and rank-deficient design matrices (e.g. too few gradient directions)
//! still return a finite answer or a clean `None`.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Progressively looser tolerances: a nearly collinear gradient scheme should
    // still give a usable (if approximate) pre-fit.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted variant of [`solve_least_squares`].
///
/// Rows with non-finite or non-positive weights are dropped.
pub fn solve_weighted_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &[f64],
) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || w.len() != y.len() {
        return None;
    }
    let keep: Vec<usize> = (0..w.len()).filter(|&i| w[i].is_finite() && w[i] > 0.0).collect();
    if keep.len() < x.ncols() {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(keep.len(), x.ncols());
    let mut yw = DVector::<f64>::zeros(keep.len());
    for (r, &i) in keep.iter().enumerate() {
        let sw = w[i].sqrt();
        for c in 0..x.ncols() {
            xw[(r, c)] = x[(i, c)] * sw;
        }
        yw[r] = y[i] * sw;
    }
    solve_least_squares(&xw, &yw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn zero_weight_rows_are_ignored() {
        // The last row is an outlier but carries no weight.
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0, 100.0]);
        let beta = solve_weighted_least_squares(&x, &y, &[1.0, 1.0, 1.0, 0.0]).unwrap();
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn too_few_rows_is_none() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0]);
        assert!(solve_weighted_least_squares(&x, &y, &[1.0, 0.0]).is_none());
    }
}
