//! Likelihoods for the supported noise models.
//!
//! The optimizer minimizes `½ Σ ((obs - effective_prediction) / σ)²`. For the
//! Gaussian model this is exactly the negative log-likelihood up to a constant;
//! the offset-Gaussian model shifts the prediction to `sqrt(S² + σ²)` to absorb
//! the Rician noise floor. Rician fits use the same offset residual and report
//! the exact Rician log-likelihood.

use std::f64::consts::PI;

use crate::domain::NoiseModel;

/// Observations at or below zero are floored here before taking logarithms.
const RICIAN_OBS_FLOOR: f64 = 1e-12;

impl NoiseModel {
    /// Prediction the residual is taken against.
    pub fn effective_prediction(self, predicted: f64, sigma: f64) -> f64 {
        match self {
            NoiseModel::Gaussian => predicted,
            NoiseModel::OffsetGaussian | NoiseModel::Rician => (predicted * predicted + sigma * sigma).sqrt(),
        }
    }

    /// Log-likelihood of a single observation.
    pub fn log_likelihood(self, observed: f64, predicted: f64, sigma: f64) -> f64 {
        let var = sigma * sigma;
        match self {
            NoiseModel::Gaussian | NoiseModel::OffsetGaussian => {
                let r = observed - self.effective_prediction(predicted, sigma);
                -0.5 * (2.0 * PI * var).ln() - r * r / (2.0 * var)
            }
            NoiseModel::Rician => {
                let o = observed.max(RICIAN_OBS_FLOOR);
                let p = predicted.abs();
                (o / var).ln() - (o * o + p * p) / (2.0 * var) + log_bessel_i0(o * p / var)
            }
        }
    }
}

/// Summed log-likelihood over a voxel's measurements.
pub fn total_log_likelihood(noise: NoiseModel, observed: &[f64], predicted: &[f64], sigma: f64) -> f64 {
    observed
        .iter()
        .zip(predicted)
        .map(|(&o, &p)| noise.log_likelihood(o, p, sigma))
        .sum()
}

/// `ln I0(x)` for `x >= 0`, stable for large arguments.
///
/// Polynomial approximations from Abramowitz & Stegun 9.8.1 / 9.8.2.
pub fn log_bessel_i0(x: f64) -> f64 {
    let x = x.abs();
    if x <= 3.75 {
        let t = (x / 3.75).powi(2);
        let i0 = 1.0
            + t * (3.5156229
                + t * (3.0899424 + t * (1.2067492 + t * (0.2659732 + t * (0.0360768 + t * 0.0045813)))));
        i0.ln()
    } else {
        let t = 3.75 / x;
        let poly = 0.39894228
            + t * (0.01328592
                + t * (0.00225319
                    + t * (-0.00157565
                        + t * (0.00916281
                            + t * (-0.02057706 + t * (0.02635537 + t * (-0.01647633 + t * 0.00392377)))))));
        x - 0.5 * x.ln() + poly.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_peak_matches_normal_density() {
        let ll = NoiseModel::Gaussian.log_likelihood(5.0, 5.0, 2.0);
        let expected = -(2.0 * PI * 4.0).ln() / 2.0;
        assert!((ll - expected).abs() < 1e-12);
    }

    #[test]
    fn offset_gaussian_shifts_prediction() {
        let p = NoiseModel::OffsetGaussian.effective_prediction(3.0, 4.0);
        assert!((p - 5.0).abs() < 1e-12);
    }

    #[test]
    fn log_bessel_matches_known_values() {
        // I0(1) = 1.2660658777, I0(10) = 2815.716628
        assert!((log_bessel_i0(1.0) - 1.2660658777f64.ln()).abs() < 1e-6);
        assert!((log_bessel_i0(10.0) - 2815.716628f64.ln()).abs() < 1e-6);
        assert!(log_bessel_i0(1e6).is_finite());
    }

    #[test]
    fn rician_is_finite_at_zero_signal() {
        let ll = NoiseModel::Rician.log_likelihood(0.0, 0.0, 1.0);
        assert!(ll.is_finite());
    }
}
