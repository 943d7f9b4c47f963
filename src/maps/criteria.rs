//! Information criteria from a maximized log-likelihood.
//!
//! With `k` free parameters and `n` measurements:
//!
//! - `BIC  = -2 LL + k ln n`
//! - `AIC  = -2 LL + 2k`
//! - `AICc = AIC + 2k(k + 1) / (n - k - 1)`, undefined (NaN) when `n <= k + 1`

pub fn bic(log_likelihood: f64, k: usize, n: usize) -> f64 {
    -2.0 * log_likelihood + k as f64 * (n as f64).ln()
}

pub fn aic(log_likelihood: f64, k: usize) -> f64 {
    -2.0 * log_likelihood + 2.0 * k as f64
}

pub fn aicc(log_likelihood: f64, k: usize, n: usize) -> f64 {
    if n <= k + 1 {
        return f64::NAN;
    }
    let k_f = k as f64;
    aic(log_likelihood, k) + 2.0 * k_f * (k_f + 1.0) / (n as f64 - k_f - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_penalize_parameters() {
        assert!((bic(-10.0, 2, 100) - (20.0 + 2.0 * 100f64.ln())).abs() < 1e-12);
        assert_eq!(aic(-10.0, 2), 24.0);
        assert!((aicc(-10.0, 2, 10) - (24.0 + 12.0 / 7.0)).abs() < 1e-12);
        assert!(aicc(-10.0, 7, 8).is_nan());
    }
}
