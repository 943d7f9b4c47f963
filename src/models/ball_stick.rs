//! `BallStick_rN`: an isotropic ball plus `N` sticks.
//!
//! ```text
//! S = S0 · (w_ball · exp(-b d_ball) + Σ w_i · exp(-b d_stick (g·n_i)²))
//! ```
//!
//! Diffusivities are fixed; the free parameters are `S0`, one volume fraction
//! and one direction per stick. `w_ball = 1 - Σ w_i` is dependent.

use nalgebra::Vector3;

use crate::domain::{Protocol, ProtocolRow};
use crate::math::{canonicalize_angles, angles_of, direction};
use crate::models::model::{ForwardModel, ParamSpec, unweighted_mean};
use crate::models::prefit::log_linear_tensor;

/// Ball diffusivity, m²/s.
pub const BALL_D: f64 = 3.0e-9;
/// Stick diffusivity, m²/s.
pub const STICK_D: f64 = 1.7e-9;

const W_NAMES: [&str; 3] = ["w_stick0.w", "w_stick1.w", "w_stick2.w"];
const THETA_NAMES: [&str; 3] = ["Stick0.theta", "Stick1.theta", "Stick2.theta"];
const PHI_NAMES: [&str; 3] = ["Stick0.phi", "Stick1.phi", "Stick2.phi"];

#[derive(Debug, Clone)]
pub struct BallStick {
    name: String,
    n_sticks: usize,
    params: Vec<ParamSpec>,
}

impl BallStick {
    /// A ball plus `n_sticks` sticks (1 to 3).
    pub fn new(n_sticks: usize) -> Self {
        let n_sticks = n_sticks.clamp(1, 3);
        let mut params = vec![ParamSpec::bounded("S0.s0", 0.0, f64::INFINITY, 1.0, 1.0)];
        for i in 0..n_sticks {
            params.push(ParamSpec::bounded(W_NAMES[i], 0.0, 1.0, 1.0, 0.2 / n_sticks as f64));
            params.push(ParamSpec::angle(THETA_NAMES[i], 0.0));
            params.push(ParamSpec::angle(PHI_NAMES[i], 0.0));
        }
        Self {
            name: format!("BallStick_r{n_sticks}"),
            n_sticks,
            params,
        }
    }

    pub fn n_sticks(&self) -> usize {
        self.n_sticks
    }

    fn stick_weight_sum(&self, params: &[f64]) -> f64 {
        (0..self.n_sticks).map(|i| params[1 + 3 * i]).sum()
    }
}

impl ForwardModel for BallStick {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    fn predict(&self, row: &ProtocolRow, params: &[f64]) -> f64 {
        let g = Vector3::from(row.g);
        let w_ball = 1.0 - self.stick_weight_sum(params);
        let mut s = w_ball * (-row.b * BALL_D).exp();
        for i in 0..self.n_sticks {
            let base = 1 + 3 * i;
            let n = direction(params[base + 1], params[base + 2]);
            s += params[base] * (-row.b * STICK_D * g.dot(&n).powi(2)).exp();
        }
        params[0] * s
    }

    fn initial_guess(&self, protocol: &Protocol, signal: &[f64]) -> Vec<f64> {
        let mut x = self.defaults();
        let pre = log_linear_tensor(protocol, signal);
        x[0] = unweighted_mean(protocol, signal)
            .or_else(|| pre.as_ref().map(|p| p.s0))
            .unwrap_or(x[0]);

        let Some(pre) = pre else {
            return x;
        };

        // Total stick fraction from anisotropy, split 1 : 1/2 : 1/4 over the
        // tensor's eigenvectors.
        let total = pre.fractional_anisotropy().clamp(0.2, 0.8);
        let shares: Vec<f64> = (0..self.n_sticks).map(|i| 0.5f64.powi(i as i32)).collect();
        let share_sum: f64 = shares.iter().sum();
        for i in 0..self.n_sticks {
            let (theta, phi) = angles_of(&pre.eigenvectors[i]);
            x[1 + 3 * i] = total * shares[i] / share_sum;
            x[2 + 3 * i] = theta;
            x[3 + 3 * i] = phi;
        }
        self.constrain(&mut x);
        x
    }

    fn constrain(&self, params: &mut [f64]) {
        for (value, spec) in params.iter_mut().zip(&self.params) {
            *value = spec.clamp(*value);
        }
        let sum = self.stick_weight_sum(params);
        if sum > 1.0 {
            for i in 0..self.n_sticks {
                params[1 + 3 * i] /= sum;
            }
        }
    }

    fn finalize(&self, params: &mut [f64]) {
        let mut sticks: Vec<(f64, f64, f64)> = (0..self.n_sticks)
            .map(|i| {
                let base = 1 + 3 * i;
                let (theta, phi) = canonicalize_angles(params[base + 1], params[base + 2]);
                (params[base], theta, phi)
            })
            .collect();
        // Largest fraction first; stable so ties keep their order.
        sticks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        for (i, (w, theta, phi)) in sticks.into_iter().enumerate() {
            params[1 + 3 * i] = w;
            params[2 + 3 * i] = theta;
            params[3 + 3 * i] = phi;
        }
    }

    fn derived_map_names(&self) -> Vec<&'static str> {
        vec!["w_ball.w", "FS"]
    }

    fn derived_maps(&self, params: &[f64]) -> Vec<f64> {
        let fs = self.stick_weight_sum(params);
        vec![1.0 - fs, fs]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Protocol {
        let mut rows = vec![ProtocolRow::new([0.0; 3], 0.0), ProtocolRow::new([0.0; 3], 0.0)];
        for k in 0..30 {
            let t = k as f64 * 0.7;
            let g = [t.cos() * (0.3 * t).sin(), t.sin() * (0.3 * t).sin(), (0.3 * t).cos()];
            rows.push(ProtocolRow::new(g, if k % 2 == 0 { 1e9 } else { 2e9 }));
        }
        Protocol::new(rows)
    }

    #[test]
    fn names_follow_stick_count() {
        let m = BallStick::new(2);
        assert_eq!(m.name(), "BallStick_r2");
        let names: Vec<&str> = m.params().iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec!["S0.s0", "w_stick0.w", "Stick0.theta", "Stick0.phi", "w_stick1.w", "Stick1.theta", "Stick1.phi"]
        );
    }

    #[test]
    fn constrain_keeps_fractions_in_simplex() {
        let m = BallStick::new(2);
        let mut x = vec![100.0, 0.9, 0.0, 0.0, 0.6, 1.0, 1.0];
        m.constrain(&mut x);
        assert!((x[1] + x[4] - 1.0).abs() < 1e-12);
        let mut y = vec![100.0, -0.5, 0.0, 0.0, 0.3, 1.0, 1.0];
        m.constrain(&mut y);
        assert_eq!(y[1], 0.0);
    }

    #[test]
    fn b0_signal_equals_s0() {
        let m = BallStick::new(1);
        let s = m.predict(&ProtocolRow::new([0.0; 3], 0.0), &[250.0, 0.4, 0.3, 1.2]);
        assert!((s - 250.0).abs() < 1e-9);
    }

    #[test]
    fn initial_guess_is_feasible_and_deterministic() {
        let p = protocol();
        let m = BallStick::new(3);
        let truth = vec![300.0, 0.5, 1.0, 0.4, 0.2, 2.0, 1.0, 0.1, 0.3, 2.5];
        let mut signal = vec![0.0; p.len()];
        m.predict_all(&p, &truth, &mut signal);

        let a = m.initial_guess(&p, &signal);
        let b = m.initial_guess(&p, &signal);
        assert_eq!(a, b);
        assert!((a[0] - 300.0).abs() < 1e-9);
        assert!(m.stick_weight_sum(&a) <= 1.0 + 1e-12);
    }
}
