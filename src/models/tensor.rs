//! `Tensor`: the diffusion tensor model.
//!
//! ```text
//! S = S0 · exp(-b · (d (g·n0)² + dperp0 (g·n1)² + dperp1 (g·n2)²))
//! ```
//!
//! with the frame `[n0, n1, n2]` built from `(θ, φ, ψ)`. After fitting, the
//! eigenvalues are sorted so that `d >= dperp0 >= dperp1`.

use crate::domain::{Protocol, ProtocolRow};
use crate::math::{frame_angles, tensor_frame};
use crate::models::model::{ForwardModel, ParamSpec, unweighted_mean};
use crate::models::prefit::{fractional_anisotropy, log_linear_tensor};

const D_MAX: f64 = 1e-8;
const D_SCALE: f64 = 1e-9;

const PARAMS: [ParamSpec; 7] = [
    ParamSpec::bounded("S0.s0", 0.0, f64::INFINITY, 1.0, 1.0),
    ParamSpec::bounded("Tensor.d", 0.0, D_MAX, D_SCALE, 1.7e-9),
    ParamSpec::bounded("Tensor.dperp0", 0.0, D_MAX, D_SCALE, 0.5e-9),
    ParamSpec::bounded("Tensor.dperp1", 0.0, D_MAX, D_SCALE, 0.3e-9),
    ParamSpec::angle("Tensor.theta", 0.0),
    ParamSpec::angle("Tensor.phi", 0.0),
    ParamSpec::angle("Tensor.psi", 0.0),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Tensor;

impl Tensor {
    /// `(AD, RD, MD, FA)` of a finalized parameter vector.
    pub fn scalars(params: &[f64]) -> (f64, f64, f64, f64) {
        let l = [params[1], params[2], params[3]];
        let md = (l[0] + l[1] + l[2]) / 3.0;
        (l[0], (l[1] + l[2]) / 2.0, md, fractional_anisotropy(l))
    }
}

impl ForwardModel for Tensor {
    fn name(&self) -> &str {
        "Tensor"
    }

    fn params(&self) -> &[ParamSpec] {
        &PARAMS
    }

    fn predict(&self, row: &ProtocolRow, params: &[f64]) -> f64 {
        let [n0, n1, n2] = tensor_frame(params[4], params[5], params[6]);
        let g = nalgebra::Vector3::from(row.g);
        let q = params[1] * g.dot(&n0).powi(2) + params[2] * g.dot(&n1).powi(2) + params[3] * g.dot(&n2).powi(2);
        params[0] * (-row.b * q).exp()
    }

    fn predict_all(&self, protocol: &Protocol, params: &[f64], out: &mut [f64]) {
        // The frame only depends on the parameters, not the row.
        let [n0, n1, n2] = tensor_frame(params[4], params[5], params[6]);
        for (o, row) in out.iter_mut().zip(protocol.rows()) {
            let g = nalgebra::Vector3::from(row.g);
            let q = params[1] * g.dot(&n0).powi(2) + params[2] * g.dot(&n1).powi(2) + params[3] * g.dot(&n2).powi(2);
            *o = params[0] * (-row.b * q).exp();
        }
    }

    fn initial_guess(&self, protocol: &Protocol, signal: &[f64]) -> Vec<f64> {
        let Some(pre) = log_linear_tensor(protocol, signal) else {
            let mut x = self.defaults();
            x[0] = unweighted_mean(protocol, signal).unwrap_or(x[0]);
            return x;
        };
        let (theta, phi, psi) = frame_angles(&pre.eigenvectors[0], &pre.eigenvectors[1]);
        let mut x = vec![
            pre.s0,
            pre.eigenvalues[0],
            pre.eigenvalues[1],
            pre.eigenvalues[2],
            theta,
            phi,
            psi,
        ];
        self.constrain(&mut x);
        x
    }

    fn finalize(&self, params: &mut [f64]) {
        let frame = tensor_frame(params[4], params[5], params[6]);
        let mut pairs = [(params[1], frame[0]), (params[2], frame[1]), (params[3], frame[2])];
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let (theta, phi, psi) = frame_angles(&pairs[0].1, &pairs[1].1);
        params[1] = pairs[0].0;
        params[2] = pairs[1].0;
        params[3] = pairs[2].0;
        params[4] = theta;
        params[5] = phi;
        params[6] = psi;
    }

    fn derived_map_names(&self) -> Vec<&'static str> {
        vec!["Tensor.AD", "Tensor.RD", "Tensor.MD", "Tensor.FA"]
    }

    fn derived_maps(&self, params: &[f64]) -> Vec<f64> {
        let (ad, rd, md, fa) = Self::scalars(params);
        vec![ad, rd, md, fa]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Protocol {
        let mut rows = vec![ProtocolRow::new([0.0; 3], 0.0)];
        for (i, g) in [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, -1.0, 0.0],
            [1.0, 0.0, -1.0],
            [0.0, 1.0, -1.0],
            [1.0, 1.0, 1.0],
        ]
        .iter()
        .enumerate()
        {
            rows.push(ProtocolRow::new(*g, if i % 2 == 0 { 1e9 } else { 2e9 }));
        }
        Protocol::new(rows)
    }

    #[test]
    fn finalize_sorts_eigenvalues_without_changing_signal() {
        let p = protocol();
        let mut params = vec![500.0, 0.3e-9, 1.8e-9, 0.6e-9, 0.4, 2.0, 1.0];
        let mut before = vec![0.0; p.len()];
        Tensor.predict_all(&p, &params, &mut before);

        Tensor.finalize(&mut params);
        assert!(params[1] >= params[2] && params[2] >= params[3]);
        let mut after = vec![0.0; p.len()];
        Tensor.predict_all(&p, &params, &mut after);
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "{a} vs {b}");
        }
    }

    #[test]
    fn initial_guess_matches_noiseless_truth() {
        let p = protocol();
        let truth = vec![800.0, 1.5e-9, 0.5e-9, 0.2e-9, 1.0, 0.7, 0.3];
        let mut signal = vec![0.0; p.len()];
        Tensor.predict_all(&p, &truth, &mut signal);

        let guess = Tensor.initial_guess(&p, &signal);
        assert!((guess[0] - 800.0).abs() < 1e-6);
        assert!((guess[1] - 1.5e-9).abs() < 1e-14);
        assert!((guess[3] - 0.2e-9).abs() < 1e-14);
    }

    #[test]
    fn scalars_of_isotropic_tensor() {
        let (ad, rd, md, fa) = Tensor::scalars(&[1.0, 1e-9, 1e-9, 1e-9, 0.0, 0.0, 0.0]);
        assert_eq!(ad, 1e-9);
        assert_eq!(rd, 1e-9);
        assert!((md - 1e-9).abs() < 1e-24);
        assert!(fa < 1e-6);
    }
}
