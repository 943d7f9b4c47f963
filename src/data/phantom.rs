//! Synthetic diffusion phantoms.
//!
//! A phantom is an ellipsoidal mask filling the volume, ground-truth
//! parameters drawn per voxel around the model's defaults, the noiseless
//! signal of those parameters under a standard two-shell protocol, and
//! Gaussian or Rician noise at a given SNR. Everything is driven by one seed.

use ndarray::{Array3, Array4};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Protocol, ProtocolRow, selected_indices};
use crate::error::{Error, Result};
use crate::models::ForwardModel;

/// S0 used for every phantom voxel.
pub const PHANTOM_S0: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhantomNoise {
    Gaussian,
    #[default]
    Rician,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhantomSpec {
    pub shape: [usize; 3],
    /// `S0 / σ`.
    pub snr: f64,
    pub seed: u64,
    pub noise: PhantomNoise,
}

impl Default for PhantomSpec {
    fn default() -> Self {
        Self {
            shape: [8, 8, 4],
            snr: 30.0,
            seed: 42,
            noise: PhantomNoise::Rician,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Phantom {
    /// `[x, y, z, measurement]`.
    pub signal: Array4<f64>,
    pub protocol: Protocol,
    pub mask: Array3<bool>,
    /// Ground truth per mask voxel, in scan order.
    pub truth: Vec<Vec<f64>>,
    pub sigma: f64,
}

/// Three b0 volumes plus 30 directions on each of the b = 1000 and
/// b = 2000 s/mm² shells.
pub fn two_shell_protocol() -> Protocol {
    let mut rows = vec![ProtocolRow::new([0.0; 3], 0.0); 3];
    for b in [1e9, 2e9] {
        rows.extend(fibonacci_sphere(30).into_iter().map(|g| ProtocolRow::new(g, b)));
    }
    Protocol::new(rows)
}

/// `n` near-uniform directions on the upper hemisphere.
pub fn fibonacci_sphere(n: usize) -> Vec<[f64; 3]> {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let t = golden * i as f64;
            [r * t.cos(), r * t.sin(), z]
        })
        .collect()
}

/// Voxels inside the ellipsoid inscribed in `shape`.
pub fn ellipsoid_mask(shape: [usize; 3]) -> Array3<bool> {
    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(x, y, z)| {
        let d: f64 = [x, y, z]
            .iter()
            .zip(shape)
            .map(|(&i, n)| {
                let half = n as f64 / 2.0;
                ((i as f64 + 0.5 - half) / half).powi(2)
            })
            .sum();
        d <= 1.0
    })
}

/// Simulate `model` over an ellipsoid.
pub fn simulate(model: &dyn ForwardModel, spec: &PhantomSpec) -> Result<Phantom> {
    if !(spec.snr.is_finite() && spec.snr > 0.0) {
        return Err(Error::InvalidConfig(format!("snr must be > 0, got {}", spec.snr)));
    }
    let protocol = two_shell_protocol();
    let mask = ellipsoid_mask(spec.shape);
    let sigma = PHANTOM_S0 / spec.snr;
    let noise = Normal::new(0.0, sigma).map_err(|e| Error::InvalidConfig(format!("noise distribution: {e}")))?;
    let mut rng = StdRng::seed_from_u64(spec.seed);

    let m = protocol.len();
    let [nx, ny, nz] = spec.shape;
    let mut signal = Array4::<f64>::zeros((nx, ny, nz, m));
    let mut truth = Vec::new();
    let mut clean = vec![0.0; m];

    for [x, y, z] in selected_indices(&mask) {
        let params = draw_params(model, &mut rng);
        model.predict_all(&protocol, &params, &mut clean);
        for (t, &s) in clean.iter().enumerate() {
            signal[[x, y, z, t]] = s;
        }
        truth.push(params);
    }

    // Noise everywhere, including the background.
    for v in signal.iter_mut() {
        let n1 = noise.sample(&mut rng);
        *v = match spec.noise {
            PhantomNoise::Gaussian => *v + n1,
            PhantomNoise::Rician => {
                let n2 = noise.sample(&mut rng);
                ((*v + n1).powi(2) + n2 * n2).sqrt()
            }
        };
    }

    Ok(Phantom {
        signal,
        protocol,
        mask,
        truth,
        sigma,
    })
}

/// Defaults jittered by ±30%, random orientations, S0 fixed.
fn draw_params(model: &dyn ForwardModel, rng: &mut StdRng) -> Vec<f64> {
    let mut params: Vec<f64> = model
        .params()
        .iter()
        .map(|spec| {
            if spec.name == "S0.s0" {
                PHANTOM_S0
            } else if spec.periodic {
                rng.gen_range(0.0..std::f64::consts::PI)
            } else {
                spec.clamp(spec.default * rng.gen_range(0.7..1.3))
            }
        })
        .collect();
    model.constrain(&mut params);
    model.finalize(&mut params);
    params
}
