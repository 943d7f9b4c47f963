//! The forward-model contract.
//!
//! The optimizer relies on a handful of primitive operations:
//!
//! - predict the signal of one protocol row for a parameter vector
//! - produce a deterministic initial guess from a voxel's own signal
//! - pull a trial parameter vector back inside the feasible set
//! - canonicalize a fitted vector (angles, component ordering)
//!
//! Implementations must be pure: the same model instance is evaluated for many
//! voxels concurrently without synchronization.

use std::fmt::Debug;

use crate::domain::{NoiseModel, Protocol, ProtocolRow};

/// Free parameter declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Map name, `<compartment>.<parameter>` (e.g. `Tensor.d`).
    pub name: &'static str,
    pub lower: f64,
    pub upper: f64,
    /// Typical magnitude; the optimizer works in units of this.
    pub scale: f64,
    /// Value used when no better guess exists (degenerate voxels).
    pub default: f64,
    /// Orientation angles are left unbounded during the fit and folded back
    /// by [`ForwardModel::finalize`].
    pub periodic: bool,
}

impl ParamSpec {
    pub const fn bounded(name: &'static str, lower: f64, upper: f64, scale: f64, default: f64) -> Self {
        Self {
            name,
            lower,
            upper,
            scale,
            default,
            periodic: false,
        }
    }

    pub const fn angle(name: &'static str, default: f64) -> Self {
        Self {
            name,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            scale: 1.0,
            default,
            periodic: true,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if self.periodic {
            value
        } else {
            value.clamp(self.lower, self.upper)
        }
    }
}

/// A named parametric signal model.
pub trait ForwardModel: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn params(&self) -> &[ParamSpec];

    fn n_params(&self) -> usize {
        self.params().len()
    }

    /// Noise model used when the run does not override it.
    fn default_noise_model(&self) -> NoiseModel {
        NoiseModel::OffsetGaussian
    }

    /// Predicted signal for one measurement.
    fn predict(&self, row: &ProtocolRow, params: &[f64]) -> f64;

    /// Predicted signal for every measurement of `protocol`.
    fn predict_all(&self, protocol: &Protocol, params: &[f64], out: &mut [f64]) {
        for (o, row) in out.iter_mut().zip(protocol.rows()) {
            *o = self.predict(row, params);
        }
    }

    /// Deterministic starting point for `signal`.
    fn initial_guess(&self, protocol: &Protocol, signal: &[f64]) -> Vec<f64>;

    /// Fallback parameters (used for degenerate voxels).
    fn defaults(&self) -> Vec<f64> {
        self.params().iter().map(|p| p.default).collect()
    }

    /// Project a trial vector onto the feasible set.
    fn constrain(&self, params: &mut [f64]) {
        for (value, spec) in params.iter_mut().zip(self.params()) {
            *value = spec.clamp(*value);
        }
    }

    /// Canonical form of a fitted vector. Must not change predictions.
    fn finalize(&self, _params: &mut [f64]) {}

    /// Names of additional maps computed from fitted parameters.
    fn derived_map_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Values for [`ForwardModel::derived_map_names`], in the same order.
    fn derived_maps(&self, _params: &[f64]) -> Vec<f64> {
        Vec::new()
    }
}

/// Mean of the unweighted measurements, or of all positive samples when the
/// protocol has no b0 volumes. `None` if nothing usable remains.
pub fn unweighted_mean(protocol: &Protocol, signal: &[f64]) -> Option<f64> {
    let positive_mean = |values: &mut dyn Iterator<Item = f64>| -> Option<f64> {
        let (sum, n) = values
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let mean = sum / n.max(1) as f64;
        (n > 0 && mean > 0.0).then_some(mean)
    };

    let b0 = protocol.unweighted_indices();
    positive_mean(&mut b0.iter().filter_map(|&i| signal.get(i).copied()))
        .or_else(|| positive_mean(&mut signal.iter().copied().filter(|v| *v > 0.0)))
}
