//! Batched fitting: one model over every voxel of a batch.

use std::time::Instant;

use tracing::{info, warn};

use crate::device::{ComputeContext, dispatch};
use crate::domain::{FitConfig, FitResult, FitStatus, VoxelBatch};
use crate::error::{Error, Result};
use crate::fit::fitter::{FitOptions, fit_voxel};
use crate::fit::lm::LmSettings;
use crate::fit::noise_std::resolve_noise_std;
use crate::models::ForwardModel;

impl FitOptions {
    /// Resolve a run configuration against a model and batch (noise model
    /// override, σ estimation).
    pub fn resolve(config: &FitConfig, model: &dyn ForwardModel, batch: &VoxelBatch) -> Self {
        Self {
            noise_model: config.noise_model.unwrap_or_else(|| model.default_noise_model()),
            sigma: resolve_noise_std(config.noise_std, batch),
            lm: LmSettings {
                max_iterations: config.max_iterations,
                step_tolerance: config.step_tolerance,
                objective_tolerance: config.objective_tolerance,
            },
        }
    }
}

/// Per-status voxel counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    pub converged: usize,
    pub max_iterations: usize,
    pub degenerate: usize,
    pub numerical_failure: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[FitResult]) -> Self {
        let mut counts = Self::default();
        for r in results {
            match r.status {
                FitStatus::Converged => counts.converged += 1,
                FitStatus::MaxIterations => counts.max_iterations += 1,
                FitStatus::Degenerate => counts.degenerate += 1,
                FitStatus::NumericalFailure => counts.numerical_failure += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.converged + self.max_iterations + self.degenerate + self.numerical_failure
    }

    pub fn not_converged(&self) -> usize {
        self.total() - self.converged
    }
}

/// Fit `model` to every voxel of `batch` on the devices of `ctx`.
///
/// The returned vector is aligned with `batch.spatial_index()`.
pub fn fit(
    batch: &VoxelBatch,
    model: &dyn ForwardModel,
    ctx: &ComputeContext,
    options: &FitOptions,
) -> Result<Vec<FitResult>> {
    if batch.is_empty() {
        info!(model = model.name(), "empty batch; nothing to fit");
        return Ok(Vec::new());
    }
    if !(options.sigma.is_finite() && options.sigma > 0.0) {
        return Err(Error::InvalidConfig(format!("noise std must be > 0, got {}", options.sigma)));
    }

    let started = Instant::now();
    info!(
        model = model.name(),
        voxels = batch.len(),
        devices = ctx.devices().len(),
        noise_model = ?options.noise_model,
        sigma = options.sigma,
        "fitting"
    );

    let protocol = batch.protocol();
    let job = |signal: &[f64]| fit_voxel(model, protocol, signal, options);
    let results = dispatch(ctx, batch, &job)?;
    if results.len() != batch.len() {
        return Err(Error::ResultMismatch {
            results: results.len(),
            voxels: batch.len(),
        });
    }

    let counts = StatusCounts::from_results(&results);
    info!(
        model = model.name(),
        converged = counts.converged,
        elapsed_s = started.elapsed().as_secs_f64(),
        "fit finished"
    );
    if counts.not_converged() > 0 {
        warn!(
            model = model.name(),
            max_iterations = counts.max_iterations,
            degenerate = counts.degenerate,
            numerical_failure = counts.numerical_failure,
            fraction = counts.not_converged() as f64 / counts.total() as f64,
            "some voxels did not converge"
        );
    }
    Ok(results)
}
