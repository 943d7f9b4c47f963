//! Shared "fit pipeline" logic.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! model lookup -> noise resolution -> batched fit -> map assembly -> persistence
//!
//! The CLI and embedding callers then only deal with producing a
//! `VoxelBatch` and presenting the result.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::device::ComputeContext;
use crate::domain::{FitConfig, FitResult, VoxelBatch};
use crate::error::{Error, Result};
use crate::fit::{FitOptions, StatusCounts, fit};
use crate::io::{FitInfo, MapWriter, NiftiVolumes, persist_maps};
use crate::maps::{VolumeMapSet, to_maps};
use crate::models::ModelRegistry;

/// All computed outputs of one model fit.
#[derive(Debug, Clone)]
pub struct ModelRun {
    pub info: FitInfo,
    pub results: Vec<FitResult>,
    pub maps: VolumeMapSet,
    /// `<output>/<model>`.
    pub dir: PathBuf,
}

/// Fit a built-in model and write its maps under `output`.
pub fn fit_model(
    model_name: &str,
    batch: &VoxelBatch,
    output: &Path,
    ctx: &ComputeContext,
    config: &FitConfig,
) -> Result<ModelRun> {
    fit_model_with(&ModelRegistry::with_defaults(), &NiftiVolumes, model_name, batch, output, ctx, config)
}

/// [`fit_model`] with an explicit registry and map writer.
pub fn fit_model_with(
    registry: &ModelRegistry,
    writer: &dyn MapWriter,
    model_name: &str,
    batch: &VoxelBatch,
    output: &Path,
    ctx: &ComputeContext,
    config: &FitConfig,
) -> Result<ModelRun> {
    config.validate()?;
    let model = registry.get(model_name)?;
    let started = Utc::now();
    let clock = Instant::now();

    let options = FitOptions::resolve(config, model.as_ref(), batch);
    let results = fit(batch, model.as_ref(), ctx, &options)?;
    let maps = to_maps(&results, batch, model.as_ref(), config.sentinel)?;

    let info = FitInfo {
        model: model.name().to_string(),
        devices: ctx.devices().iter().map(|d| d.label()).collect(),
        noise_model: options.noise_model,
        noise_std: options.sigma,
        sentinel: config.sentinel,
        voxels: batch.len(),
        measurements: batch.n_measurements(),
        shape: batch.shape(),
        status: StatusCounts::from_results(&results),
        maps: maps.names().map(str::to_string).collect(),
        started,
        finished: Utc::now(),
        elapsed_seconds: clock.elapsed().as_secs_f64(),
    };
    let dir = persist_maps(writer, output, &maps, &info)?;

    Ok(ModelRun {
        info,
        results,
        maps,
        dir,
    })
}

/// Fit several models in sequence, checking `cancel` before each one.
///
/// Every name is resolved before the first fit starts, so a typo fails fast.
/// Models finished before a cancellation keep their output.
///
/// Only embedding callers can cancel: the `voxfit` binary installs no signal
/// handler and passes a flag that is never set.
pub fn fit_models(
    model_names: &[String],
    batch: &VoxelBatch,
    output: &Path,
    ctx: &ComputeContext,
    config: &FitConfig,
    cancel: &AtomicBool,
) -> Result<Vec<ModelRun>> {
    let registry = ModelRegistry::with_defaults();
    for name in model_names {
        registry.get(name)?;
    }

    let mut runs = Vec::with_capacity(model_names.len());
    for name in model_names {
        if cancel.load(Ordering::SeqCst) {
            info!(model = %name, completed = runs.len(), "cancelled");
            return Err(Error::Cancelled(name.clone()));
        }
        runs.push(fit_model_with(&registry, &NiftiVolumes, name, batch, output, ctx, config)?);
    }
    Ok(runs)
}
