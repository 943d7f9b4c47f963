//! Noise σ resolution.

use tracing::warn;

use crate::domain::{NoiseStd, VoxelBatch};
use crate::fit::fitter::is_degenerate;

/// σ used when it cannot be estimated from the data.
pub const FALLBACK_NOISE_STD: f64 = 1.0;

/// Mean over voxels of the per-voxel sample std across the unweighted
/// volumes. `None` with fewer than two unweighted volumes or no usable voxel.
///
/// Degenerate voxels are skipped, so σ only depends on voxels that get fitted.
pub fn estimate_noise_std(batch: &VoxelBatch) -> Option<f64> {
    let b0 = batch.protocol().unweighted_indices();
    if b0.len() < 2 {
        return None;
    }

    let n = b0.len() as f64;
    let (sum, count) = batch
        .signals()
        .filter(|signal| !is_degenerate(signal))
        .map(|signal| {
            let values: Vec<f64> = b0.iter().map(|&i| signal[i]).collect();
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        })
        .fold((0.0, 0usize), |(s, c), std| (s + std, c + 1));

    (count > 0).then(|| sum / count as f64)
}

/// σ for a fit: the fixed value, or the batch estimate with a fallback.
pub fn resolve_noise_std(noise_std: NoiseStd, batch: &VoxelBatch) -> f64 {
    match noise_std {
        NoiseStd::Fixed(sigma) => sigma,
        NoiseStd::Auto => match estimate_noise_std(batch) {
            Some(sigma) if sigma.is_finite() && sigma > 0.0 => sigma,
            Some(sigma) => {
                warn!(sigma, fallback = FALLBACK_NOISE_STD, "estimated noise std is not positive; using fallback");
                FALLBACK_NOISE_STD
            }
            None => {
                warn!(
                    unweighted_volumes = batch.protocol().unweighted_indices().len(),
                    fallback = FALLBACK_NOISE_STD,
                    "cannot estimate noise std (fewer than two unweighted volumes or no usable voxel); using fallback"
                );
                FALLBACK_NOISE_STD
            }
        },
    }
}
