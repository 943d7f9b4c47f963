//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported alongside output maps (`fit_info.json`)
//! - configured from the environment or the CLI

use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// b-values below this (s/m², i.e. 100 s/mm²) count as unweighted volumes.
pub const UNWEIGHTED_B_THRESHOLD: f64 = 1e8;

/// One measurement of the acquisition protocol.
///
/// Units are SI: b in s/m², timings in seconds, gradient amplitude in T/m.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRow {
    /// Unit gradient direction (all zeros for b0 rows).
    pub g: [f64; 3],
    pub b: f64,
    pub big_delta: Option<f64>,
    pub delta: Option<f64>,
    pub gradient_amplitude: Option<f64>,
    pub te: Option<f64>,
    pub tr: Option<f64>,
}

impl ProtocolRow {
    /// A row carrying only a direction and a b-value.
    pub fn new(g: [f64; 3], b: f64) -> Self {
        Self {
            g,
            b,
            big_delta: None,
            delta: None,
            gradient_amplitude: None,
            te: None,
            tr: None,
        }
    }

    pub fn is_unweighted(&self) -> bool {
        self.b < UNWEIGHTED_B_THRESHOLD
    }
}

/// The acquisition protocol: one row per signal volume.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Protocol {
    rows: Vec<ProtocolRow>,
}

impl Protocol {
    /// Build a protocol, normalizing every non-zero gradient direction.
    pub fn new(rows: Vec<ProtocolRow>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                let norm = (row.g[0] * row.g[0] + row.g[1] * row.g[1] + row.g[2] * row.g[2]).sqrt();
                if norm > 1e-12 && norm.is_finite() {
                    for c in row.g.iter_mut() {
                        *c /= norm;
                    }
                } else {
                    row.g = [0.0; 3];
                }
                row
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ProtocolRow] {
        &self.rows
    }

    pub fn b_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(|r| r.b)
    }

    pub fn unweighted_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_unweighted().then_some(i))
            .collect()
    }

    pub fn weighted_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (!r.is_unweighted()).then_some(i))
            .collect()
    }
}

/// The flattened per-voxel problem set.
///
/// `signal` is stored row-major: voxel `i` owns
/// `signal[i * n_measurements..(i + 1) * n_measurements]`.
/// `spatial_index[i]` is that voxel's `(x, y, z)` in the original volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelBatch {
    pub(crate) signal: Vec<f64>,
    pub(crate) n_measurements: usize,
    pub(crate) protocol: Protocol,
    pub(crate) spatial_index: Vec<[usize; 3]>,
    pub(crate) shape: [usize; 3],
}

impl VoxelBatch {
    /// Assemble a batch from already-flattened rows.
    ///
    /// Every row must have one value per protocol row and every spatial index
    /// must lie inside `shape`.
    pub fn new(
        rows: Vec<Vec<f64>>,
        protocol: Protocol,
        spatial_index: Vec<[usize; 3]>,
        shape: [usize; 3],
    ) -> Result<Self, Error> {
        if rows.len() != spatial_index.len() {
            return Err(Error::ResultMismatch {
                results: rows.len(),
                voxels: spatial_index.len(),
            });
        }
        let m = protocol.len();
        let mut signal = Vec::with_capacity(rows.len() * m);
        for row in &rows {
            if row.len() != m {
                return Err(Error::ProtocolMismatch {
                    protocol_rows: m,
                    signal_volumes: row.len(),
                });
            }
            signal.extend_from_slice(row);
        }
        if let Some(bad) = spatial_index
            .iter()
            .find(|idx| idx[0] >= shape[0] || idx[1] >= shape[1] || idx[2] >= shape[2])
        {
            return Err(Error::ShapeMismatch {
                what: "spatial index",
                expected: shape.to_vec(),
                actual: bad.to_vec(),
            });
        }
        Ok(Self {
            signal,
            n_measurements: m,
            protocol,
            spatial_index,
            shape,
        })
    }

    /// Number of voxels in the batch.
    pub fn len(&self) -> usize {
        self.spatial_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spatial_index.is_empty()
    }

    pub fn n_measurements(&self) -> usize {
        self.n_measurements
    }

    /// Observed signal of voxel `i`.
    pub fn signal(&self, i: usize) -> &[f64] {
        let m = self.n_measurements;
        &self.signal[i * m..(i + 1) * m]
    }

    pub fn signals(&self) -> impl Iterator<Item = &[f64]> + '_ {
        // `chunks_exact(0)` panics, and an empty protocol means empty rows.
        let m = self.n_measurements.max(1);
        self.signal.chunks_exact(m).take(self.len())
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn spatial_index(&self) -> &[[usize; 3]] {
        &self.spatial_index
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// A sub-batch of consecutive voxels `[start, end)`, sharing the protocol.
    pub fn slice(&self, start: usize, end: usize) -> VoxelBatch {
        let end = end.min(self.len());
        let start = start.min(end);
        let m = self.n_measurements;
        VoxelBatch {
            signal: self.signal[start * m..end * m].to_vec(),
            n_measurements: m,
            protocol: self.protocol.clone(),
            spatial_index: self.spatial_index[start..end].to_vec(),
            shape: self.shape,
        }
    }
}

/// Outcome of a single voxel's optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    /// The iteration cap was hit before a convergence criterion fired.
    MaxIterations,
    /// The signal carried no usable information (e.g. all zeros).
    Degenerate,
    /// The objective became non-finite during iteration.
    NumericalFailure,
}

impl FitStatus {
    pub const ALL: [FitStatus; 4] = [
        FitStatus::Converged,
        FitStatus::MaxIterations,
        FitStatus::Degenerate,
        FitStatus::NumericalFailure,
    ];

    /// Numeric code written to the `ReturnCodes` map.
    pub fn code(self) -> u8 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::MaxIterations => 1,
            FitStatus::Degenerate => 2,
            FitStatus::NumericalFailure => 3,
        }
    }
}

/// Per-voxel fit output, aligned with `VoxelBatch::spatial_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub params: Vec<f64>,
    pub log_likelihood: f64,
    pub status: FitStatus,
    pub iterations: usize,
}

impl FitResult {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// Noise distribution assumed by the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseModel {
    Gaussian,
    /// Gaussian around `sqrt(S² + σ²)`, a cheap stand-in for the Rician bias.
    #[default]
    OffsetGaussian,
    Rician,
}

impl FromStr for NoiseModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "gaussian" => Ok(NoiseModel::Gaussian),
            "offset-gaussian" | "offsetgaussian" => Ok(NoiseModel::OffsetGaussian),
            "rician" => Ok(NoiseModel::Rician),
            other => Err(Error::InvalidConfig(format!("unknown noise model '{other}'"))),
        }
    }
}

/// Standard deviation of the measurement noise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseStd {
    /// Estimate from the unweighted volumes of the batch.
    #[default]
    Auto,
    Fixed(f64),
}

impl FromStr for NoiseStd {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(NoiseStd::Auto);
        }
        let value: f64 = s
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("noise std '{s}' is not a number or 'auto'")))?;
        if !(value.is_finite() && value > 0.0) {
            return Err(Error::InvalidConfig(format!("noise std must be > 0, got {value}")));
        }
        Ok(NoiseStd::Fixed(value))
    }
}

/// Value written to voxels outside the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Sentinel {
    #[default]
    Zero,
    Nan,
}

impl Sentinel {
    pub fn value(self) -> f64 {
        match self {
            Sentinel::Zero => 0.0,
            Sentinel::Nan => f64::NAN,
        }
    }
}

/// Which compute devices to use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Highest-ranked single device.
    #[default]
    Auto,
    Index(usize),
    Indices(Vec<usize>),
}

impl FromStr for DeviceSelection {
    type Err = Error;

    /// Accepts `auto`, a single index (`1`) or a comma separated list (`0,2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(DeviceSelection::Auto);
        }
        let indices = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidConfig(format!("device index '{}' is not an integer", part.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DeviceSelection::from_indices(indices))
    }
}

impl DeviceSelection {
    pub fn from_indices(mut indices: Vec<usize>) -> Self {
        match indices.len() {
            0 => DeviceSelection::Auto,
            1 => DeviceSelection::Index(indices.remove(0)),
            _ => DeviceSelection::Indices(indices),
        }
    }
}

/// A full run configuration as understood by the pipeline.
///
/// Built from defaults, then the environment (`FitConfig::from_env`), then CLI
/// flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Overrides the model's preferred noise model when set.
    pub noise_model: Option<NoiseModel>,
    pub noise_std: NoiseStd,
    pub max_iterations: usize,
    /// Convergence threshold on the scaled parameter step norm.
    pub step_tolerance: f64,
    /// Convergence threshold on the relative objective improvement.
    pub objective_tolerance: f64,
    pub sentinel: Sentinel,
    pub device: DeviceSelection,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            noise_model: None,
            noise_std: NoiseStd::Auto,
            max_iterations: 250,
            step_tolerance: 1e-8,
            objective_tolerance: 1e-10,
            sentinel: Sentinel::Zero,
            device: DeviceSelection::Auto,
        }
    }
}

impl FitConfig {
    /// Defaults overlaid with `VOXFIT_*` variables from the environment (and `.env`).
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("VOXFIT_DEVICE") {
            config.device = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("VOXFIT_NOISE_STD") {
            config.noise_std = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("VOXFIT_NOISE_MODEL") {
            config.noise_model = Some(raw.parse()?);
        }
        if let Ok(raw) = std::env::var("VOXFIT_MAX_ITERATIONS") {
            config.max_iterations = raw.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("VOXFIT_MAX_ITERATIONS '{raw}' is not an integer"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("max_iterations must be >= 1".into()));
        }
        if !(self.step_tolerance.is_finite() && self.step_tolerance > 0.0) {
            return Err(Error::InvalidConfig("step_tolerance must be > 0".into()));
        }
        if !(self.objective_tolerance.is_finite() && self.objective_tolerance > 0.0) {
            return Err(Error::InvalidConfig("objective_tolerance must be > 0".into()));
        }
        if let NoiseStd::Fixed(sigma) = self.noise_std {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(Error::InvalidConfig(format!("noise std must be > 0, got {sigma}")));
            }
        }
        Ok(())
    }
}
