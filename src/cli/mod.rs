//! Command-line parsing for the voxel-wise model fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code. Flags override values read from the environment.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{NoiseModel, Sentinel};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "voxfit", version, about = "Voxel-wise diffusion MRI model fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List compute devices in enumeration order; `*` marks the automatic choice.
    ListDevices,
    /// Fit one or more models to every masked voxel and write their maps.
    Fit(FitArgs),
    /// Print statistics of a map inside a mask.
    Roi(RoiArgs),
    /// Write a synthetic phantom (signal, protocol and mask).
    Simulate(SimulateArgs),
}

/// Options for `voxfit fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// 4-D signal volume (NIfTI).
    #[arg(long, value_name = "NIFTI")]
    pub signal: PathBuf,

    /// Protocol table (`.prtcl`). Use `--bvec`/`--bval` for FSL gradient files instead.
    #[arg(long, value_name = "FILE", required_unless_present_all = ["bvec", "bval"])]
    pub protocol: Option<PathBuf>,

    /// FSL gradient directions.
    #[arg(long, requires = "bval", conflicts_with = "protocol")]
    pub bvec: Option<PathBuf>,

    /// FSL b-values (s/mm²).
    #[arg(long, requires = "bvec", conflicts_with = "protocol")]
    pub bval: Option<PathBuf>,

    /// 3-D mask volume; every voxel is fitted when omitted.
    #[arg(long, value_name = "NIFTI")]
    pub mask: Option<PathBuf>,

    /// Model name(s), e.g. `Tensor` or `BallStick_r2`. Repeat to fit several.
    #[arg(long = "model", required = true, num_args = 1..)]
    pub models: Vec<String>,

    /// Output directory; maps go to `<output>/<model>/`.
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Device indices (see `list-devices`). Automatic selection when omitted.
    #[arg(long = "device", num_args = 1.., value_delimiter = ',')]
    pub devices: Vec<usize>,

    /// Noise standard deviation, or `auto` to estimate it from the b0 volumes.
    #[arg(long)]
    pub noise_std: Option<String>,

    /// Noise model; each model's own default when omitted.
    #[arg(long, value_enum)]
    pub noise_model: Option<NoiseModel>,

    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Value for voxels outside the mask.
    #[arg(long, value_enum)]
    pub sentinel: Option<Sentinel>,
}

/// Options for `voxfit roi`.
#[derive(Debug, Args, Clone)]
pub struct RoiArgs {
    /// Map volume (NIfTI).
    #[arg(long)]
    pub map: PathBuf,

    /// Mask volume (NIfTI); non-zero voxels are included.
    #[arg(long)]
    pub mask: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NoiseArg {
    Gaussian,
    Rician,
}

/// Options for `voxfit simulate`.
#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Model generating the signal.
    #[arg(long)]
    pub model: String,

    /// Output directory for `signal.nii.gz`, `protocol.prtcl` and `mask.nii.gz`.
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Signal-to-noise ratio of the b0 signal.
    #[arg(long, default_value_t = 30.0)]
    pub snr: f64,

    /// Volume shape.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [8usize, 8, 4])]
    pub shape: Vec<usize>,

    #[arg(long, value_enum, default_value_t = NoiseArg::Rician)]
    pub noise: NoiseArg,
}
