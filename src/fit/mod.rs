//! Per-voxel model fitting.
//!
//! Responsibilities:
//!
//! - resolve noise model and σ for a run
//! - fit one voxel with Levenberg–Marquardt
//! - fan the voxels of a batch out to the selected devices

pub mod batch;
pub mod fitter;
pub mod lm;
pub mod noise_std;

pub use batch::*;
pub use fitter::*;
pub use noise_std::*;
