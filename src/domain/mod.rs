//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the acquisition protocol (`Protocol`, `ProtocolRow`)
//! - the flattened per-voxel problem set (`VoxelBatch`)
//! - per-voxel fit outputs (`FitResult`, `FitStatus`)
//! - run configuration (`FitConfig`, `NoiseModel`, `NoiseStd`, `DeviceSelection`)
//! - mask coercion and the voxel scan order

pub mod mask;
pub mod types;

pub use mask::*;
pub use types::*;
