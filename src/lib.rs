//! `voxel-fit` library crate.
//!
//! Voxel-wise fitting of diffusion MRI signal models. The binary (`voxfit`) is
//! a thin wrapper around this library so that:
//!
//! - the fit pipeline is testable without spawning processes
//! - embedding callers can hand in arrays instead of files
//!
//! The usual flow is [`io::load_input_data`] -> [`fit::fit`] -> [`maps::to_maps`]
//! -> [`io::persist_maps`], bundled by [`app::pipeline::fit_model`].

pub mod app;
pub mod cli;
pub mod data;
pub mod device;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod maps;
pub mod math;
pub mod models;
pub mod report;
