//! Input/output helpers.
//!
//! - protocol tables and FSL gradient files (`protocol`)
//! - NIfTI volume reading and map writing (`volume`)
//! - signal/mask assembly into a `VoxelBatch` (`ingest`)
//! - per-model output directories and `fit_info.json` (`maps`)

pub mod ingest;
pub mod maps;
pub mod protocol;
pub mod volume;

pub use ingest::*;
pub use maps::*;
pub use protocol::*;
pub use volume::*;
