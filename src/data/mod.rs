//! Synthetic input data.

pub mod phantom;

pub use phantom::*;
