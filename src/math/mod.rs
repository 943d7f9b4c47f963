//! Mathematical utilities: orientation geometry and linear least squares.

pub mod geometry;
pub mod ols;

pub use geometry::*;
pub use ols::*;
