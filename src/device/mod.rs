//! Compute devices: enumeration, smart selection and batch dispatch.

pub mod dispatch;
pub mod environment;

pub use dispatch::*;
pub use environment::*;
