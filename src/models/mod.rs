//! Forward models, noise models and the name registry.
//!
//! Models are pure: the fitter evaluates one instance for many voxels
//! concurrently.

pub mod ball_stick;
pub mod model;
pub mod noise;
pub mod prefit;
pub mod registry;
pub mod s0;
pub mod tensor;

pub use ball_stick::BallStick;
pub use model::*;
pub use noise::total_log_likelihood;
pub use registry::ModelRegistry;
pub use s0::S0;
pub use tensor::Tensor;
