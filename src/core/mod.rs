//! Core data structures and mathematical operations.
//!
//! - `SplatData`: the struct-of-arrays population the strategy edits
//! - `Gaussian` / `GaussianCloud`: array-of-structs view for display and export
//! - `init`: population from a point cloud
//! - Math utilities: activations, quaternions, covariance, SH constants

pub mod gaussian;
pub mod init;
pub mod math;
pub mod sh;
pub mod splat_data;

pub use gaussian::{Gaussian, GaussianCloud};
pub use init::{init_from_points, InitOptions, PointCloud};
pub use math::{inverse_sigmoid, sigmoid};
pub use splat_data::{Attribute, Gradients, SplatArrays, SplatData};
