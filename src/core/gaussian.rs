//! Array-of-structs view of the population.
//!
//! A Gaussian is parameterized by:
//! - Position (mean μ)
//! - Scale (log-space: exp(scale) gives actual scale)
//! - Rotation (quaternion)
//! - Opacity (logit-space: sigmoid(opacity) gives actual opacity)
//! - Spherical harmonics coefficients (view-dependent color)
//!
//! Training works on [`crate::core::SplatData`]; this layout is what a
//! display thread snapshots and what point-cloud initialization produces.

use crate::core::math::{covariance_from_scale_rotation, sigmoid};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D Gaussian primitive.
///
/// Covariance is stored factorized as scale + rotation:
/// Σ = R · S · S^T · R^T where S = diag(exp(scale))
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    /// Position (mean μ)
    pub position: Vector3<f32>,

    /// Log-space scale (actual scale = exp(scale))
    pub scale: Vector3<f32>,

    /// Rotation as unit quaternion
    pub rotation: UnitQuaternion<f32>,

    /// Opacity in logit-space (actual opacity = sigmoid(opacity))
    pub opacity: f32,

    /// [RGB × 16 coefficients] for degree-3 SH; index 0 is the DC component
    pub sh_coeffs: [[f32; 3]; 16],
}

impl Gaussian {
    pub fn new(
        position: Vector3<f32>,
        scale: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        opacity: f32,
        sh_coeffs: [[f32; 3]; 16],
    ) -> Self {
        Self {
            position,
            scale,
            rotation,
            opacity,
            sh_coeffs,
        }
    }

    pub fn covariance_matrix(&self) -> Matrix3<f32> {
        covariance_from_scale_rotation(&self.actual_scale(), &self.rotation)
    }

    /// Get the actual opacity value (sigmoid of stored logit value)
    pub fn actual_opacity(&self) -> f32 {
        sigmoid(self.opacity)
    }

    /// Get the actual scale values (exp of stored log values)
    pub fn actual_scale(&self) -> Vector3<f32> {
        self.scale.map(f32::exp)
    }
}

/// A collection of Gaussians.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GaussianCloud {
    pub gaussians: Vec<Gaussian>,
}

impl GaussianCloud {
    pub fn from_gaussians(gaussians: Vec<Gaussian>) -> Self {
        Self { gaussians }
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    pub fn as_slice(&self) -> &[Gaussian] {
        &self.gaussians
    }
}
