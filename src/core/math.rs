//! Mathematical utilities (activations, quaternions, covariance).

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
///
/// Maps R → (0, 1)
/// Used for opacity (converts unbounded optimization to valid probability)
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid (logit): logit(p) = log(p / (1-p))
///
/// Maps (0, 1) → R
/// Used to convert initial opacity values to optimization space
pub fn inverse_sigmoid(p: f32) -> f32 {
    // Clamp to avoid log(0) or division by zero
    let p_clamped = p.clamp(1e-6, 1.0 - 1e-6);
    (p_clamped / (1.0 - p_clamped)).ln()
}

/// Exact logit without clamping, evaluated in f64.
///
/// Callers are responsible for keeping `p` strictly inside (0, 1). Relocation
/// clamps to `[min_opacity, 1 - 1e-7]` first, which is tighter than what
/// `inverse_sigmoid` allows.
pub fn logit(p: f32) -> f32 {
    let p = p as f64;
    (p / (1.0 - p)).ln() as f32
}

/// Build a unit quaternion from a raw, unnormalized (w, x, y, z) parameter row.
///
/// A zero row falls back to the identity rotation.
pub fn quaternion_from_raw(raw: &[f32]) -> UnitQuaternion<f32> {
    let q = Quaternion::new(raw[0], raw[1], raw[2], raw[3]);
    if q.norm_squared() <= f32::EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_quaternion(q)
}

/// Convert a unit quaternion to a 3×3 rotation matrix.
///
/// Formula (from quaternion q = w + xi + yj + zk):
/// R = | 1-2(y²+z²)   2(xy-wz)    2(xz+wy)  |
///     | 2(xy+wz)     1-2(x²+z²)  2(yz-wx)  |
///     | 2(xz-wy)     2(yz+wx)    1-2(x²+y²)|
pub fn quaternion_to_matrix(q: &UnitQuaternion<f32>) -> Matrix3<f32> {
    q.to_rotation_matrix().into_inner()
}

/// Covariance from activated scale and rotation: Σ = R · S · S^T · R^T
pub fn covariance_from_scale_rotation(
    scale: &Vector3<f32>,
    rotation: &UnitQuaternion<f32>,
) -> Matrix3<f32> {
    let r = quaternion_to_matrix(rotation);

    // S · S^T for diagonal matrix is just diag(sx², sy², sz²)
    let s_squared = Matrix3::from_diagonal(&scale.component_mul(scale));
    r * s_squared * r.transpose()
}
