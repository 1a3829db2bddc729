//! Struct-of-arrays particle population.
//!
//! Every attribute is its own learnable [`Param`] with the same row count N.
//! Parameters are stored unconstrained (pre-activation):
//! - `means`: world-space center (3)
//! - `sh0`: DC color coefficient (3)
//! - `shN`: higher SH bands, `3 · ((d+1)² − 1)` floats for max degree d
//! - `scaling_raw`: log-scale (3), activated with `exp`
//! - `rotation_raw`: quaternion (w, x, y, z), activated by normalizing
//! - `opacity_raw`: logit opacity (1), activated with `sigmoid`
//!
//! Only the strategy mutates rows; everyone else gets `&SplatData`.

use crate::core::gaussian::{Gaussian, GaussianCloud};
use crate::core::math::{covariance_from_scale_rotation, quaternion_from_raw, sigmoid};
use crate::core::sh::{self, MAX_SH_DEGREE};
use crate::error::McmcError;
use crate::optim::param::Param;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// One per-particle attribute array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Means,
    Sh0,
    ShN,
    Scaling,
    Rotation,
    Opacity,
}

impl Attribute {
    /// Attributes in optimizer group order.
    pub const ALL: [Attribute; 6] = [
        Attribute::Means,
        Attribute::Sh0,
        Attribute::ShN,
        Attribute::Scaling,
        Attribute::Rotation,
        Attribute::Opacity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Means => "means",
            Attribute::Sh0 => "sh0",
            Attribute::ShN => "shN",
            Attribute::Scaling => "scaling",
            Attribute::Rotation => "rotation",
            Attribute::Opacity => "opacity",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Raw row-major inputs for [`SplatData::from_arrays`].
#[derive(Clone, Debug, Default)]
pub struct SplatArrays {
    pub means: Vec<f32>,
    pub sh0: Vec<f32>,
    pub sh_n: Vec<f32>,
    pub scaling_raw: Vec<f32>,
    pub rotation_raw: Vec<f32>,
    pub opacity_raw: Vec<f32>,
}

/// Gradients produced by the backward pass, one optional buffer per attribute.
///
/// A missing buffer means the attribute received no gradient this iteration.
#[derive(Clone, Debug, Default)]
pub struct Gradients {
    pub means: Option<Vec<f32>>,
    pub sh0: Option<Vec<f32>>,
    pub sh_n: Option<Vec<f32>>,
    pub scaling: Option<Vec<f32>>,
    pub rotation: Option<Vec<f32>>,
    pub opacity: Option<Vec<f32>>,
}

impl Gradients {
    /// Every attribute filled with `value`, shaped like `model`.
    pub fn uniform(model: &SplatData, value: f32) -> Self {
        let mut grads = Self::default();
        for attr in Attribute::ALL {
            grads.set(attr, vec![value; model.param(attr).data().len()]);
        }
        grads
    }

    pub fn get(&self, attr: Attribute) -> Option<&[f32]> {
        self.slot(attr).as_deref()
    }

    pub fn set(&mut self, attr: Attribute, grad: Vec<f32>) {
        *self.slot_mut(attr) = Some(grad);
    }

    fn slot(&self, attr: Attribute) -> &Option<Vec<f32>> {
        match attr {
            Attribute::Means => &self.means,
            Attribute::Sh0 => &self.sh0,
            Attribute::ShN => &self.sh_n,
            Attribute::Scaling => &self.scaling,
            Attribute::Rotation => &self.rotation,
            Attribute::Opacity => &self.opacity,
        }
    }

    fn slot_mut(&mut self, attr: Attribute) -> &mut Option<Vec<f32>> {
        match attr {
            Attribute::Means => &mut self.means,
            Attribute::Sh0 => &mut self.sh0,
            Attribute::ShN => &mut self.sh_n,
            Attribute::Scaling => &mut self.scaling,
            Attribute::Rotation => &mut self.rotation,
            Attribute::Opacity => &mut self.opacity,
        }
    }
}

#[derive(Debug)]
pub struct SplatData {
    params: [Param; 6],
    active_sh_degree: u32,
    max_sh_degree: u32,
    scene_scale: f32,
}

impl SplatData {
    /// Build a population from raw arrays. All arrays must describe the same
    /// number of rows.
    pub fn from_arrays(
        arrays: SplatArrays,
        max_sh_degree: u32,
        scene_scale: f32,
    ) -> Result<Self, McmcError> {
        let max_sh_degree = max_sh_degree.min(MAX_SH_DEGREE);
        let n = arrays.opacity_raw.len();
        let widths = Self::column_widths(max_sh_degree);
        let lens = [
            arrays.means.len(),
            arrays.sh0.len(),
            arrays.sh_n.len(),
            arrays.scaling_raw.len(),
            arrays.rotation_raw.len(),
            arrays.opacity_raw.len(),
        ];

        for ((attr, len), cols) in Attribute::ALL.into_iter().zip(lens).zip(widths) {
            if len != n * cols {
                return Err(McmcError::ShapeMismatch {
                    attribute: attr.name(),
                    expected: n * cols,
                    actual: len,
                });
            }
        }
        Ok(Self::assemble(arrays, n, max_sh_degree, scene_scale))
    }

    /// Build a population from an array-of-structs cloud.
    pub fn from_cloud(cloud: &GaussianCloud, max_sh_degree: u32, scene_scale: f32) -> Self {
        let max_sh_degree = max_sh_degree.min(MAX_SH_DEGREE);
        let rest = sh::num_sh_coeffs(max_sh_degree) - 1;
        let n = cloud.len();
        let mut arrays = SplatArrays {
            means: Vec::with_capacity(n * 3),
            sh0: Vec::with_capacity(n * 3),
            sh_n: Vec::with_capacity(n * rest * 3),
            scaling_raw: Vec::with_capacity(n * 3),
            rotation_raw: Vec::with_capacity(n * 4),
            opacity_raw: Vec::with_capacity(n),
        };

        for g in cloud.as_slice() {
            arrays.means.extend_from_slice(g.position.as_slice());
            arrays.sh0.extend_from_slice(&g.sh_coeffs[0]);
            for coeff in &g.sh_coeffs[1..=rest] {
                arrays.sh_n.extend_from_slice(coeff);
            }
            arrays.scaling_raw.extend_from_slice(g.scale.as_slice());
            let q = g.rotation.quaternion();
            arrays.rotation_raw.extend_from_slice(&[q.w, q.i, q.j, q.k]);
            arrays.opacity_raw.push(g.opacity);
        }

        Self::assemble(arrays, n, max_sh_degree, scene_scale)
    }

    fn assemble(arrays: SplatArrays, n: usize, max_sh_degree: u32, scene_scale: f32) -> Self {
        let widths = Self::column_widths(max_sh_degree);
        Self {
            params: [
                Param::new(n, widths[0], arrays.means),
                Param::new(n, widths[1], arrays.sh0),
                Param::new(n, widths[2], arrays.sh_n),
                Param::new(n, widths[3], arrays.scaling_raw),
                Param::new(n, widths[4], arrays.rotation_raw),
                Param::new(n, widths[5], arrays.opacity_raw),
            ],
            active_sh_degree: 0,
            max_sh_degree,
            scene_scale,
        }
    }

    /// Array-of-structs copy for display or export. Higher SH bands beyond
    /// the max degree are zero.
    pub fn to_cloud(&self) -> GaussianCloud {
        let rest = sh::num_sh_coeffs(self.max_sh_degree) - 1;
        let sh_n = self.param(Attribute::ShN);
        let gaussians = (0..self.size())
            .map(|i| {
                let mut sh_coeffs = [[0.0f32; 3]; 16];
                let dc = self.param(Attribute::Sh0).row(i);
                sh_coeffs[0] = [dc[0], dc[1], dc[2]];
                let row = sh_n.row(i);
                for k in 0..rest {
                    sh_coeffs[k + 1] = [row[3 * k], row[3 * k + 1], row[3 * k + 2]];
                }
                let s = self.param(Attribute::Scaling).row(i);
                Gaussian::new(
                    self.mean(i),
                    Vector3::new(s[0], s[1], s[2]),
                    self.rotation(i),
                    self.param(Attribute::Opacity).row(i)[0],
                    sh_coeffs,
                )
            })
            .collect();
        GaussianCloud::from_gaussians(gaussians)
    }

    /// Column width of every attribute, in [`Attribute::ALL`] order.
    pub fn column_widths(max_sh_degree: u32) -> [usize; 6] {
        [3, 3, sh::rest_columns(max_sh_degree), 3, 4, 1]
    }

    /// Number of particles (N).
    pub fn size(&self) -> usize {
        self.params[Attribute::Opacity.index()].rows()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn param(&self, attr: Attribute) -> &Param {
        &self.params[attr.index()]
    }

    pub(crate) fn param_mut(&mut self, attr: Attribute) -> &mut Param {
        &mut self.params[attr.index()]
    }

    /// Opacity and scaling arrays borrowed together.
    pub(crate) fn opacity_scaling_mut(&mut self) -> (&mut Param, &mut Param) {
        let [_, _, _, scaling, _, opacity] = &mut self.params;
        (opacity, scaling)
    }

    pub fn params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub(crate) fn params_mut(&mut self) -> impl Iterator<Item = &mut Param> {
        self.params.iter_mut()
    }

    /// Swap in a complete new set of arrays. Returns the replaced arrays.
    pub(crate) fn replace_params(&mut self, new: [Param; 6]) -> [Param; 6] {
        debug_assert!(new.iter().all(|p| p.rows() == new[0].rows()));
        std::mem::replace(&mut self.params, new)
    }

    /// Attach gradients from a backward pass. Every supplied buffer is shape
    /// checked before any is attached.
    pub fn set_gradients(&mut self, grads: Gradients) -> Result<(), McmcError> {
        for attr in Attribute::ALL {
            if let Some(g) = grads.get(attr) {
                let expected = self.param(attr).data().len();
                if g.len() != expected {
                    return Err(McmcError::ShapeMismatch {
                        attribute: attr.name(),
                        expected,
                        actual: g.len(),
                    });
                }
            }
        }
        let mut grads = grads;
        for attr in Attribute::ALL {
            if let Some(g) = grads.slot_mut(attr).take() {
                self.param_mut(attr).set_grad(g);
            }
        }
        Ok(())
    }

    pub fn mean(&self, i: usize) -> Vector3<f32> {
        Vector3::from_row_slice(self.param(Attribute::Means).row(i))
    }

    /// Activated opacity of particle `i`.
    pub fn opacity(&self, i: usize) -> f32 {
        sigmoid(self.param(Attribute::Opacity).row(i)[0])
    }

    /// Activated opacities of the whole population.
    pub fn get_opacity(&self) -> Vec<f32> {
        self.param(Attribute::Opacity)
            .data()
            .iter()
            .map(|&x| sigmoid(x))
            .collect()
    }

    /// Activated scale of particle `i`.
    pub fn scaling(&self, i: usize) -> Vector3<f32> {
        let s = self.param(Attribute::Scaling).row(i);
        Vector3::new(s[0].exp(), s[1].exp(), s[2].exp())
    }

    pub fn get_scaling(&self) -> Vec<Vector3<f32>> {
        (0..self.size()).map(|i| self.scaling(i)).collect()
    }

    /// Normalized rotation of particle `i`.
    pub fn rotation(&self, i: usize) -> UnitQuaternion<f32> {
        quaternion_from_raw(self.param(Attribute::Rotation).row(i))
    }

    /// Σ = R · S · S^T · R^T for particle `i`.
    pub fn covariance(&self, i: usize) -> Matrix3<f32> {
        covariance_from_scale_rotation(&self.scaling(i), &self.rotation(i))
    }

    pub fn active_sh_degree(&self) -> u32 {
        self.active_sh_degree
    }

    pub fn max_sh_degree(&self) -> u32 {
        self.max_sh_degree
    }

    pub fn increment_sh_degree(&mut self) {
        if self.active_sh_degree < self.max_sh_degree {
            self.active_sh_degree += 1;
        }
    }

    /// Scene extent; multiplies the position learning rate.
    pub fn scene_scale(&self) -> f32 {
        self.scene_scale
    }
}
