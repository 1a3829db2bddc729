//! Initialization of the population from a point cloud.
//!
//! One Gaussian per input point:
//! - Position from the point
//! - DC color from the point's RGB, higher SH bands zero
//! - Identity rotation
//! - Isotropic scale from the mean squared distance to the nearest neighbours
//! - Uniform opacity

use crate::core::math::inverse_sigmoid;
use crate::core::sh::{rest_columns, rgb_to_sh0, MAX_SH_DEGREE};
use crate::core::splat_data::{SplatArrays, SplatData};
use crate::error::McmcError;
use nalgebra::Vector3;
use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use tracing::debug;

/// Initial point cloud (e.g. from structure-from-motion).
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub positions: Vec<Vector3<f32>>,
    /// RGB colors, 0-255.
    pub colors: Vec<[u8; 3]>,
}

#[derive(Clone, Debug)]
pub struct InitOptions {
    /// Activated opacity assigned to every particle.
    pub init_opacity: f32,
    /// Multiplier on the nearest-neighbour distance for the initial scale.
    pub init_scaling: f32,
    pub max_sh_degree: u32,
    pub num_neighbors: usize,
    /// Overrides the scene scale derived from the point extent.
    pub scene_scale: Option<f32>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            init_opacity: 0.5,
            init_scaling: 0.1,
            max_sh_degree: MAX_SH_DEGREE,
            num_neighbors: 3,
            scene_scale: None,
        }
    }
}

const MIN_DIST2: f32 = 1e-7;

/// Build a population from a point cloud.
pub fn init_from_points(points: &PointCloud, opts: &InitOptions) -> Result<SplatData, McmcError> {
    if points.positions.len() != points.colors.len() {
        return Err(McmcError::ShapeMismatch {
            attribute: "colors",
            expected: points.positions.len(),
            actual: points.colors.len(),
        });
    }

    let n = points.positions.len();
    let degree = opts.max_sh_degree.min(MAX_SH_DEGREE);
    let dist2 = mean_knn_dist2(&points.positions, opts.num_neighbors);

    let mut arrays = SplatArrays {
        means: Vec::with_capacity(n * 3),
        sh0: Vec::with_capacity(n * 3),
        sh_n: vec![0.0; n * rest_columns(degree)],
        scaling_raw: Vec::with_capacity(n * 3),
        rotation_raw: Vec::with_capacity(n * 4),
        opacity_raw: vec![inverse_sigmoid(opts.init_opacity); n],
    };

    for ((p, c), d2) in points.positions.iter().zip(&points.colors).zip(&dist2) {
        arrays.means.extend_from_slice(p.as_slice());
        let rgb = [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0];
        arrays.sh0.extend_from_slice(&rgb_to_sh0(rgb));
        let log_scale = (d2.sqrt() * opts.init_scaling).ln();
        arrays.scaling_raw.extend_from_slice(&[log_scale; 3]);
        arrays.rotation_raw.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
    }

    let scene_scale = opts
        .scene_scale
        .unwrap_or_else(|| scene_extent(&points.positions));
    debug!(points = n, scene_scale, "initialized population from point cloud");

    SplatData::from_arrays(arrays, degree, scene_scale)
}

/// 1.1 × the largest distance from the centroid (1.0 for degenerate clouds).
pub fn scene_extent(positions: &[Vector3<f32>]) -> f32 {
    if positions.is_empty() {
        return 1.0;
    }
    let centroid = positions.iter().sum::<Vector3<f32>>() / positions.len() as f32;
    let radius = positions
        .iter()
        .map(|p| (p - centroid).norm())
        .fold(0.0f32, f32::max);
    if radius > 0.0 {
        radius * 1.1
    } else {
        1.0
    }
}

/// Point with its index, stored in the R-tree.
struct IndexedPoint(usize, [f32; 3]);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.1)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1[0] - point[0];
        let dy = self.1[1] - point[1];
        let dz = self.1[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Mean squared distance to the `k` nearest neighbours of every point,
/// clamped below by `MIN_DIST2`.
pub fn mean_knn_dist2(positions: &[Vector3<f32>], k: usize) -> Vec<f32> {
    let n = positions.len();
    let k = k.min(n.saturating_sub(1));
    if k == 0 {
        return vec![MIN_DIST2; n];
    }

    let tree = RTree::bulk_load(
        positions
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint(i, [p.x, p.y, p.z]))
            .collect(),
    );

    positions
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let query = [p.x, p.y, p.z];
            // Skip the point itself by index so duplicates still count.
            let sum: f32 = tree
                .nearest_neighbor_iter(&query)
                .filter(|q| q.0 != i)
                .take(k)
                .map(|q| q.distance_2(&query))
                .sum();
            (sum / k as f32).max(MIN_DIST2)
        })
        .collect()
}
