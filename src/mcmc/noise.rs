//! Opacity-weighted, covariance-shaped position noise.
//!
//! Every step each mean is perturbed by `Σ · ε · w(α) · lr · noise_lr` with
//! `ε ~ N(0, I)` and `w(α) = sigmoid(−K·((1 − α) − X0))`. Nearly transparent
//! particles (small α) get `w ≈ 1` and wander freely; opaque ones barely move.
//! Multiplying by the particle's own covariance stretches the step along its
//! long axes.

use crate::core::splat_data::{Attribute, SplatData};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseParams {
    pub noise_lr: f32,
    pub k: f32,
    pub x0: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            noise_lr: 5e5,
            k: 100.0,
            x0: 0.995,
        }
    }
}

impl NoiseParams {
    /// `w(α)`: close to 1 for transparent particles, close to 0 for opaque ones.
    pub fn opacity_weight(&self, opacity: f32) -> f32 {
        1.0 / (1.0 + (-self.k * ((1.0 - opacity) - self.x0)).exp())
    }
}

/// Perturb every mean in place. `lr` is the current position learning rate.
pub fn inject_noise<R: Rng + ?Sized>(
    model: &mut SplatData,
    lr: f32,
    params: &NoiseParams,
    rng: &mut R,
) {
    let n = model.size();
    if n == 0 {
        return;
    }

    // Draws stay on the caller's RNG so a seed reproduces the run.
    let eps: Vec<f32> = (0..n * 3).map(|_| rng.sample(StandardNormal)).collect();

    let view: &SplatData = model;
    let steps: Vec<[f32; 3]> = (0..n)
        .into_par_iter()
        .map(|i| {
            let w = params.opacity_weight(view.opacity(i)) * lr * params.noise_lr;
            let e = Vector3::new(eps[3 * i], eps[3 * i + 1], eps[3 * i + 2]) * w;
            let d = view.covariance(i) * e;
            [d.x, d.y, d.z]
        })
        .collect();

    model
        .param_mut(Attribute::Means)
        .data_mut()
        .par_chunks_mut(3)
        .zip(steps.par_iter())
        .for_each(|(mean, step)| {
            mean[0] += step[0];
            mean[1] += step[1];
            mean[2] += step[2];
        });
}
