//! Closed-form opacity/scale redistribution when one particle becomes `m`.
//!
//! A particle with opacity `α` and scale `s` shared by `m` copies keeps its
//! aggregate contribution if each copy gets
//!
//! ```text
//! α' = 1 − (1 − α)^(1/m)
//! s' = s · α / Σ_{i=1..m} Σ_{k=0..i−1} C(i−1, k) · (−1)^k / √(k+1) · α'^(k+1)
//! ```
//!
//! The first line makes `m` composited copies reproduce `α`; the second keeps
//! the summed footprint of overlapping copies close to the original one.

use crate::mcmc::binomial::BinomialTable;
use nalgebra::Vector3;

/// Relocated opacity and scale for one particle (activated values).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relocated {
    pub opacity: f32,
    pub scale: Vector3<f32>,
}

/// Apply the relocation formula to a single particle.
///
/// `multiplicity` is clamped to `[1, table.max_n() − 1]`.
pub fn relocate_one(
    opacity: f32,
    scale: Vector3<f32>,
    multiplicity: usize,
    table: &BinomialTable,
) -> Relocated {
    let m = multiplicity.clamp(1, table.max_n().saturating_sub(1).max(1));
    let alpha = opacity as f64;
    let alpha_new = 1.0 - (1.0 - alpha).powf(1.0 / m as f64);

    let mut denom = 0.0f64;
    for i in 1..=m {
        let mut sign = 1.0f64;
        let mut power = alpha_new;
        for k in 0..i {
            denom += table.get(i - 1, k) * sign / ((k + 1) as f64).sqrt() * power;
            sign = -sign;
            power *= alpha_new;
        }
    }

    let coeff = if denom > 0.0 { alpha / denom } else { 1.0 };
    Relocated {
        opacity: alpha_new as f32,
        scale: scale * coeff as f32,
    }
}

/// Batched relocation: `opacity_old[K]`, `scale_old[K]`, `multiplicity[K]`.
pub fn relocate(
    opacity_old: &[f32],
    scale_old: &[Vector3<f32>],
    multiplicity: &[usize],
    table: &BinomialTable,
) -> (Vec<f32>, Vec<Vector3<f32>>) {
    debug_assert_eq!(opacity_old.len(), scale_old.len());
    debug_assert_eq!(opacity_old.len(), multiplicity.len());

    opacity_old
        .iter()
        .zip(scale_old)
        .zip(multiplicity)
        .map(|((&o, &s), &m)| {
            let r = relocate_one(o, s, m, table);
            (r.opacity, r.scale)
        })
        .unzip()
}
