//! Weighted sampling with replacement.
//!
//! Small populations go through `rand`'s `WeightedIndex`. Above
//! `native_limit` elements the sampler builds the normalized cumulative
//! distribution itself and binary-searches it once per draw, which keeps the
//! same distribution without relying on the native routine at that size.

use crate::error::McmcError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Default population size above which the CDF fallback is used.
pub const MULTINOMIAL_LIMIT: usize = 1 << 24;

#[derive(Clone, Debug)]
pub struct WeightedSampler {
    native_limit: usize,
    cdf: Vec<f64>,
}

impl Default for WeightedSampler {
    fn default() -> Self {
        Self::with_native_limit(MULTINOMIAL_LIMIT)
    }
}

impl WeightedSampler {
    pub fn with_native_limit(native_limit: usize) -> Self {
        Self {
            native_limit,
            cdf: Vec::new(),
        }
    }

    /// Draw `count` indices into `weights` with replacement, each with
    /// probability `weights[i] / Σ weights`.
    pub fn sample<R: Rng + ?Sized>(
        &mut self,
        weights: &[f32],
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, McmcError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if weights.is_empty() {
            return Err(McmcError::InvalidWeights("empty weight vector".into()));
        }

        if weights.len() <= self.native_limit {
            let dist = WeightedIndex::new(weights)
                .map_err(|e| McmcError::InvalidWeights(e.to_string()))?;
            return Ok((0..count).map(|_| dist.sample(rng)).collect());
        }

        self.build_cdf(weights)?;
        let last = self.cdf.len() - 1;
        Ok((0..count)
            .map(|_| {
                let u: f64 = rng.gen();
                // First index whose cumulative weight reaches u.
                self.cdf.partition_point(|&c| c < u).min(last)
            })
            .collect())
    }

    fn build_cdf(&mut self, weights: &[f32]) -> Result<(), McmcError> {
        let mut total = 0.0f64;
        for &w in weights {
            if !(w.is_finite() && w >= 0.0) {
                return Err(McmcError::InvalidWeights(format!("bad weight {w}")));
            }
            total += w as f64;
        }
        if total <= 0.0 {
            return Err(McmcError::InvalidWeights("weights sum to zero".into()));
        }

        self.cdf.clear();
        self.cdf.reserve(weights.len());
        let mut acc = 0.0f64;
        for &w in weights {
            acc += w as f64 / total;
            self.cdf.push(acc);
        }
        Ok(())
    }

    /// Free the cumulative-distribution scratch buffer.
    pub fn release_scratch(&mut self) {
        self.cdf = Vec::new();
    }

    pub fn scratch_capacity(&self) -> usize {
        self.cdf.capacity()
    }
}

/// How many times each drawn index appears in `draws`, reported per draw
/// position and offset by one for the drawn particle's own slot, clamped to
/// `[1, max_ratio]`.
///
/// `counts` is scratch space sized to the population.
pub fn draw_ratios(
    draws: &[usize],
    population: usize,
    max_ratio: usize,
    counts: &mut Vec<u32>,
) -> Vec<usize> {
    counts.clear();
    counts.resize(population, 0);
    for &d in draws {
        counts[d] += 1;
    }
    draws
        .iter()
        .map(|&d| (counts[d] as usize + 1).clamp(1, max_ratio.max(1)))
        .collect()
}
