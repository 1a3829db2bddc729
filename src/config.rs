//! Optimization parameters consumed by the strategy.
//!
//! All fields have defaults, so a JSON file only needs to list overrides:
//!
//! ```json
//! { "iterations": 7000, "max_cap": 300000, "seed": 42 }
//! ```

use crate::error::McmcError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationParams {
    /// Total training steps; also sets the position LR decay schedule.
    pub iterations: usize,

    pub means_lr: f32,
    pub shs_lr: f32,
    pub scaling_lr: f32,
    pub rotation_lr: f32,
    pub opacity_lr: f32,
    pub adam_eps: f32,

    /// Particles at or below this activated opacity are relocated.
    pub min_opacity: f32,
    /// Population ceiling for growth.
    pub max_cap: usize,
    pub start_refine: usize,
    pub stop_refine: usize,
    pub refine_every: usize,
    /// Population multiplier per growth step (before the cap).
    pub growth_factor: f32,

    /// Iterations between SH degree increments.
    pub sh_degree_interval: usize,

    pub noise_lr: f32,
    pub noise_k: f32,
    pub noise_x0: f32,

    /// Size of the binomial table; multiplicities are clamped below it.
    pub binomial_max_n: usize,
    /// Population size above which sampling uses the CDF fallback.
    pub multinomial_limit: usize,

    /// RNG seed for sampling and noise. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for OptimizationParams {
    fn default() -> Self {
        Self {
            iterations: 30_000,
            means_lr: 1.6e-4,
            shs_lr: 2.5e-3,
            scaling_lr: 5e-3,
            rotation_lr: 1e-3,
            opacity_lr: 5e-2,
            adam_eps: 1e-15,
            min_opacity: 5e-3,
            max_cap: 1_000_000,
            start_refine: 500,
            stop_refine: 25_000,
            refine_every: 100,
            growth_factor: 1.05,
            sh_degree_interval: 1000,
            noise_lr: 5e5,
            noise_k: 100.0,
            noise_x0: 0.995,
            binomial_max_n: 51,
            multinomial_limit: 1 << 24,
            seed: None,
        }
    }
}

impl OptimizationParams {
    /// Load from a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, McmcError> {
        let text = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), McmcError> {
        let fail = |msg: String| Err(McmcError::InvalidConfig(msg));

        if self.iterations == 0 {
            return fail("iterations must be > 0".into());
        }
        if self.refine_every == 0 {
            return fail("refine_every must be > 0".into());
        }
        if self.sh_degree_interval == 0 {
            return fail("sh_degree_interval must be > 0".into());
        }
        if !(self.min_opacity > 0.0 && self.min_opacity < 1.0) {
            return fail(format!("min_opacity must be in (0, 1), got {}", self.min_opacity));
        }
        for (name, lr) in [
            ("means_lr", self.means_lr),
            ("shs_lr", self.shs_lr),
            ("scaling_lr", self.scaling_lr),
            ("rotation_lr", self.rotation_lr),
            ("opacity_lr", self.opacity_lr),
            ("noise_lr", self.noise_lr),
        ] {
            if !lr.is_finite() || lr < 0.0 {
                return fail(format!("{name} must be finite and >= 0, got {lr}"));
            }
        }
        if !(self.adam_eps.is_finite() && self.adam_eps > 0.0) {
            return fail(format!("adam_eps must be > 0, got {}", self.adam_eps));
        }
        if !(self.growth_factor.is_finite() && self.growth_factor >= 1.0) {
            return fail(format!("growth_factor must be >= 1, got {}", self.growth_factor));
        }
        if self.binomial_max_n < 2 {
            return fail("binomial_max_n must be >= 2".into());
        }
        if self.multinomial_limit == 0 {
            return fail("multinomial_limit must be > 0".into());
        }
        Ok(())
    }

    /// Position LR decay factor: 0.01^(1 / iterations).
    pub fn means_lr_gamma(&self) -> f64 {
        crate::optim::scheduler::ExponentialLr::gamma_for(0.01, self.iterations)
    }
}
