//! Learning-rate schedules.

use crate::optim::adam::Adam;

/// Exponential decay of a single group's learning rate: `lr *= gamma` per step.
#[derive(Clone, Debug)]
pub struct ExponentialLr {
    gamma: f64,
    group_index: usize,
}

impl ExponentialLr {
    pub fn new(gamma: f64, group_index: usize) -> Self {
        Self { gamma, group_index }
    }

    /// Gamma that takes the learning rate to `final_ratio` of its initial
    /// value after `steps` steps.
    pub fn gamma_for(final_ratio: f64, steps: usize) -> f64 {
        final_ratio.powf(1.0 / steps.max(1) as f64)
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn step(&self, optimizer: &mut Adam) {
        if let Some(group) = optimizer.param_groups_mut().get_mut(self.group_index) {
            group.options.lr = (group.options.lr as f64 * self.gamma) as f32;
        }
    }
}
