//! Adam optimizer over named parameter groups.
//!
//! Each group owns exactly one learnable array (by [`ParamId`]) and its own
//! options. Moment estimates live in an associative store keyed by the array's
//! id and are created lazily the first time the array is stepped with a
//! gradient. Structural edits to that store (row resets, growth + rekeying)
//! live in [`crate::optim::state_sync`].

use crate::optim::param::{Param, ParamId};
use std::collections::HashMap;

/// Per-group hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AdamOptions {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    /// Keep a running max of the second moment (AMSGrad).
    pub amsgrad: bool,
}

impl AdamOptions {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            amsgrad: false,
        }
    }

    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn amsgrad(mut self, amsgrad: bool) -> Self {
        self.amsgrad = amsgrad;
        self
    }
}

/// One parameter group: a single learnable array plus its options.
#[derive(Clone, Debug)]
pub struct ParamGroup {
    pub name: String,
    pub param: ParamId,
    pub options: AdamOptions,
}

impl ParamGroup {
    pub fn new(name: impl Into<String>, param: ParamId, options: AdamOptions) -> Self {
        Self {
            name: name.into(),
            param,
            options,
        }
    }
}

/// Accumulator record for one learnable array.
///
/// Every buffer has `rows * cols` elements, mirroring the array it shadows.
#[derive(Clone, Debug, PartialEq)]
pub struct AdamParamState {
    pub step: u64,
    pub rows: usize,
    pub cols: usize,
    pub exp_avg: Vec<f32>,
    pub exp_avg_sq: Vec<f32>,
    pub max_exp_avg_sq: Option<Vec<f32>>,
}

impl AdamParamState {
    pub fn zeros(rows: usize, cols: usize, amsgrad: bool) -> Self {
        let len = rows * cols;
        Self {
            step: 0,
            rows,
            cols,
            exp_avg: vec![0.0; len],
            exp_avg_sq: vec![0.0; len],
            max_exp_avg_sq: amsgrad.then(|| vec![0.0; len]),
        }
    }

    /// All buffers, first moment first.
    pub fn buffers_mut(&mut self) -> impl Iterator<Item = &mut Vec<f32>> {
        [&mut self.exp_avg, &mut self.exp_avg_sq]
            .into_iter()
            .chain(self.max_exp_avg_sq.as_mut())
    }
}

pub struct Adam {
    groups: Vec<ParamGroup>,
    state: HashMap<ParamId, AdamParamState>,
}

impl Adam {
    pub fn new(groups: Vec<ParamGroup>) -> Self {
        Self {
            groups,
            state: HashMap::new(),
        }
    }

    pub fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&ParamGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn state(&self) -> &HashMap<ParamId, AdamParamState> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut HashMap<ParamId, AdamParamState> {
        &mut self.state
    }

    /// Point a group at a replacement array. The accumulator store is not
    /// touched; rekeying is the caller's job.
    pub fn replace_param(&mut self, old: ParamId, new: ParamId) -> bool {
        match self.groups.iter_mut().find(|g| g.param == old) {
            Some(group) => {
                group.param = new;
                true
            }
            None => false,
        }
    }

    /// One Adam update over every supplied array that belongs to a group and
    /// carries a gradient. Arrays without a gradient are skipped, and so is
    /// their timestep.
    pub fn step<'a>(&mut self, params: impl IntoIterator<Item = &'a mut Param>) {
        for param in params {
            let Some(group) = self.groups.iter().find(|g| g.param == param.id()) else {
                continue;
            };
            let opts = &group.options;
            let (rows, cols, id) = (param.rows(), param.cols(), param.id());
            let (values, grads) = param.data_and_grad_mut();
            let Some(grads) = grads else {
                continue;
            };

            let state = self
                .state
                .entry(id)
                .or_insert_with(|| AdamParamState::zeros(rows, cols, opts.amsgrad));
            debug_assert_eq!(state.exp_avg.len(), values.len(), "stale accumulator for {id}");

            state.step += 1;
            let t = state.step as f32;
            let (b1, b2) = (opts.beta1, opts.beta2);
            let bias1 = 1.0 - b1.powf(t);
            let bias2_sqrt = (1.0 - b2.powf(t)).sqrt();
            let step_size = opts.lr / bias1;

            for i in 0..values.len() {
                let g = grads[i];
                let m = state.exp_avg[i] * b1 + g * (1.0 - b1);
                let v = state.exp_avg_sq[i] * b2 + g * g * (1.0 - b2);
                state.exp_avg[i] = m;
                state.exp_avg_sq[i] = v;

                let v_used = match state.max_exp_avg_sq.as_mut() {
                    Some(max) => {
                        max[i] = max[i].max(v);
                        max[i]
                    }
                    None => v,
                };
                let denom = v_used.sqrt() / bias2_sqrt + opts.eps;
                values[i] -= step_size * m / denom;
            }
        }
    }

    /// Drop gradients of every supplied array (set-to-none semantics).
    pub fn zero_grad<'a>(&self, params: impl IntoIterator<Item = &'a mut Param>) {
        for param in params {
            if self.groups.iter().any(|g| g.param == param.id()) {
                param.clear_grad();
            }
        }
    }
}
