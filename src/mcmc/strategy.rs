//! MCMC densification strategy.
//!
//! Instead of splitting by gradient magnitude, the population is treated as
//! samples of a distribution:
//! - `relocate`: particles whose opacity fell to `min_opacity` are moved onto
//!   live particles drawn proportionally to opacity.
//! - `add_new`: the population grows by `growth_factor` (up to `max_cap`)
//!   by cloning particles drawn proportionally to opacity.
//! - noise: every step, low-opacity particles get pushed around.
//!
//! Both structural edits use the relocation formula so the clones together
//! look like the particle they came from, and both keep the Adam moments
//! aligned with the arrays.

use crate::config::OptimizationParams;
use crate::core::{Attribute, Gradients, SplatData};
use crate::core::math::logit;
use crate::error::McmcError;
use crate::mcmc::binomial::BinomialTable;
use crate::mcmc::noise::{self, NoiseParams};
use crate::mcmc::relocation;
use crate::mcmc::sampler::{draw_ratios, WeightedSampler};
use crate::optim::adam::{Adam, AdamOptions, AdamParamState, ParamGroup};
use crate::optim::param::{Param, ParamId};
use crate::optim::scheduler::ExponentialLr;
use crate::optim::state_sync::{self, GrowPlan};
use crate::strategy::{RefineReport, Strategy};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Upper opacity bound after relocation is `1 − MIN_OPACITY_CLAMP`.
const MIN_OPACITY_CLAMP: f32 = 1e-7;

/// Index of the position group; the scheduler and noise read its LR.
const MEANS_GROUP: usize = 0;

/// Everything that exists only after `initialize`.
struct Engine {
    params: OptimizationParams,
    optimizer: Adam,
    scheduler: ExponentialLr,
    binoms: BinomialTable,
    sampler: WeightedSampler,
    noise: NoiseParams,
    rng: StdRng,
    /// Per-particle draw counter, reused between refinements.
    counts: Vec<u32>,
}

pub struct McmcStrategy {
    splat_data: SplatData,
    engine: Option<Engine>,
}

impl McmcStrategy {
    pub fn new(splat_data: SplatData) -> Self {
        Self {
            splat_data,
            engine: None,
        }
    }

    pub fn optimizer(&self) -> Option<&Adam> {
        self.engine.as_ref().map(|e| &e.optimizer)
    }

    pub fn params(&self) -> Option<&OptimizationParams> {
        self.engine.as_ref().map(|e| &e.params)
    }

    /// Current position learning rate (after decay).
    pub fn means_lr(&self) -> Option<f32> {
        self.optimizer()
            .and_then(|o| o.param_groups().get(MEANS_GROUP))
            .map(|g| g.options.lr)
    }

    /// Move dead particles onto opacity-sampled live ones. Returns the number
    /// of dead particles processed; the population size never changes.
    pub fn relocate(&mut self) -> Result<usize, McmcError> {
        let engine = self.engine.as_mut().ok_or(McmcError::NotInitialized)?;
        let data = &mut self.splat_data;

        let opacities = data.get_opacity();
        let min_opacity = engine.params.min_opacity;
        let (dead, alive): (Vec<usize>, Vec<usize>) =
            (0..opacities.len()).partition(|&i| opacities[i] <= min_opacity);

        if dead.is_empty() {
            return Ok(0);
        }
        if alive.is_empty() {
            warn!(dead = dead.len(), "every particle is below min_opacity; skipping relocation");
            return Ok(0);
        }

        let probs: Vec<f32> = alive.iter().map(|&i| opacities[i]).collect();
        let sampled: Vec<usize> = engine
            .sampler
            .sample(&probs, dead.len(), &mut engine.rng)?
            .into_iter()
            .map(|j| alive[j])
            .collect();

        let relocated = engine.relocated_rows(data, &sampled, &opacities);
        let (opacity, scaling) = data.opacity_scaling_mut();
        for (draw, &row) in sampled.iter().enumerate() {
            relocated.write(draw, row, opacity, scaling);
        }

        for attr in Attribute::ALL {
            let param = data.param_mut(attr);
            for (&src, &dst) in sampled.iter().zip(&dead) {
                param.copy_row(src, dst);
            }
        }

        let mut touched: Vec<usize> = sampled.iter().chain(&dead).copied().collect();
        touched.sort_unstable();
        touched.dedup();
        for param in data.params() {
            state_sync::reset_rows(&mut engine.optimizer, param.id(), &touched);
        }

        Ok(dead.len())
    }

    /// Grow the population by cloning opacity-sampled particles. Returns the
    /// number of particles added.
    ///
    /// On error the population and the accumulators are left as they were.
    pub fn add_new(&mut self) -> Result<usize, McmcError> {
        let engine = self.engine.as_mut().ok_or(McmcError::NotInitialized)?;
        match engine.prepare_growth(&self.splat_data)? {
            Some(pending) => Ok(engine.commit_growth(&mut self.splat_data, pending)),
            None => Ok(0),
        }
    }

    /// Release scratch buffers kept between refinements.
    pub fn empty_cache(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.sampler.release_scratch();
            engine.counts = Vec::new();
        }
    }

    /// Perturb positions with opacity-weighted, covariance-shaped noise.
    pub fn inject_noise(&mut self) -> Result<(), McmcError> {
        let lr = self.means_lr().ok_or(McmcError::NotInitialized)?;
        let engine = self.engine.as_mut().ok_or(McmcError::NotInitialized)?;
        noise::inject_noise(&mut self.splat_data, lr, &engine.noise, &mut engine.rng);
        Ok(())
    }
}

/// Relocated raw opacity and scaling, one entry per draw.
struct RelocatedRows {
    opacity_raw: Vec<f32>,
    scaling_raw: Vec<[f32; 3]>,
}

impl RelocatedRows {
    fn write(&self, draw: usize, row: usize, opacity: &mut Param, scaling: &mut Param) {
        opacity.row_mut(row)[0] = self.opacity_raw[draw];
        scaling.row_mut(row).copy_from_slice(&self.scaling_raw[draw]);
    }
}

/// A growth step with every buffer allocated and nothing applied yet.
struct PendingGrowth {
    added: usize,
    grown: [Param; 6],
    plans: Vec<GrowPlan>,
    states: Vec<(ParamId, AdamParamState)>,
}

impl Engine {
    /// Apply the relocation formula to the draws in `sampled`.
    ///
    /// Each row's multiplicity is its draw count plus one (the row itself).
    fn relocated_rows(
        &mut self,
        data: &SplatData,
        sampled: &[usize],
        opacities: &[f32],
    ) -> RelocatedRows {
        let ratios = draw_ratios(
            sampled,
            data.size(),
            self.binoms.max_n() - 1,
            &mut self.counts,
        );
        let scales = data.get_scaling();
        let old_opacity: Vec<f32> = sampled.iter().map(|&i| opacities[i]).collect();
        let old_scale: Vec<Vector3<f32>> = sampled.iter().map(|&i| scales[i]).collect();

        let (new_opacity, new_scale) =
            relocation::relocate(&old_opacity, &old_scale, &ratios, &self.binoms);

        let lo = self.params.min_opacity;
        let hi = 1.0 - MIN_OPACITY_CLAMP;
        RelocatedRows {
            opacity_raw: new_opacity.iter().map(|&o| logit(o.clamp(lo, hi))).collect(),
            scaling_raw: new_scale.iter().map(|s| [s.x.ln(), s.y.ln(), s.z.ln()]).collect(),
        }
    }

    /// Sample the particles to clone and build the grown arrays and
    /// accumulators. Neither `data` nor the optimizer is modified.
    fn prepare_growth(&mut self, data: &SplatData) -> Result<Option<PendingGrowth>, McmcError> {
        let current = data.size();
        let grown_size = (self.params.growth_factor as f64 * current as f64).round() as usize;
        let n_target = self.params.max_cap.min(grown_size);
        let added = n_target.saturating_sub(current);
        if added == 0 {
            return Ok(None);
        }

        let opacities = data.get_opacity();
        let sampled = self.sampler.sample(&opacities, added, &mut self.rng)?;
        let relocated = self.relocated_rows(data, &sampled, &opacities);

        let [means, sh0, sh_n, scaling, rotation, opacity] =
            Attribute::ALL.map(|attr| data.param(attr).concat_rows(&sampled));
        let (means, sh0, sh_n, mut scaling, rotation, mut opacity) =
            (means?, sh0?, sh_n?, scaling?, rotation?, opacity?);

        // The originals dim and shrink to make room for their clones, and the
        // clones match them.
        for (draw, &row) in sampled.iter().enumerate() {
            relocated.write(draw, row, &mut opacity, &mut scaling);
            relocated.write(draw, current + draw, &mut opacity, &mut scaling);
        }

        let grown = [means, sh0, sh_n, scaling, rotation, opacity];
        let plans: Vec<GrowPlan> = data
            .params()
            .zip(&grown)
            .map(|(old, new)| GrowPlan {
                old: old.id(),
                new: new.id(),
                new_rows: added,
            })
            .collect();
        let states = state_sync::extend_states(&self.optimizer, &plans)?;

        Ok(Some(PendingGrowth {
            added,
            grown,
            plans,
            states,
        }))
    }

    /// Swap in a prepared growth step. Cannot fail.
    fn commit_growth(&mut self, data: &mut SplatData, pending: PendingGrowth) -> usize {
        state_sync::install_states(&mut self.optimizer, &pending.plans, pending.states);
        for plan in &pending.plans {
            self.optimizer.replace_param(plan.old, plan.new);
        }
        data.replace_params(pending.grown);
        pending.added
    }
}

impl Strategy for McmcStrategy {
    fn initialize(&mut self, params: &OptimizationParams) -> Result<(), McmcError> {
        params.validate()?;
        let data = &self.splat_data;

        let lrs = [
            params.means_lr * data.scene_scale(),
            params.shs_lr,
            params.shs_lr / 20.0,
            params.scaling_lr,
            params.rotation_lr,
            params.opacity_lr,
        ];
        let groups = Attribute::ALL
            .into_iter()
            .zip(lrs)
            .map(|(attr, lr)| {
                ParamGroup::new(
                    attr.name(),
                    data.param(attr).id(),
                    AdamOptions::new(lr).eps(params.adam_eps),
                )
            })
            .collect();

        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let gamma = params.means_lr_gamma();

        self.engine = Some(Engine {
            params: params.clone(),
            optimizer: Adam::new(groups),
            scheduler: ExponentialLr::new(gamma, MEANS_GROUP),
            binoms: BinomialTable::build(params.binomial_max_n),
            sampler: WeightedSampler::with_native_limit(params.multinomial_limit),
            noise: NoiseParams {
                noise_lr: params.noise_lr,
                k: params.noise_k,
                x0: params.noise_x0,
            },
            rng,
            counts: Vec::new(),
        });

        info!(
            num_splats = data.size(),
            scene_scale = data.scene_scale(),
            gamma,
            max_cap = params.max_cap,
            "initialized MCMC strategy"
        );
        Ok(())
    }

    fn post_backward(&mut self, iter: usize, grads: Gradients) -> Result<RefineReport, McmcError> {
        let sh_interval = match &self.engine {
            Some(engine) => engine.params.sh_degree_interval,
            None => return Err(McmcError::NotInitialized),
        };
        self.splat_data.set_gradients(grads)?;

        if iter % sh_interval == 0 {
            self.splat_data.increment_sh_degree();
        }

        let mut report = RefineReport::default();
        if self.is_refining(iter) {
            report.refined = true;
            report.relocated = self.relocate()?;
            report.added = self.add_new()?;
            self.empty_cache();
            debug!(
                iter,
                relocated = report.relocated,
                added = report.added,
                num_splats = self.splat_data.size(),
                "refined population"
            );
        }

        self.inject_noise()?;
        report.num_splats = self.splat_data.size();
        Ok(report)
    }

    fn is_refining(&self, iter: usize) -> bool {
        self.engine.as_ref().is_some_and(|e| {
            iter < e.params.stop_refine
                && iter > e.params.start_refine
                && iter % e.params.refine_every == 0
        })
    }

    fn step(&mut self, iter: usize) -> Result<(), McmcError> {
        let engine = self.engine.as_mut().ok_or(McmcError::NotInitialized)?;
        if iter < engine.params.iterations {
            engine.optimizer.step(self.splat_data.params_mut());
            engine.optimizer.zero_grad(self.splat_data.params_mut());
            engine.scheduler.step(&mut engine.optimizer);
        }
        Ok(())
    }

    fn model(&self) -> &SplatData {
        &self.splat_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::inverse_sigmoid;
    use crate::core::SplatArrays;
    use approx::assert_relative_eq;

    fn population(opacities: &[f32]) -> SplatData {
        let n = opacities.len();
        SplatData::from_arrays(
            SplatArrays {
                means: (0..n * 3).map(|x| x as f32).collect(),
                sh0: (0..n * 3).map(|x| x as f32 * 0.1).collect(),
                sh_n: vec![0.0; n * 9],
                scaling_raw: vec![-2.0; n * 3],
                rotation_raw: [1.0, 0.0, 0.0, 0.0].repeat(n),
                opacity_raw: opacities.iter().map(|&o| inverse_sigmoid(o)).collect(),
            },
            1,
            2.0,
        )
        .unwrap()
    }

    fn params() -> OptimizationParams {
        OptimizationParams {
            iterations: 100,
            start_refine: 10,
            stop_refine: 50,
            refine_every: 5,
            seed: Some(1),
            ..Default::default()
        }
    }

    fn initialized(opacities: &[f32]) -> McmcStrategy {
        let mut s = McmcStrategy::new(population(opacities));
        s.initialize(&params()).unwrap();
        s
    }

    #[test]
    fn test_uninitialized_strategy_refuses_work() {
        let mut s = McmcStrategy::new(population(&[0.5]));
        assert!(matches!(s.step(0), Err(McmcError::NotInitialized)));
        assert!(matches!(
            s.post_backward(0, Gradients::default()),
            Err(McmcError::NotInitialized)
        ));
        assert!(matches!(s.relocate(), Err(McmcError::NotInitialized)));
        assert!(!s.is_refining(20));
    }

    #[test]
    fn test_is_refining_window() {
        let s = initialized(&[0.5]);
        assert!(!s.is_refining(10), "start is exclusive");
        assert!(s.is_refining(15));
        assert!(!s.is_refining(16));
        assert!(s.is_refining(45));
        assert!(!s.is_refining(50), "stop is exclusive");
    }

    #[test]
    fn test_initialize_sets_group_learning_rates() {
        let s = initialized(&[0.5; 3]);
        let opt = s.optimizer().unwrap();
        let p = params();
        assert_eq!(opt.param_groups().len(), 6);
        assert_relative_eq!(opt.group("means").unwrap().options.lr, p.means_lr * 2.0);
        assert_relative_eq!(opt.group("shN").unwrap().options.lr, p.shs_lr / 20.0);
        assert_eq!(opt.group("opacity").unwrap().options.eps, 1e-15);
        for attr in Attribute::ALL {
            assert_eq!(opt.group(attr.name()).unwrap().param, s.model().param(attr).id());
        }
    }

    #[test]
    fn test_step_decays_means_lr_only() {
        let mut s = initialized(&[0.5; 2]);
        let before = s.means_lr().unwrap();
        let opacity_lr = s.optimizer().unwrap().group("opacity").unwrap().options.lr;
        s.step(0).unwrap();
        let gamma = params().means_lr_gamma() as f32;
        assert_relative_eq!(s.means_lr().unwrap(), before * gamma, max_relative = 1e-6);
        assert_eq!(s.optimizer().unwrap().group("opacity").unwrap().options.lr, opacity_lr);

        // Past the last iteration nothing changes.
        let frozen = s.means_lr().unwrap();
        s.step(100).unwrap();
        assert_eq!(s.means_lr().unwrap(), frozen);
    }

    #[test]
    fn test_relocate_noop_without_dead() {
        let mut s = initialized(&[0.5, 0.6, 0.7]);
        assert_eq!(s.relocate().unwrap(), 0);
    }

    #[test]
    fn test_relocate_noop_when_everything_is_dead() {
        let mut s = initialized(&[0.001, 0.002]);
        let before = s.model().param(Attribute::Means).data().to_vec();
        assert_eq!(s.relocate().unwrap(), 0);
        assert_eq!(s.model().param(Attribute::Means).data(), &before[..]);
    }

    #[test]
    fn test_relocate_single_survivor_takes_all_dead() {
        let mut s = initialized(&[0.001, 0.8, 0.001]);
        assert_eq!(s.relocate().unwrap(), 2);
        let data = s.model();
        assert_eq!(data.size(), 3);
        // Survivor drawn twice: multiplicity 3.
        let expected = 1.0 - (1.0f32 - 0.8).powf(1.0 / 3.0);
        for i in 0..3 {
            assert_relative_eq!(data.opacity(i), expected, epsilon = 1e-4);
            assert_eq!(data.param(Attribute::Sh0).row(i), data.param(Attribute::Sh0).row(1));
        }
        assert!(data.scaling(0).x < (-2.0f32).exp());
    }

    #[test]
    fn test_add_new_respects_cap() {
        let mut s = McmcStrategy::new(population(&[0.5; 40]));
        s.initialize(&OptimizationParams {
            max_cap: 41,
            ..params()
        })
        .unwrap();
        assert_eq!(s.add_new().unwrap(), 1);
        assert_eq!(s.model().size(), 41);
        assert_eq!(s.add_new().unwrap(), 0, "At cap");
    }

    #[test]
    fn test_prepared_growth_touches_nothing_until_committed() {
        let opacities: Vec<f32> = (0..20).map(|i| 0.2 + (i % 8) as f32 * 0.1).collect();
        let mut s = initialized(&opacities);
        s.post_backward(1, Gradients::uniform(s.model(), 1.0)).unwrap();
        s.step(1).unwrap();

        let data_before: Vec<(ParamId, Vec<f32>)> = s
            .model()
            .params()
            .map(|p| (p.id(), p.data().to_vec()))
            .collect();
        let state_before: Vec<(ParamId, Vec<f32>)> = data_before
            .iter()
            .map(|(id, _)| (*id, s.optimizer().unwrap().state()[id].exp_avg.clone()))
            .collect();

        // Abandon a fully prepared step, as an allocation failure would.
        let pending = s
            .engine
            .as_mut()
            .unwrap()
            .prepare_growth(&s.splat_data)
            .unwrap()
            .unwrap();
        assert_eq!(pending.added, 1);
        drop(pending);

        assert_eq!(s.model().size(), 20);
        for (p, (id, data)) in s.model().params().zip(&data_before) {
            assert_eq!(p.id(), *id);
            assert_eq!(p.data(), &data[..]);
        }
        let opt = s.optimizer().unwrap();
        assert_eq!(opt.state().len(), 6);
        for (id, exp_avg) in &state_before {
            assert_eq!(&opt.state()[id].exp_avg, exp_avg);
        }

        assert_eq!(s.add_new().unwrap(), 1);
        assert_eq!(s.model().size(), 21);
    }

    #[test]
    fn test_clone_matches_its_relocated_original() {
        let mut s = initialized(&[0.9]);
        let before = s.model().scaling(0);
        // round(1.05 * 1) = 1 would add nothing.
        s.engine.as_mut().unwrap().params.growth_factor = 2.0;
        assert_eq!(s.add_new().unwrap(), 1);

        let data = s.model();
        for attr in Attribute::ALL {
            assert_eq!(data.param(attr).row(0), data.param(attr).row(1), "{}", attr.name());
        }
        let expected = 1.0 - (1.0f32 - 0.9).powf(0.5);
        assert_relative_eq!(data.opacity(1), expected, epsilon = 1e-4);
        assert!(data.scaling(1).x < before.x);
    }

    #[test]
    fn test_add_new_rekeys_optimizer_groups() {
        let mut s = initialized(&[0.5; 20]);
        s.post_backward(1, Gradients::uniform(s.model(), 1.0)).unwrap();
        s.step(1).unwrap();

        assert_eq!(s.add_new().unwrap(), 1);
        let opt = s.optimizer().unwrap();
        assert_eq!(opt.state().len(), 6);
        for attr in Attribute::ALL {
            let param = s.model().param(attr);
            assert_eq!(opt.group(attr.name()).unwrap().param, param.id());
            let state = &opt.state()[&param.id()];
            assert_eq!(state.rows, 21);
            assert_eq!(state.exp_avg.len(), param.data().len());
        }
    }

    #[test]
    fn test_post_backward_refines_on_schedule() {
        let mut opacities = vec![0.5; 20];
        opacities[3] = 0.001;
        let mut s = initialized(&opacities);
        let quiet = s.post_backward(11, Gradients::default()).unwrap();
        assert!(!quiet.refined);
        assert_eq!(quiet.num_splats, 20);

        let report = s.post_backward(15, Gradients::default()).unwrap();
        assert!(report.refined);
        assert_eq!(report.relocated, 1);
        assert_eq!(report.added, 1, "1.05 * 20 = 21");
        assert_eq!(report.num_splats, 21);
    }

    #[test]
    fn test_post_backward_increments_sh_degree() {
        let mut s = initialized(&[0.5]);
        assert_eq!(s.model().active_sh_degree(), 0);
        s.post_backward(1000, Gradients::default()).unwrap();
        assert_eq!(s.model().active_sh_degree(), 1);
        s.post_backward(2000, Gradients::default()).unwrap();
        assert_eq!(s.model().active_sh_degree(), 1, "capped at max degree");
    }

    #[test]
    fn test_post_backward_rejects_bad_gradient_shape() {
        let mut s = initialized(&[0.5; 4]);
        let grads = Gradients {
            opacity: Some(vec![0.0; 3]),
            ..Default::default()
        };
        assert!(matches!(
            s.post_backward(1, grads),
            Err(McmcError::ShapeMismatch { attribute: "opacity", .. })
        ));
    }

    #[test]
    fn test_empty_cache_releases_scratch() {
        let mut s = McmcStrategy::new(population(&[0.5; 30]));
        s.initialize(&OptimizationParams {
            multinomial_limit: 1,
            ..params()
        })
        .unwrap();
        s.add_new().unwrap();
        assert!(s.engine.as_ref().unwrap().sampler.scratch_capacity() > 0);
        s.empty_cache();
        let engine = s.engine.as_ref().unwrap();
        assert_eq!(engine.sampler.scratch_capacity(), 0);
        assert_eq!(engine.counts.capacity(), 0);
    }
}
