//! End-to-end refinement through the public strategy API.

use splat_mcmc::core::{inverse_sigmoid, Attribute, SplatArrays};
use splat_mcmc::mcmc::WeightedSampler;
use splat_mcmc::{Gradients, McmcStrategy, OptimizationParams, SplatData, Strategy};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn population(opacities: &[f32]) -> SplatData {
    let n = opacities.len();
    SplatData::from_arrays(
        SplatArrays {
            means: (0..n * 3).map(|x| x as f32 * 0.01).collect(),
            sh0: (0..n * 3).map(|x| (x % 17) as f32 * 0.1).collect(),
            sh_n: vec![],
            scaling_raw: (0..n * 3).map(|x| -3.0 + (x % 5) as f32 * 0.1).collect(),
            rotation_raw: [1.0, 0.0, 0.0, 0.0].repeat(n),
            opacity_raw: opacities.iter().map(|&o| inverse_sigmoid(o)).collect(),
        },
        0,
        1.0,
    )
    .unwrap()
}

/// No refinement from `post_backward`; tests call relocate/add_new directly.
fn manual_params(max_cap: usize) -> OptimizationParams {
    OptimizationParams {
        iterations: 1000,
        start_refine: 10_000,
        stop_refine: 20_000,
        max_cap,
        seed: Some(42),
        ..Default::default()
    }
}

/// One backward/step round so every array has moment state.
fn warm_up(strategy: &mut McmcStrategy) {
    let grads = Gradients::uniform(strategy.model(), 0.01);
    strategy.post_backward(1, grads).unwrap();
    strategy.step(1).unwrap();
}

fn row_is_zero(strategy: &McmcStrategy, attr: Attribute, row: usize) -> bool {
    let param = strategy.model().param(attr);
    let state = &strategy.optimizer().unwrap().state()[&param.id()];
    let cols = param.cols();
    let range = row * cols..(row + 1) * cols;
    state.exp_avg[range.clone()].iter().all(|&v| v == 0.0)
        && state.exp_avg_sq[range].iter().all(|&v| v == 0.0)
}

fn assert_shapes_consistent(strategy: &McmcStrategy) {
    let model = strategy.model();
    let n = model.size();
    let optimizer = strategy.optimizer().unwrap();
    for attr in Attribute::ALL {
        let param = model.param(attr);
        assert_eq!(param.rows(), n, "{} rows", attr.name());
        assert_eq!(optimizer.group(attr.name()).unwrap().param, param.id());
        if let Some(state) = optimizer.state().get(&param.id()) {
            assert_eq!(state.rows, n, "{} state rows", attr.name());
            assert_eq!(state.exp_avg.len(), param.data().len());
            assert_eq!(state.exp_avg_sq.len(), param.data().len());
        }
    }
}

#[test]
fn test_relocate_moves_dead_onto_live_rows() {
    let mut opacities: Vec<f32> = (0..100).map(|i| 0.5 + (i % 40) as f32 * 0.01).collect();
    for o in &mut opacities[..10] {
        *o = 0.001;
    }
    let mut strategy = McmcStrategy::new(population(&opacities));
    strategy.initialize(&manual_params(1_000_000)).unwrap();
    warm_up(&mut strategy);

    let sh0_before = strategy.model().param(Attribute::Sh0).data().to_vec();
    let scaling_before = strategy.model().param(Attribute::Scaling).data().to_vec();
    let live_colors: Vec<&[f32]> = sh0_before[30..].chunks(3).collect();

    assert_eq!(strategy.relocate().unwrap(), 10);
    assert_eq!(strategy.model().size(), 100);
    assert_shapes_consistent(&strategy);

    let min_opacity = strategy.params().unwrap().min_opacity;
    for dead in 0..10 {
        let color = strategy.model().param(Attribute::Sh0).row(dead);
        assert!(live_colors.contains(&color), "row {dead} copies a live row");
        assert!(strategy.model().opacity(dead) > min_opacity);
        for attr in Attribute::ALL {
            assert!(row_is_zero(&strategy, attr, dead), "{} row {dead}", attr.name());
        }
    }

    // Live rows that were drawn shrink, and their moments restart too.
    let mut drawn = 0;
    for row in 10..100 {
        let scaling = strategy.model().param(Attribute::Scaling).row(row);
        if scaling == &scaling_before[row * 3..row * 3 + 3] {
            assert!(!row_is_zero(&strategy, Attribute::Means, row), "row {row} kept");
            continue;
        }
        drawn += 1;
        for attr in Attribute::ALL {
            assert!(row_is_zero(&strategy, attr, row), "{} row {row}", attr.name());
        }
    }
    assert!(drawn > 0 && drawn <= 10);
}

#[test]
fn test_add_new_grows_to_cap() {
    let opacities: Vec<f32> = (0..1000).map(|i| 0.2 + (i % 50) as f32 * 0.015).collect();
    let mut strategy = McmcStrategy::new(population(&opacities));
    strategy.initialize(&manual_params(1050)).unwrap();
    warm_up(&mut strategy);

    let before_scaling = strategy.model().param(Attribute::Scaling).data().to_vec();
    let before_opacity = strategy.model().get_opacity();
    let before_means = strategy.model().param(Attribute::Means).data().to_vec();

    assert_eq!(strategy.add_new().unwrap(), 50);
    let model = strategy.model();
    assert_eq!(model.size(), 1050);
    assert_shapes_consistent(&strategy);

    let mut shrunk = Vec::new();
    for i in 0..1000 {
        let scaling = model.param(Attribute::Scaling).row(i);
        let old = &before_scaling[i * 3..i * 3 + 3];
        if scaling == old {
            assert_eq!(model.opacity(i), before_opacity[i], "row {i} untouched");
        } else {
            assert!(scaling.iter().zip(old).all(|(s, o)| s < o), "row {i} shrinks");
            assert!(model.opacity(i) < before_opacity[i]);
            shrunk.push(i);
        }
    }
    assert!(!shrunk.is_empty() && shrunk.len() <= 50);
    assert_eq!(model.param(Attribute::Means).data()[..3000], before_means[..]);

    // Clones copy a shrunk row exactly.
    for new in 1000..1050 {
        let row = model.param(Attribute::Scaling).row(new);
        assert!(shrunk.iter().any(|&i| model.param(Attribute::Scaling).row(i) == row));
        for attr in Attribute::ALL {
            assert!(row_is_zero(&strategy, attr, new), "{} row {new}", attr.name());
        }
    }

    // Original rows that were not sampled keep their moments.
    let untouched = (0..1000).find(|i| !shrunk.contains(i)).unwrap();
    assert!(!row_is_zero(&strategy, Attribute::Means, untouched));
}

#[test]
fn test_add_new_never_exceeds_cap_or_shrinks() {
    let mut strategy = McmcStrategy::new(population(&[0.5; 20]));
    strategy.initialize(&manual_params(23)).unwrap();
    let mut last = strategy.model().size();
    for _ in 0..5 {
        strategy.add_new().unwrap();
        let n = strategy.model().size();
        assert!(n >= last && n <= 23);
        last = n;
    }
    assert_eq!(last, 23);
}

#[test]
fn test_sampler_matches_weights_on_both_paths() {
    for limit in [usize::MAX, 1] {
        let mut sampler = WeightedSampler::with_native_limit(limit);
        let mut rng = StdRng::seed_from_u64(9);
        let draws = sampler.sample(&[3.0, 1.0], 4000, &mut rng).unwrap();
        let zeros = draws.iter().filter(|&&d| d == 0).count();
        let freq = zeros as f64 / 4000.0;
        assert!((freq - 0.75).abs() < 0.03, "limit {limit}: {freq}");
    }
}

#[test]
fn test_shapes_hold_through_training() {
    let opacities: Vec<f32> = (0..200).map(|i| 0.1 + (i % 9) as f32 * 0.1).collect();
    let mut strategy = McmcStrategy::new(population(&opacities));
    strategy
        .initialize(&OptimizationParams {
            iterations: 300,
            start_refine: 0,
            stop_refine: 250,
            refine_every: 10,
            max_cap: 320,
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();

    let mut last = strategy.model().size();
    let mut refinements = 0;
    for iter in 1..=300 {
        // Every fifth particle is steadily faded so relocation has work.
        let mut grads = Gradients::uniform(strategy.model(), 0.0);
        let fade = (0..strategy.model().size())
            .map(|i| if i % 5 == 0 { 2.0 } else { -0.1 })
            .collect();
        grads.set(Attribute::Opacity, fade);

        let report = strategy.post_backward(iter, grads).unwrap();
        strategy.step(iter).unwrap();

        refinements += report.refined as usize;
        assert_eq!(report.num_splats, strategy.model().size());
        assert!(report.num_splats >= last && report.num_splats <= 320);
        last = report.num_splats;
        assert_shapes_consistent(&strategy);
    }
    assert_eq!(refinements, 24);
    assert_eq!(last, 320);
}
