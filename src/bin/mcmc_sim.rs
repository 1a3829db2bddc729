//! mcmc-sim: drive the MCMC strategy on a synthetic scene
//!
//! Usage:
//!   mcmc-sim --points 5000 --iterations 3000 --max-cap 20000 --seed 7
//!
//! There is no renderer here. The "backward pass" is a toy loss that pulls
//! every mean towards the unit sphere and slowly fades a fixed subset of
//! particles, which is enough to exercise relocation, growth and noise.

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_mcmc::core::{init_from_points, Attribute, InitOptions, PointCloud};
use splat_mcmc::{Gradients, McmcStrategy, OptimizationParams, SharedStrategy, SplatData, Strategy};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mcmc-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of random seed points
    #[arg(long, default_value_t = 2000)]
    points: usize,

    /// Training iterations (overrides the config file)
    #[arg(long)]
    iterations: Option<usize>,

    /// Population ceiling (overrides the config file)
    #[arg(long)]
    max_cap: Option<usize>,

    /// RNG seed for the scene and the strategy
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// JSON file with optimization parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final population as JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log every N iterations
    #[arg(long, default_value_t = 500)]
    log_every: usize,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn random_scene(n: usize, rng: &mut StdRng) -> PointCloud {
    let positions = (0..n)
        .map(|_| {
            Vector3::new(
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
            )
        })
        .collect();
    let colors = (0..n).map(|_| rng.gen::<[u8; 3]>()).collect();
    PointCloud { positions, colors }
}

/// Gradients of `½(|x| − 1)²` on the means, plus a steady push down on the
/// opacity of every seventh particle.
fn toy_gradients(model: &SplatData) -> Gradients {
    let mut grads = Gradients::default();

    let means = model.param(Attribute::Means).data();
    let mut g_means = vec![0.0f32; means.len()];
    for (g, m) in g_means.chunks_mut(3).zip(means.chunks(3)) {
        let p = Vector3::new(m[0], m[1], m[2]);
        let r = p.norm().max(1e-6);
        let d = p * ((r - 1.0) / r);
        g.copy_from_slice(d.as_slice());
    }
    grads.set(Attribute::Means, g_means);

    let g_opacity = (0..model.size())
        .map(|i| if i % 7 == 0 { 1.0 } else { -0.05 })
        .collect();
    grads.set(Attribute::Opacity, g_opacity);

    grads
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut params = match &cli.config {
        Some(path) => OptimizationParams::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OptimizationParams {
            iterations: 3000,
            start_refine: 100,
            stop_refine: 2500,
            ..Default::default()
        },
    };
    if let Some(iterations) = cli.iterations {
        params.iterations = iterations;
    }
    if let Some(max_cap) = cli.max_cap {
        params.max_cap = max_cap;
    }
    params.seed.get_or_insert(cli.seed);

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let scene = random_scene(cli.points, &mut rng);
    let model = init_from_points(&scene, &InitOptions::default()).context("initializing population")?;
    info!(points = cli.points, scene_scale = model.scene_scale(), "built synthetic scene");

    let shared = SharedStrategy::new(McmcStrategy::new(model));
    shared
        .with_mut(|s| s.initialize(&params))
        .context("initializing strategy")?;

    let start = Instant::now();
    for iter in 1..=params.iterations {
        let grads = toy_gradients(shared.read().model());
        let report = shared.post_backward(iter, grads)?;
        shared.step(iter)?;

        if report.refined {
            info!(
                iter,
                relocated = report.relocated,
                added = report.added,
                num_splats = report.num_splats,
                "refine"
            );
        }
        if cli.log_every > 0 && iter % cli.log_every == 0 {
            let guard = shared.read();
            let model = guard.model();
            let opacities = model.get_opacity();
            let mean_opacity = opacities.iter().sum::<f32>() / opacities.len().max(1) as f32;
            info!(
                iter,
                num_splats = model.size(),
                sh_degree = model.active_sh_degree(),
                mean_opacity,
                means_lr = guard.means_lr().unwrap_or_default(),
                elapsed_s = start.elapsed().as_secs_f32(),
                "progress"
            );
        }
    }

    let cloud = shared.snapshot();
    info!(num_splats = cloud.len(), elapsed_s = start.elapsed().as_secs_f32(), "done");

    if let Some(path) = &cli.output {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &cloud)?;
        info!(path = %path.display(), "wrote population");
    }

    Ok(())
}
