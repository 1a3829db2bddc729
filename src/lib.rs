//! # splat-mcmc: MCMC densification for Gaussian Splatting
//!
//! Instead of cloning and splitting Gaussians by gradient heuristics, the
//! population is treated as samples of a distribution. Low-opacity particles
//! are relocated onto live ones, the population grows by sampling existing
//! particles, and positions receive opacity-weighted noise every step.
//!
//! ## Architecture
//!
//! - `core`: the particle population (`SplatData`), math, initialization
//! - `optim`: learnable arrays, Adam, learning-rate decay, moment-state sync
//! - `mcmc`: sampling, relocation, noise and the `McmcStrategy` controller
//! - `strategy`: the `Strategy` trait a training loop drives
//! - `shared`: lock-protected access for a display thread
//! - `config`: `OptimizationParams`, loadable from JSON
//!
//! Rendering and the backward pass live outside this crate; a training loop
//! hands gradients to `Strategy::post_backward` and calls `Strategy::step`.

pub mod config;
pub mod core;
pub mod error;
pub mod mcmc;
pub mod optim;
pub mod shared;
pub mod strategy;

pub use config::OptimizationParams;
pub use core::{Gaussian, GaussianCloud, Gradients, SplatData};
pub use error::McmcError;
pub use mcmc::McmcStrategy;
pub use shared::SharedStrategy;
pub use strategy::{RefineReport, Strategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
