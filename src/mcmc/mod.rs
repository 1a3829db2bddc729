//! Markov-chain Monte Carlo densification.
//!
//! - `binomial`: binomial coefficient table for the relocation series
//! - `sampler`: opacity-weighted sampling with replacement
//! - `relocation`: opacity/scale redistribution over clones
//! - `noise`: covariance-shaped position noise
//! - `strategy`: the controller tying them together

pub mod binomial;
pub mod noise;
pub mod relocation;
pub mod sampler;
pub mod strategy;

pub use binomial::BinomialTable;
pub use noise::NoiseParams;
pub use sampler::WeightedSampler;
pub use strategy::McmcStrategy;
