//! The interface a training loop drives.

use crate::config::OptimizationParams;
use crate::core::{Gradients, SplatData};
use crate::error::McmcError;

/// Outcome of one `post_backward` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefineReport {
    /// Whether this iteration was a refinement step.
    pub refined: bool,
    /// Dead particles moved onto live ones.
    pub relocated: usize,
    /// Particles appended by growth.
    pub added: usize,
    /// Population size after the call.
    pub num_splats: usize,
}

/// Densification strategy owning a population and its optimizer.
///
/// Per iteration the loop calls [`Strategy::post_backward`] with the
/// gradients of the backward pass, then [`Strategy::step`].
pub trait Strategy {
    /// Build the optimizer and any strategy state. Called once.
    fn initialize(&mut self, params: &OptimizationParams) -> Result<(), McmcError>;

    /// Attach gradients, then run per-iteration bookkeeping and refinement.
    fn post_backward(&mut self, iter: usize, grads: Gradients) -> Result<RefineReport, McmcError>;

    /// Whether `iter` is a refinement step.
    fn is_refining(&self, iter: usize) -> bool;

    /// Optimizer update and learning-rate decay.
    fn step(&mut self, iter: usize) -> Result<(), McmcError>;

    fn model(&self) -> &SplatData;
}
