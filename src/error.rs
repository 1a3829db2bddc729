//! Error type shared by the strategy, optimizer sync and configuration.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors that can occur while managing the splat population.
#[derive(Debug, Error)]
pub enum McmcError {
    #[error("strategy used before initialize()")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("gradient for {attribute} has {actual} elements, expected {expected}")]
    ShapeMismatch {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),

    #[error("allocation failed while growing the population: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}
