//! Optimization components.
//!
//! - `param`: learnable arrays with stable handles
//! - `adam`: Adam with named groups and per-handle moment state
//! - `scheduler`: exponential learning-rate decay
//! - `state_sync`: keeping moment state aligned when arrays are edited

pub mod adam;
pub mod param;
pub mod scheduler;
pub mod state_sync;

pub use adam::{Adam, AdamOptions, AdamParamState, ParamGroup};
pub use param::{Param, ParamId};
