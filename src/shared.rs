//! Sharing a strategy between the training thread and a display thread.

use crate::core::{Gradients, GaussianCloud};
use crate::error::McmcError;
use crate::strategy::{RefineReport, Strategy};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// A strategy behind an `Arc<RwLock<_>>`.
///
/// Mutating calls hold the write lock for their whole duration, so a reader
/// never sees arrays and accumulators of different lengths.
pub struct SharedStrategy<S> {
    inner: Arc<RwLock<S>>,
}

impl<S> Clone for SharedStrategy<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Strategy> SharedStrategy<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(strategy)),
        }
    }

    pub fn post_backward(&self, iter: usize, grads: Gradients) -> Result<RefineReport, McmcError> {
        self.inner.write().post_backward(iter, grads)
    }

    pub fn step(&self, iter: usize) -> Result<(), McmcError> {
        self.inner.write().step(iter)
    }

    /// Borrow the strategy for reading; blocks while a mutation is running.
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner.read()
    }

    /// Copy the current population out for rendering or export.
    pub fn snapshot(&self) -> GaussianCloud {
        self.inner.read().model().to_cloud()
    }

    /// Run `f` with exclusive access, e.g. for `initialize`.
    pub fn with_mut<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut self.inner.write())
    }
}
