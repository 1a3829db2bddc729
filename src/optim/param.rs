//! Learnable arrays and their handles.
//!
//! A [`Param`] is a row-major `f32` array with a fixed column width and an
//! optional gradient buffer. Each array is registered with a [`ParamId`] when
//! created; the optimizer keys its accumulator state by that id instead of by
//! memory identity. Replacing an array wholesale (growth) produces a new
//! `Param` with a fresh id, and the accumulator record is rekeyed to follow it.

use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle for one learnable array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    fn next() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// A learnable row-major array.
///
/// Not `Clone`: two arrays must never share an id.
#[derive(Debug)]
pub struct Param {
    id: ParamId,
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    grad: Option<Vec<f32>>,
}

impl Param {
    /// Register a new learnable array of shape `rows × cols`.
    ///
    /// The row count is stored explicitly so zero-width arrays (e.g. the
    /// higher SH bands at degree 0) still report the population size.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "param data length does not match {rows}x{cols}"
        );
        Self {
            id: ParamId::next(),
            rows,
            cols,
            data,
            grad: None,
        }
    }

    /// A zero-filled array with `rows` rows.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, vec![0.0; rows * cols])
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of rows (the leading dimension).
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let cols = self.cols;
        &mut self.data[i * cols..(i + 1) * cols]
    }

    pub fn grad(&self) -> Option<&[f32]> {
        self.grad.as_deref()
    }

    /// Split borrow used by the optimizer: parameter values and gradient.
    pub(crate) fn data_and_grad_mut(&mut self) -> (&mut [f32], Option<&[f32]>) {
        (&mut self.data, self.grad.as_deref())
    }

    /// Replace the gradient buffer. Length must match the data length.
    pub fn set_grad(&mut self, grad: Vec<f32>) {
        assert_eq!(grad.len(), self.data.len(), "gradient length mismatch for {}", self.id);
        self.grad = Some(grad);
    }

    /// Drop the gradient (equivalent to `zero_grad(set_to_none = true)`).
    pub fn clear_grad(&mut self) {
        self.grad = None;
    }

    /// Copy row `src` over row `dst` in place.
    pub fn copy_row(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let cols = self.cols;
        self.data
            .copy_within(src * cols..(src + 1) * cols, dst * cols);
    }

    /// Build `concat(self, self[indices])` as a new, separately registered array.
    ///
    /// The result has no gradient. Allocation is fallible so growth can abort
    /// before touching any live state.
    pub fn concat_rows(&self, indices: &[usize]) -> Result<Param, TryReserveError> {
        let cols = self.cols;
        let mut data = Vec::new();
        data.try_reserve_exact(self.data.len() + indices.len() * cols)?;
        data.extend_from_slice(&self.data);
        for &i in indices {
            data.extend_from_slice(&self.data[i * cols..(i + 1) * cols]);
        }
        Ok(Param::new(self.rows + indices.len(), cols, data))
    }
}
