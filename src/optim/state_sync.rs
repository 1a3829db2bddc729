//! Keeping Adam accumulators aligned with structural edits to their arrays.
//!
//! Two edits happen to the population: rows get overwritten in place
//! (relocation) and arrays get replaced by longer copies (growth). After
//! either, each accumulator record must have the same row count as the array
//! it shadows, or be absent.

use crate::error::McmcError;
use crate::optim::adam::{Adam, AdamParamState};
use crate::optim::param::ParamId;
use std::collections::TryReserveError;

/// Growth of one array: `old` is replaced by `new`, which has `new_rows`
/// extra rows appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowPlan {
    pub old: ParamId,
    pub new: ParamId,
    pub new_rows: usize,
}

/// Zero every moment buffer of `param` at the given rows.
///
/// No-op when the array has no accumulator yet. Out-of-range rows are ignored.
pub fn reset_rows(optimizer: &mut Adam, param: ParamId, rows: &[usize]) {
    let Some(state) = optimizer.state_mut().get_mut(&param) else {
        return;
    };
    let (n, cols) = (state.rows, state.cols);
    for buf in state.buffers_mut() {
        for &row in rows.iter().filter(|&&r| r < n) {
            buf[row * cols..(row + 1) * cols].fill(0.0);
        }
    }
}

/// Extend `old`'s accumulator by `new_rows` zero rows and rekey it to `new`.
pub fn grow_array(
    optimizer: &mut Adam,
    old: ParamId,
    new: ParamId,
    new_rows: usize,
) -> Result<(), McmcError> {
    grow_arrays(optimizer, &[GrowPlan { old, new, new_rows }])
}

/// Batched [`grow_array`].
///
/// Every extended record is built before the store is modified, so a failed
/// allocation leaves all records under their old keys.
pub fn grow_arrays(optimizer: &mut Adam, plans: &[GrowPlan]) -> Result<(), McmcError> {
    let extended = extend_states(optimizer, plans)?;
    install_states(optimizer, plans, extended);
    Ok(())
}

/// Extended accumulator records for `plans`, keyed by the new ids. The store
/// is only read.
pub fn extend_states(
    optimizer: &Adam,
    plans: &[GrowPlan],
) -> Result<Vec<(ParamId, AdamParamState)>, McmcError> {
    let mut extended = Vec::with_capacity(plans.len());
    for plan in plans {
        if let Some(state) = optimizer.state().get(&plan.old) {
            extended.push((plan.new, extend_state(state, plan.new_rows)?));
        }
    }
    Ok(extended)
}

/// Drop the records of every `plan.old` and insert the prebuilt ones.
pub fn install_states(
    optimizer: &mut Adam,
    plans: &[GrowPlan],
    extended: Vec<(ParamId, AdamParamState)>,
) {
    for plan in plans {
        optimizer.state_mut().remove(&plan.old);
    }
    optimizer.state_mut().extend(extended);
}

/// The error `try_reserve` reports for a length that does not fit in `usize`.
fn capacity_overflow() -> TryReserveError {
    match Vec::<f32>::new().try_reserve_exact(usize::MAX) {
        Err(e) => e,
        Ok(()) => unreachable!("reserving usize::MAX floats cannot succeed"),
    }
}

fn extend_state(old: &AdamParamState, new_rows: usize) -> Result<AdamParamState, McmcError> {
    let extra = new_rows.checked_mul(old.cols).ok_or_else(capacity_overflow)?;
    let extend = |buf: &[f32]| -> Result<Vec<f32>, McmcError> {
        let len = buf.len().checked_add(extra).ok_or_else(capacity_overflow)?;
        let mut out = Vec::new();
        out.try_reserve_exact(len)?;
        out.extend_from_slice(buf);
        out.resize(len, 0.0);
        Ok(out)
    };

    Ok(AdamParamState {
        step: old.step,
        rows: old.rows + new_rows,
        cols: old.cols,
        exp_avg: extend(&old.exp_avg)?,
        exp_avg_sq: extend(&old.exp_avg_sq)?,
        max_exp_avg_sq: old.max_exp_avg_sq.as_deref().map(extend).transpose()?,
    })
}
