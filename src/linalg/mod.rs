//! Linear algebra helpers shared across the estimator.
//!
//! This re-aliases `nalgebra` types to the crate's [`dtype`](crate::dtype),
//! and adds a [`MatrixBlock`] helper for assembling factor Jacobians into the
//! optimizer's sparse system plus a [`NumericalDiff`] Jacobian checker used
//! only by tests (every factor in [`residuals`](crate::residuals) ships an
//! analytical Jacobian; numerical differentiation here is a correctness
//! cross-check, not a differentiation strategy).
use crate::dtype;

mod nalgebra_wrap;
pub use nalgebra_wrap::*;

mod numerical_diff;
pub use numerical_diff::NumericalDiff;

// ------------------------- MatrixBlock ------------------------- //

/// A matrix together with the column offset of each variable block inside
/// it, used to assemble a factor's Jacobian into the optimizer's sparse
/// system without re-deriving the block layout at every call site.
#[derive(Debug, Clone)]
pub struct MatrixBlock {
    mat: MatrixX,
    idx: Vec<usize>,
}

impl MatrixBlock {
    pub fn new(mat: MatrixX, idx: Vec<usize>) -> Self {
        Self { mat, idx }
    }

    pub fn get_block(&self, idx: usize) -> MatrixViewX<'_> {
        let idx_start = self.idx[idx];
        let idx_end = if idx + 1 < self.idx.len() {
            self.idx[idx + 1]
        } else {
            self.mat.ncols()
        };
        self.mat.columns(idx_start, idx_end - idx_start)
    }

    pub fn mat(&self) -> MatrixViewX<'_> {
        self.mat.as_view()
    }

    pub fn idx(&self) -> &[usize] {
        &self.idx
    }
}

/// The value and Jacobian/gradient produced by a differentiation helper.
#[derive(Debug, Clone)]
pub struct DiffResult<V, G> {
    pub value: V,
    pub diff: G,
}

/// Central difference derivative of a scalar function, used by unit tests
/// that check a closed-form scalar derivative (e.g. time-offset Jacobians).
pub fn numerical_derivative<F: Fn(dtype) -> dtype>(
    f: F,
    x: dtype,
    eps: dtype,
) -> DiffResult<dtype, dtype> {
    let r = f(x);
    let d = (f(x + eps) - f(x - eps)) / (2.0 * eps);
    DiffResult { value: r, diff: d }
}
