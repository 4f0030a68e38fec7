use crate::dtype;
use crate::linalg::{DiffResult, MatrixX, VectorX};
use crate::variables::Manifold;

/// Central-difference Jacobian checker.
///
/// Used only in `#[cfg(test)]` blocks to cross-check the analytical
/// Jacobians every residual in [`residuals`](crate::residuals) hand-derives.
/// Not part of the estimator's runtime path.
pub struct NumericalDiff<const PWR: i32 = 6>;

impl<const PWR: i32> NumericalDiff<PWR> {
    fn eps() -> dtype {
        dtype::powi(10.0, -PWR)
    }

    /// Jacobian of `f` at `x` with respect to `x`'s tangent space, via
    /// central differences along each tangent basis direction.
    pub fn jacobian<V, F>(f: F, x: &V) -> DiffResult<VectorX, MatrixX>
    where
        V: Manifold,
        F: Fn(&V) -> VectorX,
    {
        let eps = Self::eps();
        let dim = x.dim();
        let value = f(x);

        let mut jac = MatrixX::zeros(value.len(), dim);
        let mut tangent = VectorX::zeros(dim);
        for j in 0..dim {
            tangent[j] = eps;
            let plus = f(&x.oplus(tangent.as_view()));
            tangent[j] = -eps;
            let minus = f(&x.oplus(tangent.as_view()));
            tangent[j] = 0.0;

            let delta = (plus - minus) / (2.0 * eps);
            jac.columns_mut(j, 1).copy_from(&delta);
        }

        DiffResult { value, diff: jac }
    }

    /// Two-variable Jacobian, concatenated `[d/dx1 | d/dx2]`.
    pub fn jacobian_2<V1, V2, F>(f: F, x1: &V1, x2: &V2) -> DiffResult<VectorX, MatrixX>
    where
        V1: Manifold,
        V2: Manifold,
        F: Fn(&V1, &V2) -> VectorX,
    {
        let eps = Self::eps();
        let dim1 = x1.dim();
        let dim2 = x2.dim();
        let value = f(x1, x2);

        let mut jac = MatrixX::zeros(value.len(), dim1 + dim2);

        let mut t1 = VectorX::zeros(dim1);
        for j in 0..dim1 {
            t1[j] = eps;
            let plus = f(&x1.oplus(t1.as_view()), x2);
            t1[j] = -eps;
            let minus = f(&x1.oplus(t1.as_view()), x2);
            t1[j] = 0.0;
            let delta = (plus - minus) / (2.0 * eps);
            jac.columns_mut(j, 1).copy_from(&delta);
        }

        let mut t2 = VectorX::zeros(dim2);
        for j in 0..dim2 {
            t2[j] = eps;
            let plus = f(x1, &x2.oplus(t2.as_view()));
            t2[j] = -eps;
            let minus = f(x1, &x2.oplus(t2.as_view()));
            t2[j] = 0.0;
            let delta = (plus - minus) / (2.0 * eps);
            jac.columns_mut(dim1 + j, 1).copy_from(&delta);
        }

        DiffResult { value, diff: jac }
    }
}
