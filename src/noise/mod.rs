//! Gaussian noise models used to whiten residuals before they enter the
//! optimizer's normal equations.
use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::linalg::{MatrixViewX, MatrixX, VectorViewX, VectorX};

/// A noise model that whitens a residual/Jacobian pair by its square-root
/// information matrix, `r -> sqrt_inf * r`.
pub trait NoiseModel: Debug + DynClone {
    fn dim(&self) -> usize;

    fn whiten_vec(&self, v: VectorViewX) -> VectorX;

    fn whiten_mat(&self, m: MatrixViewX) -> MatrixX;
}

dyn_clone::clone_trait_object!(NoiseModel);

mod gaussian;
pub use gaussian::GaussianNoise;
