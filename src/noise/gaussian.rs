use std::fmt;

use super::NoiseModel;
use crate::{
    dtype,
    linalg::{Matrix, MatrixView, MatrixViewX, MatrixX, Vector, VectorView, VectorViewX, VectorX},
};

/// A fixed-size Gaussian noise model parameterized by its square-root
/// information matrix.
#[derive(Clone, Debug)]
pub struct GaussianNoise<const N: usize> {
    sqrt_inf: Matrix<N, N>,
}

impl<const N: usize> NoiseModel for GaussianNoise<N> {
    fn dim(&self) -> usize {
        N
    }

    fn whiten_vec(&self, v: VectorViewX) -> VectorX {
        let mut out = VectorX::zeros(v.len());
        self.sqrt_inf.mul_to(&v, &mut out);
        out
    }

    fn whiten_mat(&self, m: MatrixViewX) -> MatrixX {
        let mut out = MatrixX::zeros(m.nrows(), m.ncols());
        self.sqrt_inf.mul_to(&m, &mut out);
        out
    }
}

impl<const N: usize> GaussianNoise<N> {
    pub fn identity() -> Self {
        Self {
            sqrt_inf: Matrix::<N, N>::identity(),
        }
    }

    pub fn from_scalar_sigma(sigma: dtype) -> Self {
        Self {
            sqrt_inf: Matrix::<N, N>::from_diagonal_element(1.0 / sigma),
        }
    }

    pub fn from_scalar_cov(cov: dtype) -> Self {
        Self {
            sqrt_inf: Matrix::<N, N>::from_diagonal_element(1.0 / cov.sqrt()),
        }
    }

    pub fn from_vec_sigma(sigma: VectorView<N>) -> Self {
        Self {
            sqrt_inf: Matrix::<N, N>::from_diagonal(&sigma.map(|x| 1.0 / x)),
        }
    }

    pub fn from_vec_cov(cov: VectorView<N>) -> Self {
        Self {
            sqrt_inf: Matrix::<N, N>::from_diagonal(&cov.map(|x| 1.0 / x.sqrt())),
        }
    }

    pub fn from_matrix_cov(cov: MatrixView<N, N>) -> Self {
        let sqrt_inf = cov
            .try_inverse()
            .expect("covariance matrix is singular")
            .cholesky()
            .expect("covariance matrix is not positive definite")
            .l()
            .transpose();
        Self { sqrt_inf }
    }

    pub fn from_matrix_inf(inf: MatrixView<N, N>) -> Self {
        let sqrt_inf = inf
            .cholesky()
            .expect("information matrix is not positive definite")
            .l()
            .transpose();
        Self { sqrt_inf }
    }
}

macro_rules! make_gaussian_vector {
    ($num:expr, [$($args:ident),*]) => {
        impl GaussianNoise<$num> {
            pub fn from_diag_sigmas($($args: dtype),*) -> Self {
                let sigmas = Vector::<$num>::new($($args,)*);
                Self::from_vec_sigma(sigmas.as_view())
            }

            pub fn from_diag_covs($($args: dtype,)*) -> Self {
                let covs = Vector::<$num>::new($($args,)*);
                Self::from_vec_cov(covs.as_view())
            }
        }
    };
}

make_gaussian_vector!(1, [s0]);
make_gaussian_vector!(2, [s0, s1]);
make_gaussian_vector!(3, [s0, s1, s2]);
make_gaussian_vector!(4, [s0, s1, s2, s3]);
make_gaussian_vector!(6, [s0, s1, s2, s3, s4, s5]);

impl<const N: usize> fmt::Display for GaussianNoise<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GaussianNoise{}: {}", N, self.sqrt_inf)
    }
}
