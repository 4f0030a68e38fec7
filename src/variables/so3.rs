use std::fmt;
use std::ops::Mul;

use crate::dtype;
use crate::linalg::{Matrix3, Vector3, Vector4, VectorViewX, VectorX};
use crate::variables::Manifold;

/// A rotation in 3D, stored as a unit quaternion `(x, y, z, w)`.
#[derive(Clone)]
pub struct SO3 {
    xyzw: Vector4,
}

impl SO3 {
    pub fn from_xyzw(x: dtype, y: dtype, z: dtype, w: dtype) -> Self {
        SO3 {
            xyzw: Vector4::new(x, y, z, w),
        }
        .normalized()
    }

    pub fn xyzw(&self) -> Vector4 {
        self.xyzw
    }

    fn normalized(self) -> Self {
        SO3 {
            xyzw: self.xyzw / self.xyzw.norm(),
        }
    }

    pub fn from_matrix(mat: &Matrix3) -> Self {
        let trace = mat[(0, 0)] + mat[(1, 1)] + mat[(2, 2)];
        let mut xyzw = Vector4::zeros();

        if trace > 0.0 {
            let s = 0.5 / (trace + 1.0).sqrt();
            xyzw[3] = 0.25 / s;
            xyzw[0] = (mat[(2, 1)] - mat[(1, 2)]) * s;
            xyzw[1] = (mat[(0, 2)] - mat[(2, 0)]) * s;
            xyzw[2] = (mat[(1, 0)] - mat[(0, 1)]) * s;
        } else if mat[(0, 0)] > mat[(1, 1)] && mat[(0, 0)] > mat[(2, 2)] {
            let s = 2.0 * (1.0 + mat[(0, 0)] - mat[(1, 1)] - mat[(2, 2)]).sqrt();
            xyzw[3] = (mat[(2, 1)] - mat[(1, 2)]) / s;
            xyzw[0] = 0.25 * s;
            xyzw[1] = (mat[(0, 1)] + mat[(1, 0)]) / s;
            xyzw[2] = (mat[(0, 2)] + mat[(2, 0)]) / s;
        } else if mat[(1, 1)] > mat[(2, 2)] {
            let s = 2.0 * (1.0 + mat[(1, 1)] - mat[(0, 0)] - mat[(2, 2)]).sqrt();
            xyzw[3] = (mat[(0, 2)] - mat[(2, 0)]) / s;
            xyzw[0] = (mat[(0, 1)] + mat[(1, 0)]) / s;
            xyzw[1] = 0.25 * s;
            xyzw[2] = (mat[(1, 2)] + mat[(2, 1)]) / s;
        } else {
            let s = 2.0 * (1.0 + mat[(2, 2)] - mat[(0, 0)] - mat[(1, 1)]).sqrt();
            xyzw[3] = (mat[(1, 0)] - mat[(0, 1)]) / s;
            xyzw[0] = (mat[(0, 2)] + mat[(2, 0)]) / s;
            xyzw[1] = (mat[(1, 2)] + mat[(2, 1)]) / s;
            xyzw[2] = 0.25 * s;
        }

        SO3 { xyzw }.normalized()
    }

    pub fn to_matrix(&self) -> Matrix3 {
        let q = self.xyzw;
        let (q1, q2, q3, q0) = (q[0], q[1], q[2], q[3]);

        let mut mat = Matrix3::zeros();
        mat[(0, 0)] = 1.0 - 2.0 * (q2 * q2 + q3 * q3);
        mat[(0, 1)] = 2.0 * (q1 * q2 - q0 * q3);
        mat[(0, 2)] = 2.0 * (q1 * q3 + q0 * q2);
        mat[(1, 0)] = 2.0 * (q1 * q2 + q0 * q3);
        mat[(1, 1)] = 1.0 - 2.0 * (q1 * q1 + q3 * q3);
        mat[(1, 2)] = 2.0 * (q2 * q3 - q0 * q1);
        mat[(2, 0)] = 2.0 * (q1 * q3 - q0 * q2);
        mat[(2, 1)] = 2.0 * (q2 * q3 + q0 * q1);
        mat[(2, 2)] = 1.0 - 2.0 * (q1 * q1 + q2 * q2);

        mat
    }

    /// Rotate a vector by this rotation.
    pub fn apply(&self, v: &Vector3) -> Vector3 {
        self.to_matrix() * v
    }

    pub fn inverse(&self) -> Self {
        SO3 {
            xyzw: Vector4::new(-self.xyzw[0], -self.xyzw[1], -self.xyzw[2], self.xyzw[3]),
        }
    }

    pub fn compose(&self, other: &Self) -> Self {
        self * other
    }

    /// Skew-symmetric cross-product matrix `[v]_x`.
    pub fn hat(v: Vector3) -> Matrix3 {
        Matrix3::new(
            0.0, -v[2], v[1], //
            v[2], 0.0, -v[0], //
            -v[1], v[0], 0.0,
        )
    }

    pub fn exp(xi: Vector3) -> Self {
        let theta = xi.norm();
        let xyzw = if theta < 1e-8 {
            Vector4::new(xi[0] * 0.5, xi[1] * 0.5, xi[2] * 0.5, 1.0)
        } else {
            let half = theta / 2.0;
            let s = half.sin() / theta;
            Vector4::new(xi[0] * s, xi[1] * s, xi[2] * s, half.cos())
        };
        SO3 { xyzw }.normalized()
    }

    pub fn log(&self) -> Vector3 {
        let v = Vector3::new(self.xyzw[0], self.xyzw[1], self.xyzw[2]);
        let w = self.xyzw[3].clamp(-1.0, 1.0);
        let n = v.norm();
        if n < 1e-8 {
            2.0 * v
        } else {
            2.0 * v * n.atan2(w) / n
        }
    }
}

impl Manifold for SO3 {
    fn dim(&self) -> usize {
        3
    }

    fn identity() -> Self {
        SO3 {
            xyzw: Vector4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    fn oplus(&self, delta: VectorViewX<'_>) -> Self {
        let xi = Vector3::new(delta[0], delta[1], delta[2]);
        self.compose(&SO3::exp(xi))
    }

    fn ominus(&self, other: &Self) -> VectorX {
        let xi = self.inverse().compose(other).log();
        VectorX::from_row_slice(xi.as_slice())
    }
}

impl Mul for &SO3 {
    type Output = SO3;

    fn mul(self, other: Self) -> SO3 {
        let (x0, y0, z0, w0) = (self.xyzw[0], self.xyzw[1], self.xyzw[2], self.xyzw[3]);
        let (x1, y1, z1, w1) = (other.xyzw[0], other.xyzw[1], other.xyzw[2], other.xyzw[3]);

        SO3 {
            xyzw: Vector4::new(
                w0 * x1 + x0 * w1 + y0 * z1 - z0 * y1,
                w0 * y1 - x0 * z1 + y0 * w1 + z0 * x1,
                w0 * z1 + x0 * y1 - y0 * x1 + z0 * w1,
                w0 * w1 - x0 * x1 - y0 * y1 - z0 * z1,
            ),
        }
        .normalized()
    }
}

impl fmt::Debug for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SO3({:.4}, {:.4}, {:.4}, {:.4})",
            self.xyzw[0], self.xyzw[1], self.xyzw[2], self.xyzw[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_matrix_eq;

    #[test]
    fn exp_log_roundtrip() {
        let xi = Vector3::new(0.1, -0.2, 0.3);
        let r = SO3::exp(xi);
        let back = r.log();
        assert_matrix_eq!(back, xi, comp = abs, tol = 1e-10);
    }

    #[test]
    fn identity_is_identity() {
        let id = SO3::identity();
        assert_matrix_eq!(id.log(), Vector3::zeros(), comp = abs, tol = 1e-12);
    }

    #[test]
    fn inverse_undoes_compose() {
        let r = SO3::exp(Vector3::new(0.3, 0.1, -0.4));
        let should_be_id = r.inverse().compose(&r);
        assert_matrix_eq!(should_be_id.log(), Vector3::zeros(), comp = abs, tol = 1e-10);
    }

    #[test]
    fn to_matrix_preserves_orthonormality() {
        let r = SO3::exp(Vector3::new(0.4, -0.2, 0.6));
        let m = r.to_matrix();
        let should_be_id = m.transpose() * m;
        assert_matrix_eq!(should_be_id, Matrix3::identity(), comp = abs, tol = 1e-10);
    }
}
