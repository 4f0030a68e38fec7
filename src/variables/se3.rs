use std::fmt;

use crate::linalg::{Matrix3, Vector3, VectorViewX, VectorX};
use crate::variables::{Manifold, SO3};

/// A rigid-body pose: rotation `rot` composed with translation `trans`,
/// `p_world = rot * p_body + trans`.
#[derive(Clone, Debug)]
pub struct SE3 {
    pub rot: SO3,
    pub trans: Vector3,
}

impl SE3 {
    pub fn from_rot_trans(rot: SO3, trans: Vector3) -> Self {
        SE3 { rot, trans }
    }

    /// Transform a point from this frame's body coordinates to world.
    pub fn apply(&self, p: &Vector3) -> Vector3 {
        self.rot.apply(p) + self.trans
    }

    pub fn compose(&self, other: &Self) -> Self {
        SE3 {
            rot: self.rot.compose(&other.rot),
            trans: self.rot.apply(&other.trans) + self.trans,
        }
    }

    pub fn inverse(&self) -> Self {
        let inv_rot = self.rot.inverse();
        SE3 {
            trans: -inv_rot.apply(&self.trans),
            rot: inv_rot,
        }
    }

    fn left_jacobian_translation_part(w: Vector3) -> Matrix3 {
        let theta2 = w.norm_squared();
        let (b, c) = if theta2 < 1e-10 {
            (0.5, 1.0 / 6.0)
        } else {
            let theta = theta2.sqrt();
            let a = theta.sin() / theta;
            (
                (1.0 - theta.cos()) / theta2,
                (1.0 - a) / theta2,
            )
        };
        let wx = SO3::hat(w);
        Matrix3::identity() + wx * b + wx * wx * c
    }

    pub fn exp(xi: VectorX) -> Self {
        let w = Vector3::new(xi[0], xi[1], xi[2]);
        let v = Vector3::new(xi[3], xi[4], xi[5]);
        let rot = SO3::exp(w);
        let trans = Self::left_jacobian_translation_part(w) * v;
        SE3 { rot, trans }
    }

    pub fn log(&self) -> VectorX {
        let w = self.rot.log();
        let v_mat = Self::left_jacobian_translation_part(w)
            .try_inverse()
            .expect("SE3 V matrix is always invertible");
        let v = v_mat * self.trans;
        VectorX::from_row_slice(&[w[0], w[1], w[2], v[0], v[1], v[2]])
    }
}

impl Manifold for SE3 {
    fn dim(&self) -> usize {
        6
    }

    fn identity() -> Self {
        SE3 {
            rot: SO3::identity(),
            trans: Vector3::zeros(),
        }
    }

    fn oplus(&self, delta: VectorViewX<'_>) -> Self {
        self.compose(&SE3::exp(delta.clone_owned()))
    }

    fn ominus(&self, other: &Self) -> VectorX {
        self.inverse().compose(other).log()
    }
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SE3(t=[{:.3}, {:.3}, {:.3}], {:?})",
            self.trans[0], self.trans[1], self.trans[2], self.rot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_matrix_eq;

    #[test]
    fn exp_log_roundtrip() {
        let xi = VectorX::from_row_slice(&[0.1, -0.2, 0.05, 1.0, 2.0, -0.5]);
        let p = SE3::exp(xi.clone());
        let back = p.log();
        assert_matrix_eq!(back, xi, comp = abs, tol = 1e-8);
    }

    #[test]
    fn inverse_undoes_compose() {
        let p = SE3::exp(VectorX::from_row_slice(&[0.2, 0.1, -0.3, 1.0, -1.0, 0.5]));
        let id = p.inverse().compose(&p);
        assert_matrix_eq!(id.log(), VectorX::zeros(6), comp = abs, tol = 1e-8);
    }

    #[test]
    fn oplus_ominus_are_inverses() {
        let p = SE3::exp(VectorX::from_row_slice(&[0.1, 0.0, 0.0, 0.0, 0.0, 1.0]));
        let delta = VectorX::from_row_slice(&[0.01, -0.02, 0.03, 0.1, -0.1, 0.2]);
        let q = p.oplus(delta.as_view());
        let back = p.ominus(&q);
        assert_matrix_eq!(back, delta, comp = abs, tol = 1e-6);
    }
}
