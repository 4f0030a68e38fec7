use crate::linalg::{Matrix3, MatrixX, Vector3, VectorX};
use crate::preintegration::ImuPreintegrator;
use crate::residuals::{Linearization, ParamBlock};
use crate::robust::L2;
use crate::variables::{ImuBias, SE3, SO3};

/// Relative-motion factor between two consecutive window slots, derived
/// from [`ImuPreintegrator::residual`]. Always uses an [`L2`] kernel (§4.C):
/// a single bad IMU interval is a data-quality problem the estimator should
/// surface (§7's `Divergence`/`DataSkew` conditions), not silently
/// down-weight.
pub struct ImuFactor {
    pub frame_i: usize,
    pub frame_j: usize,
    pub gravity: Vector3,
}

impl ImuFactor {
    pub fn new(frame_i: usize, frame_j: usize, gravity: Vector3) -> Self {
        ImuFactor {
            frame_i,
            frame_j,
            gravity,
        }
    }

    pub fn blocks(&self) -> Vec<ParamBlock> {
        vec![
            ParamBlock::Pose(self.frame_i),
            ParamBlock::SpeedBias(self.frame_i),
            ParamBlock::Pose(self.frame_j),
            ParamBlock::SpeedBias(self.frame_j),
        ]
    }

    /// Linearize the factor at the given states with the analytical
    /// Jacobian blocks (§4.A/§4.C): right-perturbation on each `SE3` (tangent
    /// `[w, t]`, matching [`SE3::exp`]) and additive perturbation on each
    /// `SpeedBias` (tangent `[vel, bg, ba]`, matching
    /// [`crate::variables::SpeedBias::oplus`]), first-order in the rotation
    /// residual's own tangent (the `J_r^{-1}` correction on `q_err` is
    /// dropped, the same simplification the classical VINS-Mono IMU factor
    /// makes).
    #[allow(clippy::too_many_arguments)]
    pub fn linearize(
        &self,
        preint: &ImuPreintegrator,
        pose_i: &SE3,
        vel_i: Vector3,
        bias_i: ImuBias,
        pose_j: &SE3,
        vel_j: Vector3,
        bias_j: ImuBias,
    ) -> Linearization {
        let g = self.gravity;
        let dt = preint.sum_dt;

        let r0 = preint.residual(g, pose_i, vel_i, bias_i, pose_j, vel_j, bias_j);
        let residual = VectorX::from_row_slice(r0.as_slice());

        let ri = pose_i.rot.to_matrix();
        let rj = pose_j.rot.to_matrix();
        let ri_t = ri.transpose();
        let rj_t = rj.transpose();

        let u = pose_j.trans - pose_i.trans - vel_i * dt + 0.5 * g * dt * dt;
        let w_vec = vel_j - vel_i + g * dt;

        let dp_dba = preint.jacobian.fixed_view::<3, 3>(0, 9).clone_owned();
        let dp_dbg = preint.jacobian.fixed_view::<3, 3>(0, 12).clone_owned();
        let dq_dbg = preint.jacobian.fixed_view::<3, 3>(3, 12).clone_owned();
        let dv_dba = preint.jacobian.fixed_view::<3, 3>(6, 9).clone_owned();
        let dv_dbg = preint.jacobian.fixed_view::<3, 3>(6, 12).clone_owned();

        let neg_i3 = -Matrix3::identity();

        // pose_i: tangent [w_i(0:3), t_i(3:6)].
        let mut jac_pi = MatrixX::zeros(15, 6);
        jac_pi.fixed_view_mut::<3, 3>(0, 0).copy_from(&SO3::hat(ri_t * u));
        jac_pi.fixed_view_mut::<3, 3>(0, 3).copy_from(&neg_i3);
        jac_pi.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-(rj_t * ri)));
        jac_pi
            .fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&SO3::hat(ri_t * w_vec));

        // pose_j: tangent [w_j(0:3), t_j(3:6)].
        let mut jac_pj = MatrixX::zeros(15, 6);
        jac_pj.fixed_view_mut::<3, 3>(0, 3).copy_from(&(ri_t * rj));
        jac_pj
            .fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&Matrix3::identity());

        // speed/bias_i: tangent [vel_i(0:3), bg_i(3:6), ba_i(6:9)].
        let mut jac_sbi = MatrixX::zeros(15, 9);
        jac_sbi
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(-dt * ri_t));
        jac_sbi.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-dp_dbg));
        jac_sbi.fixed_view_mut::<3, 3>(0, 6).copy_from(&(-dp_dba));
        jac_sbi.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-dq_dbg));
        jac_sbi.fixed_view_mut::<3, 3>(6, 0).copy_from(&(-ri_t));
        jac_sbi.fixed_view_mut::<3, 3>(6, 3).copy_from(&(-dv_dbg));
        jac_sbi.fixed_view_mut::<3, 3>(6, 6).copy_from(&(-dv_dba));
        jac_sbi.fixed_view_mut::<3, 3>(9, 6).copy_from(&neg_i3);
        jac_sbi.fixed_view_mut::<3, 3>(12, 3).copy_from(&neg_i3);

        // speed/bias_j: tangent [vel_j(0:3), bg_j(3:6), ba_j(6:9)].
        let mut jac_sbj = MatrixX::zeros(15, 9);
        jac_sbj.fixed_view_mut::<3, 3>(6, 0).copy_from(&ri_t);
        jac_sbj
            .fixed_view_mut::<3, 3>(9, 6)
            .copy_from(&Matrix3::identity());
        jac_sbj
            .fixed_view_mut::<3, 3>(12, 3)
            .copy_from(&Matrix3::identity());

        let (residual, jacobians, cost) = super::apply_robust_weight(
            &L2,
            residual,
            vec![jac_pi, jac_sbi, jac_pj, jac_sbj],
        );

        Linearization {
            blocks: self.blocks(),
            residual,
            jacobians,
            cost,
        }
    }
}

