use crate::dtype;
use crate::linalg::{Matrix2x3, Matrix2x6, MatrixX, Vector2, Vector3, VectorX};
use crate::residuals::{Linearization, ParamBlock};
use crate::robust::Huber;
use crate::variables::{Manifold, SE3, SO3};

/// `d(xy/z)/d(xyz)` at `p`, the shared Jacobian block every reprojection
/// factor chains the rest of its Jacobian through.
fn project_reduce(p: Vector3) -> Matrix2x3 {
    let z = p.z;
    Matrix2x3::new(1.0 / z, 0.0, -p.x / (z * z), 0.0, 1.0 / z, -p.y / (z * z))
}

fn project(p: Vector3) -> Vector2 {
    Vector2::new(p.x / p.z, p.y / p.z)
}

fn pose_jacobians(
    reduce: Matrix2x3,
    rj_t: &crate::linalg::Matrix3,
    ext_j_rot_t: &crate::linalg::Matrix3,
    ri: &crate::linalg::Matrix3,
    pts_imu_i: Vector3,
    pts_imu_j: Vector3,
) -> (Matrix2x6, Matrix2x6) {
    let mut jac_i = Matrix2x6::zeros();
    let block = reduce * ext_j_rot_t * rj_t;
    jac_i.fixed_view_mut::<2, 3>(0, 0).copy_from(&block);
    jac_i
        .fixed_view_mut::<2, 3>(0, 3)
        .copy_from(&(-(block * ri) * SO3::hat(pts_imu_i)));

    let mut jac_j = Matrix2x6::zeros();
    jac_j.fixed_view_mut::<2, 3>(0, 0).copy_from(&(-block));
    jac_j
        .fixed_view_mut::<2, 3>(0, 3)
        .copy_from(&(reduce * ext_j_rot_t * SO3::hat(pts_imu_j)));

    (jac_i, jac_j)
}

/// Pixel-velocity time-offset transport (§4.C): a feature recorded at the
/// nominal capture time `td0` is advanced to the estimator's current `td`
/// by its own measured normalized-plane velocity before it enters the
/// residual, so a moving `Td` has somewhere to push against.
fn td_adjusted(pt: Vector2, vel: Vector2, td: dtype, td0: dtype) -> Vector2 {
    pt + vel * (td - td0)
}

/// `d(proj)/d(td)` given the chain matrix from `d(pts_cam_i)` to `d(proj)`
/// (already including `info_scale`) and the direct `-vel_j` term from
/// `uvj_adjusted` being subtracted straight out of the residual.
fn td_jacobian_column(
    chain_i: crate::linalg::Matrix2x3,
    vel_i: Vector2,
    vel_j: Vector2,
    inv_depth: dtype,
    info_scale: dtype,
) -> MatrixX {
    let via_i = chain_i * Vector3::new(vel_i.x, vel_i.y, 0.0) / inv_depth;
    let col = via_i - vel_j * info_scale;
    MatrixX::from_column_slice(2, 1, col.as_slice())
}

/// Landmark anchored in frame `frame_i`, observed again in `frame_j`,
/// through the same camera on both ends (monocular two-frame factor).
pub struct ProjTwoFrameOneCam {
    pub frame_i: usize,
    pub frame_j: usize,
    pub cam: usize,
    pub landmark: u64,
    pub pt_i: Vector2,
    pub pt_j: Vector2,
    pub vel_i: Vector2,
    pub vel_j: Vector2,
    pub td0: dtype,
    pub info_scale: dtype,
}

impl ProjTwoFrameOneCam {
    pub fn blocks(&self) -> Vec<ParamBlock> {
        vec![
            ParamBlock::Pose(self.frame_i),
            ParamBlock::Pose(self.frame_j),
            ParamBlock::Extrinsic(self.cam),
            ParamBlock::InverseDepth(self.landmark),
            ParamBlock::TimeOffset,
        ]
    }

    pub fn linearize(
        &self,
        pose_i: &SE3,
        pose_j: &SE3,
        ext: &SE3,
        inv_depth: dtype,
        td: dtype,
    ) -> Linearization {
        let pt_i = td_adjusted(self.pt_i, self.vel_i, td, self.td0);
        let pt_j = td_adjusted(self.pt_j, self.vel_j, td, self.td0);

        let pts_cam_i = Vector3::new(pt_i.x, pt_i.y, 1.0) / inv_depth;
        let pts_imu_i = ext.rot.apply(&pts_cam_i) + ext.trans;
        let pts_w = pose_i.rot.apply(&pts_imu_i) + pose_i.trans;
        let pts_imu_j = pose_j.rot.inverse().apply(&(pts_w - pose_j.trans));
        let pts_cam_j = ext.rot.inverse().apply(&(pts_imu_j - ext.trans));

        let proj = project(pts_cam_j);
        let r = proj - pt_j;
        let residual = VectorX::from_row_slice(&[r.x * self.info_scale, r.y * self.info_scale]);

        let reduce = project_reduce(pts_cam_j) * self.info_scale;
        let ri = pose_i.rot.to_matrix();
        let rj_t = pose_j.rot.to_matrix().transpose();
        let ric_t = ext.rot.to_matrix().transpose();

        let (jac_pi, jac_pj) = pose_jacobians(reduce, &rj_t, &ric_t, &ri, pts_imu_i, pts_imu_j);

        let mut jac_ex = Matrix2x6::zeros();
        let tmp = ric_t * rj_t * ri;
        jac_ex
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(reduce * (tmp - crate::linalg::Matrix3::identity())));
        let tmp_r = tmp * ext.rot.to_matrix();
        let rot_term = -tmp_r * SO3::hat(pts_cam_i)
            + SO3::hat(tmp_r * pts_cam_i)
            + SO3::hat(ric_t * (rj_t * (ri * ext.trans + pose_i.trans - pose_j.trans) - ext.trans));
        jac_ex
            .fixed_view_mut::<2, 3>(0, 3)
            .copy_from(&(reduce * rot_term));

        let jac_feature = reduce * tmp_r * Vector3::new(pt_i.x, pt_i.y, 1.0)
            * (-1.0 / (inv_depth * inv_depth));

        let jac_td = td_jacobian_column(reduce * tmp_r, self.vel_i, self.vel_j, inv_depth, self.info_scale);

        let jacobians = vec![
            dense(jac_pi),
            dense(jac_pj),
            dense(jac_ex),
            MatrixX::from_column_slice(2, 1, jac_feature.as_slice()),
            jac_td,
        ];

        let (residual, jacobians, cost) =
            super::apply_robust_weight(&Huber::new(1.0), residual, jacobians);

        Linearization {
            blocks: self.blocks(),
            residual,
            jacobians,
            cost,
        }
    }
}

/// Landmark anchored in frame `frame_i` through `cam_i`, observed again in a
/// different frame `frame_j` through a different camera `cam_j` (stereo,
/// cross-frame factor).
pub struct ProjTwoFrameTwoCam {
    pub frame_i: usize,
    pub frame_j: usize,
    pub cam_i: usize,
    pub cam_j: usize,
    pub landmark: u64,
    pub pt_i: Vector2,
    pub pt_j: Vector2,
    pub vel_i: Vector2,
    pub vel_j: Vector2,
    pub td0: dtype,
    pub info_scale: dtype,
}

impl ProjTwoFrameTwoCam {
    pub fn blocks(&self) -> Vec<ParamBlock> {
        vec![
            ParamBlock::Pose(self.frame_i),
            ParamBlock::Pose(self.frame_j),
            ParamBlock::Extrinsic(self.cam_i),
            ParamBlock::Extrinsic(self.cam_j),
            ParamBlock::InverseDepth(self.landmark),
            ParamBlock::TimeOffset,
        ]
    }

    pub fn linearize(
        &self,
        pose_i: &SE3,
        pose_j: &SE3,
        ext_i: &SE3,
        ext_j: &SE3,
        inv_depth: dtype,
        td: dtype,
    ) -> Linearization {
        let pt_i = td_adjusted(self.pt_i, self.vel_i, td, self.td0);
        let pt_j = td_adjusted(self.pt_j, self.vel_j, td, self.td0);

        let pts_cam_i = Vector3::new(pt_i.x, pt_i.y, 1.0) / inv_depth;
        let pts_imu_i = ext_i.rot.apply(&pts_cam_i) + ext_i.trans;
        let pts_w = pose_i.rot.apply(&pts_imu_i) + pose_i.trans;
        let pts_imu_j = pose_j.rot.inverse().apply(&(pts_w - pose_j.trans));
        let pts_cam_j = ext_j.rot.inverse().apply(&(pts_imu_j - ext_j.trans));

        let proj = project(pts_cam_j);
        let r = proj - pt_j;
        let residual = VectorX::from_row_slice(&[r.x * self.info_scale, r.y * self.info_scale]);

        let reduce = project_reduce(pts_cam_j) * self.info_scale;
        let ri = pose_i.rot.to_matrix();
        let rj_t = pose_j.rot.to_matrix().transpose();
        let ext_j_rot_t = ext_j.rot.to_matrix().transpose();

        let (jac_pi, jac_pj) =
            pose_jacobians(reduce, &rj_t, &ext_j_rot_t, &ri, pts_imu_i, pts_imu_j);

        let block = reduce * ext_j_rot_t * rj_t * ri;

        let mut jac_ext_i = Matrix2x6::zeros();
        jac_ext_i.fixed_view_mut::<2, 3>(0, 0).copy_from(&block);
        jac_ext_i
            .fixed_view_mut::<2, 3>(0, 3)
            .copy_from(&(-(block * ext_i.rot.to_matrix()) * SO3::hat(pts_cam_i)));

        let mut jac_ext_j = Matrix2x6::zeros();
        jac_ext_j
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(-(reduce * ext_j_rot_t)));
        jac_ext_j
            .fixed_view_mut::<2, 3>(0, 3)
            .copy_from(&(reduce * SO3::hat(pts_cam_j)));

        let chain_i = block * ext_i.rot.to_matrix();
        let jac_feature = chain_i * Vector3::new(pt_i.x, pt_i.y, 1.0) * (-1.0 / (inv_depth * inv_depth));

        let jac_td = td_jacobian_column(chain_i, self.vel_i, self.vel_j, inv_depth, self.info_scale);

        let jacobians = vec![
            dense(jac_pi),
            dense(jac_pj),
            dense(jac_ext_i),
            dense(jac_ext_j),
            MatrixX::from_column_slice(2, 1, jac_feature.as_slice()),
            jac_td,
        ];

        let (residual, jacobians, cost) =
            super::apply_robust_weight(&Huber::new(1.0), residual, jacobians);

        Linearization {
            blocks: self.blocks(),
            residual,
            jacobians,
            cost,
        }
    }
}

/// Stereo baseline factor: landmark observed through both cameras at the
/// *same* window slot. Since `frame_i == frame_j`, the body pose cancels
/// exactly, leaving only the two extrinsics and the inverse depth.
pub struct ProjOneFrameTwoCam {
    pub frame: usize,
    pub cam_i: usize,
    pub cam_j: usize,
    pub landmark: u64,
    pub pt_i: Vector2,
    pub pt_j: Vector2,
    pub vel_i: Vector2,
    pub vel_j: Vector2,
    pub td0: dtype,
    pub info_scale: dtype,
}

impl ProjOneFrameTwoCam {
    pub fn blocks(&self) -> Vec<ParamBlock> {
        vec![
            ParamBlock::Extrinsic(self.cam_i),
            ParamBlock::Extrinsic(self.cam_j),
            ParamBlock::InverseDepth(self.landmark),
            ParamBlock::TimeOffset,
        ]
    }

    pub fn linearize(&self, ext_i: &SE3, ext_j: &SE3, inv_depth: dtype, td: dtype) -> Linearization {
        let pt_i = td_adjusted(self.pt_i, self.vel_i, td, self.td0);
        let pt_j = td_adjusted(self.pt_j, self.vel_j, td, self.td0);

        let pts_cam_i = Vector3::new(pt_i.x, pt_i.y, 1.0) / inv_depth;
        let pts_imu_i = ext_i.rot.apply(&pts_cam_i) + ext_i.trans;
        let pts_cam_j = ext_j.rot.inverse().apply(&(pts_imu_i - ext_j.trans));

        let proj = project(pts_cam_j);
        let r = proj - pt_j;
        let residual = VectorX::from_row_slice(&[r.x * self.info_scale, r.y * self.info_scale]);

        let reduce = project_reduce(pts_cam_j) * self.info_scale;
        let ext_j_rot_t = ext_j.rot.to_matrix().transpose();

        let mut jac_ext_i = Matrix2x6::zeros();
        jac_ext_i
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(reduce * ext_j_rot_t));
        jac_ext_i.fixed_view_mut::<2, 3>(0, 3).copy_from(
            &(-(reduce * ext_j_rot_t * ext_i.rot.to_matrix()) * SO3::hat(pts_cam_i)),
        );

        let mut jac_ext_j = Matrix2x6::zeros();
        jac_ext_j
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(-(reduce * ext_j_rot_t)));
        jac_ext_j
            .fixed_view_mut::<2, 3>(0, 3)
            .copy_from(&(reduce * SO3::hat(pts_cam_j)));

        let chain_i = reduce * ext_j_rot_t * ext_i.rot.to_matrix();
        let jac_feature = chain_i * Vector3::new(pt_i.x, pt_i.y, 1.0) * (-1.0 / (inv_depth * inv_depth));

        let jac_td = td_jacobian_column(chain_i, self.vel_i, self.vel_j, inv_depth, self.info_scale);

        let jacobians = vec![
            dense(jac_ext_i),
            dense(jac_ext_j),
            MatrixX::from_column_slice(2, 1, jac_feature.as_slice()),
            jac_td,
        ];

        let (residual, jacobians, cost) =
            super::apply_robust_weight(&Huber::new(1.0), residual, jacobians);

        Linearization {
            blocks: self.blocks(),
            residual,
            jacobians,
            cost,
        }
    }
}

fn dense<const R: usize, const C: usize>(m: crate::linalg::Matrix<R, C>) -> MatrixX {
    MatrixX::from_fn(R, C, |r, c| m[(r, c)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::numerical_derivative;

    #[test]
    fn project_reduce_matches_numerical_derivative_of_x_over_z() {
        let p = Vector3::new(0.3, -0.2, 2.0);
        let reduce = project_reduce(p);
        let dx = numerical_derivative(|z| p.x / z, p.z, 1e-6);
        assert!((reduce[(0, 2)] - (-p.x / (p.z * p.z))).abs() < 1e-9);
        assert!((dx.diff - (-p.x / (p.z * p.z))).abs() < 1e-4);
    }
}
