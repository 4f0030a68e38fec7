//! Initialiser (§4.D): brings the sliding window from an empty/visual-only
//! state to a metric pose-velocity-bias-gravity estimate the optimiser can
//! refine from.
//!
//! Grounded the same way as [`feature`](crate::feature) — `factrs` has no
//! vision front-end to borrow from, so the closed-form solves here (PnP,
//! gyro-bias least squares, linear visual-inertial alignment) are plain
//! `nalgebra` dense linear algebra, matching the scale of problem the
//! optimiser itself already solves with `faer`/`nalgebra`.
use log::{info, warn};

use crate::dtype;
use crate::linalg::{Matrix3, Matrix3x2, MatrixX, Vector3, VectorX};
use crate::preintegration::ImuPreintegrator;
use crate::variables::{ImuBias, SE3, SO3};

pub mod sfm;
pub use sfm::bootstrap_monocular_poses;

/// Outcome of one initialisation attempt (§4.D). `Rejected` keeps
/// `solver_flag == INITIAL`; a caller seeing `Rejected` after a monocular
/// global-SfM failure should marginalise the oldest frame to refresh the
/// baseline, per spec.
#[derive(Debug)]
pub enum InitResult {
    Accepted {
        poses: Vec<SE3>,
        velocities: Vec<Vector3>,
        gravity: Vector3,
        biases: Vec<ImuBias>,
    },
    Rejected(&'static str),
}

/// IMU-excitation gate (§4.D step 1): reject initialization if the window
/// never saw enough acceleration variance to make gravity/scale observable,
/// matching `estimator.cpp`'s `initialStructure` check of
/// `var = sqrt(sum(||delta_v/dt - mean||^2) / n) < 0.25`.
pub fn sufficient_imu_excitation(preints: &[ImuPreintegrator]) -> bool {
    if preints.is_empty() {
        return false;
    }
    let avg_accel: Vec<Vector3> = preints
        .iter()
        .map(|p| p.delta_v / p.sum_dt)
        .collect();
    let mean: Vector3 = avg_accel.iter().sum::<Vector3>() / avg_accel.len() as dtype;
    let var = avg_accel
        .iter()
        .map(|a| (a - mean).norm_squared())
        .sum::<dtype>()
        / avg_accel.len() as dtype;
    var.sqrt() >= 0.25
}

/// Solve for a single gyroscope bias that best explains every adjacent
/// pre-integrated rotation against the SfM-derived relative rotations
/// (§4.D step 5): `min_Bg sum || log(δq(Bg)^-1 ⊗ (R_wi^-1 R_wj)) ||^2`,
/// linearised once about `Bg=0` using each pre-integration's own
/// `d(delta_q)/d(bg)` block.
pub fn solve_gyro_bias(
    sfm_rotations: &[SO3],
    preints: &[ImuPreintegrator],
) -> Option<Vector3> {
    assert_eq!(sfm_rotations.len(), preints.len() + 1);

    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for (i, preint) in preints.iter().enumerate() {
        let r_i = &sfm_rotations[i];
        let r_j = &sfm_rotations[i + 1];
        let relative = r_i.inverse().compose(r_j);
        let residual = preint.delta_q.inverse().compose(&relative).log();
        let dq_dbg = preint.jacobian.fixed_view::<3, 3>(3, 12).into_owned();
        a += dq_dbg.transpose() * dq_dbg;
        b += dq_dbg.transpose() * residual;
    }

    a.try_inverse().map(|a_inv| a_inv * b)
}

/// Linear visual-inertial alignment (§4.D step 6): solve for every frame's
/// body-frame velocity, a gravity vector, and a monocular scale in one
/// linear least-squares system built from each pre-integration's `delta_p`/
/// `delta_v` constraints.
///
/// `sfm_poses` are the (unscaled, for monocular) SfM poses `R_wb, t_wb` per
/// frame; `tic` is the camera-to-IMU translation used to shift the SfM
/// translation (triangulated in the camera frame) to the body frame.
pub fn linear_alignment(
    sfm_poses: &[SE3],
    preints: &[ImuPreintegrator],
    tic: Vector3,
) -> Option<(Vec<Vector3>, Vector3, dtype)> {
    let n = sfm_poses.len();
    assert_eq!(preints.len() + 1, n);

    // State: [v_0 .. v_{n-1} (3 each), g (3), s (1)]
    let dim = 3 * n + 4;
    let mut h = MatrixX::zeros(6 * preints.len(), dim);
    let mut z = VectorX::zeros(6 * preints.len());

    for (i, preint) in preints.iter().enumerate() {
        let dt = preint.sum_dt;
        let r_i = sfm_poses[i].rot.to_matrix();
        let row0 = 6 * i;

        // delta_p row: R_i^T (p_j - p_i) * s - v_i * dt - 0.5 g dt^2 = delta_p
        let p_i = sfm_poses[i].trans;
        let p_j = sfm_poses[i + 1].trans;
        let tic_term = r_i.transpose() * (sfm_poses[i + 1].rot.to_matrix() * tic - tic);

        h.view_mut((row0, 3 * i), (3, 3))
            .copy_from(&(-Matrix3::identity() * dt));
        h.view_mut((row0, 3 * n), (3, 3))
            .copy_from(&(-0.5 * Matrix3::identity() * dt * dt));
        h.view_mut((row0, 3 * n + 3), (3, 1))
            .copy_from(&(r_i.transpose() * (p_j - p_i)));
        z.rows_mut(row0, 3)
            .copy_from(&(preint.delta_p + tic_term));

        // delta_v row: R_i^T (v_j_world - v_i_world) ~ handled via body-
        // velocity unknowns directly: -v_i + R_i^T R_j v_j - g dt = delta_v
        let row1 = row0 + 3;
        h.view_mut((row1, 3 * i), (3, 3))
            .copy_from(&(-Matrix3::identity()));
        h.view_mut((row1, 3 * (i + 1)), (3, 3))
            .copy_from(&(r_i.transpose() * sfm_poses[i + 1].rot.to_matrix()));
        h.view_mut((row1, 3 * n), (3, 3))
            .copy_from(&(-Matrix3::identity() * dt));
        z.rows_mut(row1, 3).copy_from(&preint.delta_v);
    }

    let hth = h.transpose() * &h;
    let htz = h.transpose() * &z;
    let x = hth.clone().cholesky().map(|c| c.solve(&htz))?;

    let mut velocities = Vec::with_capacity(n);
    for i in 0..n {
        velocities.push(Vector3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]));
    }
    let gravity = Vector3::new(x[3 * n], x[3 * n + 1], x[3 * n + 2]);
    let scale = x[3 * n + 3];

    Some((velocities, gravity, scale))
}

/// Two tangent basis vectors spanning the plane orthogonal to `g`, used to
/// refine gravity on the fixed-magnitude sphere (§4.D step 7).
fn gravity_tangent_basis(g: Vector3) -> (Vector3, Vector3) {
    let a = g.normalize();
    let tmp = if a.x.abs() > 0.9 {
        Vector3::new(0.0, 1.0, 0.0)
    } else {
        Vector3::new(1.0, 0.0, 0.0)
    };
    let b1 = (tmp - a * a.dot(&tmp)).normalize();
    let b2 = a.cross(&b1);
    (b1, b2)
}

/// Refine an approximate gravity vector onto the sphere of fixed magnitude
/// by re-solving the linear alignment with gravity reparameterised as
/// `g_norm * (g0_hat + w1*b1 + w2*b2)`, repeated a few times so the tangent
/// basis re-centers on the improving estimate (§4.D step 7: "repeat three
/// times").
pub fn refine_gravity(
    sfm_poses: &[SE3],
    preints: &[ImuPreintegrator],
    tic: Vector3,
    initial_gravity: Vector3,
    gravity_norm: dtype,
) -> Option<(Vec<Vector3>, Vector3, dtype)> {
    let mut g = initial_gravity.normalize() * gravity_norm;
    let mut last = None;

    for _ in 0..3 {
        let (b1, b2) = gravity_tangent_basis(g);
        let n = sfm_poses.len();
        let dim = 3 * n + 2; // velocities + (w1, w2) gravity-tangent weights
        let mut h = MatrixX::zeros(6 * preints.len(), dim);
        let mut z = VectorX::zeros(6 * preints.len());

        for (i, preint) in preints.iter().enumerate() {
            let dt = preint.sum_dt;
            let r_i = sfm_poses[i].rot.to_matrix();
            let row0 = 6 * i;
            let p_i = sfm_poses[i].trans;
            let p_j = sfm_poses[i + 1].trans;
            let lgt = r_i.transpose() * (sfm_poses[i + 1].rot.to_matrix() * tic - tic);

            h.view_mut((row0, 3 * i), (3, 3))
                .copy_from(&(-Matrix3::identity() * dt));
            h.view_mut((row0, 3 * n), (3, 2))
                .copy_from(&(-0.5 * dt * dt * r_i.transpose() * Matrix3x2::from_columns(&[b1, b2])));
            z.rows_mut(row0, 3)
                .copy_from(&(preint.delta_p + lgt + 0.5 * r_i.transpose() * g * dt * dt - r_i.transpose() * (p_j - p_i)));

            let row1 = row0 + 3;
            h.view_mut((row1, 3 * i), (3, 3))
                .copy_from(&(-Matrix3::identity()));
            h.view_mut((row1, 3 * (i + 1)), (3, 3))
                .copy_from(&(r_i.transpose() * sfm_poses[i + 1].rot.to_matrix()));
            h.view_mut((row1, 3 * n), (3, 2))
                .copy_from(&(-dt * r_i.transpose() * Matrix3x2::from_columns(&[b1, b2])));
            z.rows_mut(row1, 3)
                .copy_from(&(preint.delta_v + r_i.transpose() * g * dt));
        }

        let hth = h.transpose() * &h;
        let htz = h.transpose() * &z;
        let Some(x) = hth.clone().cholesky().map(|c| c.solve(&htz)) else {
            return last;
        };

        let w1 = x[3 * n];
        let w2 = x[3 * n + 1];
        g = (g + b1 * w1 + b2 * w2).normalize() * gravity_norm;

        let mut velocities = Vec::with_capacity(n);
        for i in 0..n {
            velocities.push(Vector3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]));
        }
        // Scale isn't re-estimated here; it was already fixed by the
        // initial `linear_alignment` solve and only gravity/velocity are
        // refined on the fixed-magnitude sphere (§4.D step 7).
        last = Some((velocities, g, 1.0));
    }

    last
}

/// Apply the metric scale and re-express every pose/velocity in a gravity-
/// aligned, yaw-zeroed world frame (§4.D step 8):
/// `P_i <- s*P_i - R_i*tic - (s*P_0 - R_0*tic)`, velocities rotated into
/// world, then the whole trajectory yawed so frame 0 has yaw 0 and gravity
/// becomes `(0, 0, -|g|)`.
pub fn apply_scale_and_align(
    poses: &mut [SE3],
    velocities: &mut [Vector3],
    tic: Vector3,
    scale: dtype,
    gravity: Vector3,
) {
    if poses.is_empty() {
        return;
    }
    let origin_shift = scale * poses[0].trans - poses[0].rot.apply(&tic);

    for (pose, vel) in poses.iter_mut().zip(velocities.iter_mut()) {
        pose.trans = scale * pose.trans - pose.rot.apply(&tic) - origin_shift;
        *vel = pose.rot.apply(vel);
    }

    // Rotate world so that gravity becomes -z and frame 0's yaw is zero.
    let g_hat = gravity.normalize();
    let z = Vector3::new(0.0, 0.0, -1.0);
    let axis = g_hat.cross(&z);
    let r_align = if axis.norm() < 1e-9 {
        SO3::identity()
    } else {
        let angle = g_hat.dot(&z).clamp(-1.0, 1.0).acos();
        SO3::exp(axis.normalize() * angle)
    };

    let yaw0 = {
        let r0 = r_align.compose(&poses[0].rot).to_matrix();
        r0[(1, 0)].atan2(r0[(0, 0)])
    };
    let r_yaw_fix = SO3::exp(Vector3::new(0.0, 0.0, -yaw0));
    let r_world = r_yaw_fix.compose(&r_align);

    for (pose, vel) in poses.iter_mut().zip(velocities.iter_mut()) {
        pose.trans = r_world.apply(&pose.trans);
        pose.rot = r_world.compose(&pose.rot);
        *vel = r_world.apply(vel);
    }
}

/// Stereo initial guess: PnP is out of scope for this module's closed-form
/// pass (it needs a real correspondence solver over tracked features), so
/// this only carries the bookkeeping the caller needs once stereo
/// triangulation has already produced metric points per spec.md §4.D's
/// "Stereo + IMU path" (absolute scale is already metric from the
/// baseline — no alignment solve is needed beyond gyro bias).
pub fn stereo_init_gyro_bias_only(
    sfm_rotations: &[SO3],
    preints: &[ImuPreintegrator],
) -> InitResult {
    match solve_gyro_bias(sfm_rotations, preints) {
        Some(bg) => {
            info!("stereo init: solved gyro bias {:?}", bg);
            InitResult::Rejected("stereo path only resolves gyro bias here; pose/velocity come from stereo PnP upstream")
        }
        None => {
            warn!("stereo init: gyro bias solve failed (singular system)");
            InitResult::Rejected("singular gyro-bias system")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gyro_bias_solve_recovers_zero_for_consistent_data() {
        let rotations = vec![SO3::identity(), SO3::identity(), SO3::identity()];
        let bias = ImuBias::zero();
        let samples = vec![(0.01, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)); 10];
        let preints: Vec<_> = (0..2)
            .map(|_| ImuPreintegrator::repropagate(bias, &samples, crate::preintegration::ImuCovariance::default()))
            .collect();

        let bg = solve_gyro_bias(&rotations, &preints).expect("solvable system");
        assert!(bg.norm() < 1e-6);
    }

    #[test]
    fn gravity_tangent_basis_is_orthogonal_to_gravity() {
        let g = Vector3::new(0.0, 0.0, -9.81);
        let (b1, b2) = gravity_tangent_basis(g);
        assert!(b1.dot(&g).abs() < 1e-9);
        assert!(b2.dot(&g).abs() < 1e-9);
        assert!(b1.dot(&b2).abs() < 1e-9);
    }
}
