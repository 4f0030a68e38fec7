//! Monocular structure-from-motion bootstrap (§4.D steps 1-4): turn the raw
//! cam0 feature tracks across a just-filled window into an unscaled camera
//! trajectory, so [`super::solve_gyro_bias`]/[`super::linear_alignment`] have
//! real rotations/poses to align against instead of the IMU's own
//! propagation (which is exactly the thing this stage exists to cross-check).
//!
//! `original_source/`'s `estimator.cpp` calls into `GlobalSFM`/
//! `solveRelativeRT` for this (`initial_sfm.cpp`/`solve_5pts.cpp`), but
//! neither file is present in this pack, so the algorithm here is the
//! classical Hartley-Zisserman construction those files implement: an
//! 8-point linear solve for the essential matrix between an anchor frame and
//! the newest frame, SVD decomposition into the four `(R, t)` candidates with
//! a cheirality vote to pick one, DLT triangulation of the shared tracks, and
//! a DLT resection (PnP) of every other frame against that point cloud.
use crate::containers::Landmark;
use crate::dtype;
use crate::linalg::{Matrix3, MatrixX, Vector2, Vector3, Vector4, VectorX};
use crate::variables::{Manifold, SE3, SO3};

/// 8-point algorithm needs >= 8; demand enough slack that a handful of
/// mistracked points don't swing the linear solve.
const MIN_ESSENTIAL_CORRESPONDENCES: usize = 20;
/// `30px / ~460 focal` (VINS-Mono's own `average_parallax * 460 > 30`
/// keyframe-for-SfM threshold), expressed directly in normalised-plane units
/// since this module never sees a pixel focal length.
const MIN_ANCHOR_PARALLAX: dtype = 30.0 / 460.0;
/// DLT resection has 11 unknowns up to scale; demand enough points that a
/// handful of outlier tracks can't dominate the null-space solve.
const MIN_PNP_POINTS: usize = 6;

/// Every cam0 sighting of one landmark across the window, frame-indexed.
pub fn collect_cam0_tracks<'a>(
    landmarks: impl Iterator<Item = &'a Landmark>,
) -> Vec<Vec<(usize, Vector2)>> {
    landmarks
        .map(|lm| {
            lm.observations
                .iter()
                .filter(|o| o.camera == 0)
                .map(|o| (o.frame, o.point))
                .collect::<Vec<_>>()
        })
        .filter(|track| track.len() >= 2)
        .collect()
}

/// Bootstrap an unscaled camera-frame trajectory (`poses[anchor] = identity`,
/// every other entry expressed in that anchor camera's frame) from cam0
/// tracks spanning a window of `window_len` frames. Returns `None` if no
/// anchor frame clears the parallax bar, the essential-matrix solve fails,
/// or any frame can't be resected against the triangulated cloud — matching
/// `estimator.cpp`'s "global SfM failed" rejection (§4.D step 4).
pub fn bootstrap_monocular_poses(
    window_len: usize,
    tracks: &[Vec<(usize, Vector2)>],
) -> Option<Vec<SE3>> {
    if window_len < 3 {
        return None;
    }
    let newest = window_len - 1;
    let (anchor, corr) = find_anchor_frame(tracks, newest)?;

    let (rel_rot, rel_trans) = relative_pose_from_essential(&corr)?;
    let mut poses = vec![SE3::identity(); window_len];
    poses[newest] = SE3::from_rot_trans(rel_rot, rel_trans).inverse();

    let mut cloud: Vec<(&[(usize, Vector2)], Vector3)> = Vec::new();
    for track in tracks {
        let p_a = track.iter().find(|(f, _)| *f == anchor).map(|(_, p)| *p);
        let p_n = track.iter().find(|(f, _)| *f == newest).map(|(_, p)| *p);
        let (Some(pa), Some(pn)) = (p_a, p_n) else {
            continue;
        };
        if let Some(pt) = triangulate_two_view(&poses[anchor], &poses[newest], pa, pn) {
            if pt.z > 0.0 {
                cloud.push((track.as_slice(), pt));
            }
        }
    }
    if cloud.len() < MIN_PNP_POINTS {
        return None;
    }

    for frame in 0..window_len {
        if frame == anchor || frame == newest {
            continue;
        }
        let mut obj = Vec::new();
        let mut img = Vec::new();
        for (track, pt) in &cloud {
            if let Some((_, p)) = track.iter().find(|(f, _)| *f == frame) {
                obj.push(*pt);
                img.push(*p);
            }
        }
        if obj.len() < MIN_PNP_POINTS {
            return None;
        }
        poses[frame] = solve_pnp_dlt(&obj, &img)?;
    }

    Some(poses)
}

/// Find the oldest frame whose shared tracks with `newest` clear both the
/// correspondence-count and average-parallax bars, mirroring
/// `estimator.cpp`'s `relativePose` scan from frame 0 forward.
fn find_anchor_frame(
    tracks: &[Vec<(usize, Vector2)>],
    newest: usize,
) -> Option<(usize, Vec<(Vector2, Vector2)>)> {
    for candidate in 0..newest {
        let corr: Vec<(Vector2, Vector2)> = tracks
            .iter()
            .filter_map(|t| {
                let p_c = t.iter().find(|(f, _)| *f == candidate).map(|(_, p)| *p);
                let p_n = t.iter().find(|(f, _)| *f == newest).map(|(_, p)| *p);
                p_c.zip(p_n)
            })
            .collect();
        if corr.len() < MIN_ESSENTIAL_CORRESPONDENCES {
            continue;
        }
        let avg_parallax =
            corr.iter().map(|(a, b)| (a - b).norm()).sum::<dtype>() / corr.len() as dtype;
        if avg_parallax > MIN_ANCHOR_PARALLAX {
            return Some((candidate, corr));
        }
    }
    None
}

/// Linear 8-point solve for the essential matrix relating `corr.0` (anchor
/// frame bearings) to `corr.1` (newest frame bearings), `p1^T E p0 = 0`,
/// followed by the usual rank-2/equal-singular-value projection.
fn essential_from_correspondences(corr: &[(Vector2, Vector2)]) -> Option<Matrix3> {
    let n = corr.len();
    let mut a = MatrixX::zeros(n, 9);
    for (i, (p0, p1)) in corr.iter().enumerate() {
        let (x0, y0) = (p0.x, p0.y);
        let (x1, y1) = (p1.x, p1.y);
        a.set_row(
            i,
            &VectorX::from_row_slice(&[
                x1 * x0,
                x1 * y0,
                x1,
                y1 * x0,
                y1 * y0,
                y1,
                x0,
                y0,
                1.0,
            ])
            .transpose(),
        );
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let e_vec = v_t.row(v_t.nrows() - 1).transpose();
    let e_raw = Matrix3::new(
        e_vec[0], e_vec[1], e_vec[2], //
        e_vec[3], e_vec[4], e_vec[5], //
        e_vec[6], e_vec[7], e_vec[8],
    );

    let svd_e = e_raw.svd(true, true);
    let u = svd_e.u?;
    let v_t2 = svd_e.v_t?;
    let s = (svd_e.singular_values[0] + svd_e.singular_values[1]) * 0.5;
    Some(u * Matrix3::from_diagonal(&Vector3::new(s, s, 0.0)) * v_t2)
}

/// The four `(R, t)` candidates an essential matrix decomposes into
/// (Hartley & Zisserman §9.6.2): `U W V^T` / `U W^T V^T` paired with
/// `±U`'s third column.
fn decompose_essential(e: &Matrix3) -> Vec<(SO3, Vector3)> {
    let svd = e.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Vec::new();
    };
    let mut v = v_t.transpose();
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v.determinant() < 0.0 {
        v = -v;
    }

    let w = Matrix3::new(
        0.0, -1.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0,
    );
    let r1 = u * w * v.transpose();
    let r2 = u * w.transpose() * v.transpose();
    let t = u.column(2).into_owned();

    vec![
        (SO3::from_matrix(&r1), t),
        (SO3::from_matrix(&r1), -t),
        (SO3::from_matrix(&r2), t),
        (SO3::from_matrix(&r2), -t),
    ]
}

/// Pick the essential-matrix candidate that puts the most correspondences in
/// front of both cameras (cheirality), returning the relative pose of the
/// newest frame's camera w.r.t. the anchor's, `x_new = R x_anchor + t`.
fn relative_pose_from_essential(corr: &[(Vector2, Vector2)]) -> Option<(SO3, Vector3)> {
    let e = essential_from_correspondences(corr)?;
    let candidates = decompose_essential(&e);
    if candidates.is_empty() {
        return None;
    }

    let anchor_pose = SE3::identity();
    let mut best: Option<(usize, (SO3, Vector3))> = None;
    for (rot, t) in candidates {
        let pose_new = SE3::from_rot_trans(rot.clone(), t).inverse();
        let count = corr
            .iter()
            .take(60)
            .filter(|(p0, p1)| {
                triangulate_two_view(&anchor_pose, &pose_new, *p0, *p1)
                    .map(|pt| {
                        let cam_new = pose_new.inverse().apply(&pt);
                        pt.z > 0.0 && cam_new.z > 0.0
                    })
                    .unwrap_or(false)
            })
            .count();
        if best.as_ref().map(|(c, _)| count > *c).unwrap_or(true) {
            best = Some((count, (rot, t)));
        }
    }
    best.map(|(_, rt)| rt)
}

/// Linear DLT triangulation of a point observed from an arbitrary number of
/// posed views (`views[i] = (world_T_cam_i, bearing_in_cam_i)`).
fn triangulate_multiview(views: &[(SE3, Vector2)]) -> Option<Vector3> {
    if views.len() < 2 {
        return None;
    }
    let mut a = MatrixX::zeros(2 * views.len(), 4);
    for (i, (pose, pt)) in views.iter().enumerate() {
        let cam_t_world = pose.inverse();
        let r = cam_t_world.rot.to_matrix();
        let t = cam_t_world.trans;
        let row = |k: usize| Vector4::new(r[(k, 0)], r[(k, 1)], r[(k, 2)], t[k]);
        let (p0, p1, p2) = (row(0), row(1), row(2));

        let row_u = pt.x * p2 - p0;
        let row_v = pt.y * p2 - p1;
        a.set_row(2 * i, &VectorX::from_row_slice(row_u.as_slice()).transpose());
        a.set_row(2 * i + 1, &VectorX::from_row_slice(row_v.as_slice()).transpose());
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let sol = v_t.row(v_t.nrows() - 1).transpose();
    if sol[3].abs() < 1e-9 {
        return None;
    }
    Some(Vector3::new(sol[0] / sol[3], sol[1] / sol[3], sol[2] / sol[3]))
}

fn triangulate_two_view(pose_i: &SE3, pose_j: &SE3, pt_i: Vector2, pt_j: Vector2) -> Option<Vector3> {
    triangulate_multiview(&[(pose_i.clone(), pt_i), (pose_j.clone(), pt_j)])
}

/// Linear DLT resection: solve the 3x4 camera matrix `P = [R | t]` up to
/// scale from >= 6 3D-2D correspondences, then fix the scale's magnitude
/// (unit-norm rotation rows) and sign (`det(R) = +1`) to recover a proper
/// `SE3`.
fn solve_pnp_dlt(obj: &[Vector3], img: &[Vector2]) -> Option<SE3> {
    let n = obj.len();
    let mut a = MatrixX::zeros(2 * n, 12);
    for (i, (x, p)) in obj.iter().zip(img.iter()).enumerate() {
        let (x0, y0, z0) = (x.x, x.y, x.z);
        let (u, v) = (p.x, p.y);
        let r0 = 2 * i;
        a.set_row(
            r0,
            &VectorX::from_row_slice(&[
                x0, y0, z0, 1.0, 0.0, 0.0, 0.0, 0.0, -u * x0, -u * y0, -u * z0, -u,
            ])
            .transpose(),
        );
        a.set_row(
            r0 + 1,
            &VectorX::from_row_slice(&[
                0.0, 0.0, 0.0, 0.0, x0, y0, z0, 1.0, -v * x0, -v * y0, -v * z0, -v,
            ])
            .transpose(),
        );
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let p = v_t.row(v_t.nrows() - 1).transpose();

    let r_raw = Matrix3::new(
        p[0], p[1], p[2], //
        p[4], p[5], p[6], //
        p[8], p[9], p[10],
    );
    let t_raw = Vector3::new(p[3], p[7], p[11]);

    let row_norm = (r_raw.row(0).norm() + r_raw.row(1).norm() + r_raw.row(2).norm()) / 3.0;
    if row_norm < 1e-9 {
        return None;
    }
    let mut scale = 1.0 / row_norm;
    if r_raw.determinant() < 0.0 {
        scale = -scale;
    }

    let cam_t_world = SE3::from_rot_trans(SO3::from_matrix(&(r_raw * scale)), t_raw * scale);
    Some(cam_t_world.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(pose_cam_t_world: &SE3, x: Vector3) -> Vector2 {
        let p = pose_cam_t_world.apply(&x);
        Vector2::new(p.x / p.z, p.y / p.z)
    }

    #[test]
    fn bootstrap_recovers_a_forward_translating_window() {
        // Five frames translating along +x in front of a small point cloud;
        // cam_t_world_i = translate(-i*0.2, 0, 0) since the camera moves
        // while the world is fixed.
        let points = [
            Vector3::new(-0.5, -0.3, 3.0),
            Vector3::new(0.4, -0.2, 2.5),
            Vector3::new(-0.2, 0.4, 3.5),
            Vector3::new(0.3, 0.3, 2.8),
            Vector3::new(-0.4, 0.1, 4.0),
            Vector3::new(0.1, -0.4, 3.2),
            Vector3::new(-0.1, 0.2, 2.6),
            Vector3::new(0.5, 0.0, 3.8),
            Vector3::new(-0.3, -0.1, 3.1),
            Vector3::new(0.2, 0.35, 2.9),
            Vector3::new(-0.45, 0.25, 3.6),
            Vector3::new(0.35, -0.25, 3.3),
            Vector3::new(-0.15, -0.35, 2.7),
            Vector3::new(0.05, 0.45, 3.9),
            Vector3::new(-0.35, 0.05, 3.4),
            Vector3::new(0.25, -0.1, 2.4),
            Vector3::new(-0.05, -0.45, 3.7),
            Vector3::new(0.45, 0.15, 3.0),
            Vector3::new(-0.25, 0.3, 2.2),
            Vector3::new(0.15, -0.3, 4.1),
            Vector3::new(-0.4, 0.4, 2.9),
            Vector3::new(0.3, -0.4, 3.5),
            Vector3::new(-0.1, 0.1, 3.2),
            Vector3::new(0.4, 0.25, 2.6),
        ];

        let window_len = 5;
        let cam_t_world: Vec<SE3> = (0..window_len)
            .map(|i| SE3::from_rot_trans(SO3::identity(), Vector3::new(i as dtype * 0.2, 0.0, 0.0)))
            .collect();

        let tracks: Vec<Vec<(usize, Vector2)>> = points
            .iter()
            .map(|&pt| {
                (0..window_len)
                    .map(|f| (f, project(&cam_t_world[f], pt)))
                    .collect()
            })
            .collect();

        let poses = bootstrap_monocular_poses(window_len, &tracks).expect("bootstrap should succeed");
        assert_eq!(poses.len(), window_len);

        // The anchor frame (0) is the identity by construction; every other
        // frame should show monotonically increasing translation magnitude
        // relative to it, consistent with the synthetic forward motion
        // (direction/scale are only defined up to the essential matrix's own
        // gauge, so this checks ordering rather than exact values).
        let anchor_to = |i: usize| poses[i].trans.norm();
        for w in 1..window_len {
            assert!(anchor_to(w) >= anchor_to(w - 1) - 1e-6);
        }
    }

    #[test]
    fn too_few_tracks_rejects_bootstrap() {
        let tracks: Vec<Vec<(usize, Vector2)>> = vec![vec![(0, Vector2::new(0.0, 0.0)), (4, Vector2::new(0.1, 0.1))]; 5];
        assert!(bootstrap_monocular_poses(5, &tracks).is_none());
    }
}
