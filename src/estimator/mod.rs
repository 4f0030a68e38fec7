//! Orchestrator (§4.G): synchronizes IMU/image input, drives the
//! `Initial`/`NonLinear` state machine, and owns the sliding window end to
//! end. This is the only module a host process talks to directly.
//!
//! Grounded on spec.md §4.G/§5/§6 rather than any one teacher file — the
//! teacher (`factrs`) is a library with no notion of a live input stream or
//! a background worker. The three-mutex split (input queues / fast-forward
//! output state / the big window-and-optimizer state) and the
//! `std::sync::{Mutex, Condvar}` + `std::thread::spawn` concurrency model
//! are supplemented from idiomatic `std` usage, not copied from anywhere in
//! the pack.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{info, warn};

use crate::config::EstimatorConfig;
use crate::containers::{
    AllFrame, AllFrameEntry, Extrinsic, ExtrinsicMode, FeatureObservation, LandmarkId,
    RawImuSample, Window, WindowSlot,
};
use crate::dtype;
use crate::error::Condition;
use crate::feature::{FeatureManager, MarginType};
use crate::init;
use crate::linalg::{Vector2, Vector3};
use crate::optimizer::{self, MarginalizationInput, OptParams, Registry};
use crate::preintegration::{ImuCovariance, ImuPreintegrator};
use crate::residuals::{
    Factor, ImuFactor, ParamBlock, PriorFactor, ProjOneFrameTwoCam, ProjTwoFrameOneCam,
    ProjTwoFrameTwoCam,
};
use crate::variables::{ImuBias, Manifold, SE3, SO3};

/// One synchronized image's tracks, per camera (`cam1` empty in mono mode).
pub struct ImageTracks {
    pub cam0: Vec<(u64, FeatureObservation)>,
    pub cam1: Vec<(u64, FeatureObservation)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EstimatorState {
    Initial,
    NonLinear,
}

struct InputQueues {
    imu: VecDeque<RawImuSample>,
    images: VecDeque<(dtype, ImageTracks)>,
}

/// Fast-forward prediction published after every IMU sample, so a caller
/// can read a low-latency pose between back-end solves (§4.G).
#[derive(Clone)]
struct LatestState {
    t: dtype,
    pose: SE3,
    vel: Vector3,
    bias: ImuBias,
}

/// Everything the back end needs between one `process_image` call and the
/// next: the window, landmark store, extrinsics, and initialization state.
struct ProcessState {
    state: EstimatorState,
    window: Window,
    features: FeatureManager,
    extrinsics: Vec<Extrinsic>,
    gravity: Vector3,
    td: dtype,
    all_frames: AllFrame,
    prior: Option<PriorFactor>,
    noise: ImuCovariance,
    last_imu_t: Option<dtype>,
    image_counter: u64,
    /// Newest slot's pose/bias as of the end of the previous cycle's solve,
    /// kept only for `failure_detection`'s frame-to-frame jump checks
    /// (§4.G); `None` until the first `NonLinear` solve has run once.
    last_solved: Option<(SE3, ImuBias)>,
}

/// Visual-inertial sliding-window estimator. Drives everything in §4.G:
/// input synchronization, fast-forward propagation, the `Initial`/
/// `NonLinear` state machine, and the per-image optimize/marginalize/slide
/// cycle.
pub struct Estimator {
    config: Mutex<EstimatorConfig>,
    queues: Mutex<InputQueues>,
    queues_cv: Condvar,
    latest: Mutex<LatestState>,
    process: Mutex<ProcessState>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Estimator {
    pub fn new(config: EstimatorConfig) -> Arc<Self> {
        let multi = config.multiple_thread;
        let extrinsics = config
            .tic_ric
            .iter()
            .cloned()
            .map(|pose| Extrinsic {
                body_t_cam: pose,
                mode: if config.estimate_extrinsic {
                    ExtrinsicMode::Refine
                } else {
                    ExtrinsicMode::Fixed
                },
            })
            .collect();

        let est = Arc::new(Estimator {
            process: Mutex::new(ProcessState {
                state: EstimatorState::Initial,
                window: Window::new(),
                features: FeatureManager::new(
                    config.keyframe_parallax_px,
                    config.focal_length,
                    config.min_tracked_features,
                ),
                extrinsics,
                gravity: Vector3::new(0.0, 0.0, -config.gravity_norm),
                td: config.td,
                all_frames: AllFrame::new(),
                prior: None,
                noise: ImuCovariance::default(),
                last_imu_t: None,
                image_counter: 0,
                last_solved: None,
            }),
            latest: Mutex::new(LatestState {
                t: 0.0,
                pose: SE3::identity(),
                vel: Vector3::zeros(),
                bias: ImuBias::zero(),
            }),
            queues: Mutex::new(InputQueues {
                imu: VecDeque::new(),
                images: VecDeque::new(),
            }),
            queues_cv: Condvar::new(),
            config: Mutex::new(config),
            running: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        });

        if multi {
            let handle_est = Arc::clone(&est);
            let handle = thread::spawn(move || handle_est.worker_loop());
            *est.worker.lock().unwrap() = Some(handle);
        }

        est
    }

    /// Reset to a fresh `Initial` state, dropping the window, landmarks,
    /// and any marginalization prior (§4.G `clearState`).
    pub fn clear_state(&self) {
        let mut process = self.process.lock().unwrap();
        clear_process_state(&mut process);
        let mut latest = self.latest.lock().unwrap();
        latest.t = 0.0;
        latest.pose = SE3::identity();
        latest.vel = Vector3::zeros();
        latest.bias = ImuBias::zero();
    }

    /// Switch camera mode at runtime (monocular <-> stereo), per §4.G's
    /// `changeSensorType`. Resets to `Initial`, since the window's factor
    /// shapes depend on the camera count.
    pub fn change_sensor_type(&self, stereo: bool, use_imu: bool) {
        {
            let mut config = self.config.lock().unwrap();
            config.stereo = stereo;
            config.use_imu = use_imu;
        }
        self.clear_state();
    }

    /// Current config snapshot, e.g. for a caller deciding whether to
    /// publish stereo tracks.
    pub fn config(&self) -> EstimatorConfig {
        self.config.lock().unwrap().clone()
    }

    /// Read the latest fast-forward pose/velocity prediction (§4.G).
    pub fn latest_pose(&self) -> (dtype, SE3, Vector3) {
        let latest = self.latest.lock().unwrap();
        (latest.t, latest.pose.clone(), latest.vel)
    }

    /// Feed one IMU sample. Always non-throwing (§7): an out-of-order
    /// sample is logged and dropped rather than returned as an error.
    pub fn input_imu(&self, t: dtype, gyro: Vector3, accel: Vector3) {
        {
            let mut latest = self.latest.lock().unwrap();
            if t <= latest.t && latest.t > 0.0 {
                warn!("input_imu: sample at {t} is not newer than last {}", latest.t);
                return;
            }
            let dt = if latest.t > 0.0 { t - latest.t } else { 0.0 };
            if dt > 0.0 {
                let gravity = {
                    let process = self.process.lock().unwrap();
                    process.gravity
                };
                let corrected_accel = accel - latest.bias.accel;
                let corrected_gyro = gyro - latest.bias.gyro;
                let world_accel = latest.pose.rot.apply(&corrected_accel) + gravity;
                latest.pose = SE3::from_rot_trans(
                    latest.pose.rot.oplus(crate::linalg::VectorX::from_row_slice(&[
                        corrected_gyro.x * dt,
                        corrected_gyro.y * dt,
                        corrected_gyro.z * dt,
                    ]).as_view()),
                    latest.pose.trans + latest.vel * dt + 0.5 * world_accel * dt * dt,
                );
                latest.vel += world_accel * dt;
            }
            latest.t = t;
        }

        let mut queues = self.queues.lock().unwrap();
        queues.imu.push_back(RawImuSample { t, gyro, accel });
        self.queues_cv.notify_all();

        if !self.config.lock().unwrap().multiple_thread {
            drop(queues);
            self.drain_ready_images();
        }
    }

    /// Feed one synchronized image's feature tracks (§4.G `inputImage`).
    pub fn input_image(&self, t: dtype, cam0: Vec<(u64, FeatureObservation)>, cam1: Vec<(u64, FeatureObservation)>) {
        let multi = {
            let mut config = self.config.lock().unwrap();
            if config.multiple_thread && config.process_every_other_image {
                let mut process = self.process.lock().unwrap();
                process.image_counter += 1;
                if process.image_counter % 2 == 0 {
                    return;
                }
            }
            config.multiple_thread
        };

        {
            let mut queues = self.queues.lock().unwrap();
            queues.images.push_back((t, ImageTracks { cam0, cam1 }));
            self.queues_cv.notify_all();
        }

        if !multi {
            self.drain_ready_images();
        }
    }

    fn worker_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            {
                let queues = self.queues.lock().unwrap();
                let _guard = self
                    .queues_cv
                    .wait_while(queues, |q| q.images.is_empty() && self.running.load(Ordering::SeqCst))
                    .unwrap();
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.drain_ready_images();
        }
    }

    /// Pop every oldest image whose `t + td` is already covered by the IMU
    /// buffer and run it through the back end (§4.G's per-cycle procedure).
    fn drain_ready_images(&self) {
        loop {
            let td = { self.process.lock().unwrap().td };
            let ready = {
                let queues = self.queues.lock().unwrap();
                match queues.images.front() {
                    Some((t, _)) => queues
                        .imu
                        .back()
                        .map(|s| s.t >= t + td)
                        .unwrap_or(false),
                    None => false,
                }
            };
            if !ready {
                break;
            }
            let (t, tracks) = {
                let mut queues = self.queues.lock().unwrap();
                queues.images.pop_front().unwrap()
            };
            let imu_slice = self.drain_imu_until(t + td);
            self.process_image(t, tracks, imu_slice);
        }
    }

    fn drain_imu_until(&self, t: dtype) -> Vec<RawImuSample> {
        let mut queues = self.queues.lock().unwrap();
        let mut out = Vec::new();
        while let Some(front) = queues.imu.front() {
            if front.t > t {
                break;
            }
            out.push(queues.imu.pop_front().unwrap());
        }
        out
    }

    /// One full image cycle: pre-integrate, append to the window, run the
    /// feature manager, then either attempt initialization or optimize
    /// (§4.G).
    fn process_image(&self, t: dtype, tracks: ImageTracks, imu_samples: Vec<RawImuSample>) {
        let mut process = self.process.lock().unwrap();
        let config = self.config.lock().unwrap().clone();

        let frame_count = process.window.len();
        let is_first_frame = process.window.is_empty();

        let initial_pose = if is_first_frame {
            initial_pose_from_gravity_alignment(&imu_samples)
        } else {
            process
                .window
                .newest()
                .map(|slot| slot.pose.clone())
                .unwrap_or_else(SE3::identity)
        };
        let initial_vel = process.window.newest().map(|s| s.vel).unwrap_or_else(Vector3::zeros);
        let initial_bias = process.window.newest().map(|s| s.bias).unwrap_or_else(ImuBias::zero);

        let mut slot = WindowSlot::new(t, initial_pose.clone(), initial_vel, initial_bias);

        if config.use_imu && !imu_samples.is_empty() {
            let mut preint =
                ImuPreintegrator::new(initial_bias, imu_samples[0].gyro, imu_samples[0].accel, process.noise);
            let mut prev_t = imu_samples[0].t;
            for sample in &imu_samples[1..] {
                let dt = sample.t - prev_t;
                if dt > 0.0 {
                    preint.push_back(dt, sample.gyro, sample.accel);
                }
                prev_t = sample.t;
            }
            slot.raw = imu_samples
                .windows(2)
                .map(|w| RawImuSample {
                    t: w[1].t - w[0].t,
                    gyro: w[1].gyro,
                    accel: w[1].accel,
                })
                .collect();
            if let Some(prev) = process.window.newest_mut() {
                prev.preint = Some(preint);
            }
        }

        process.window.push_back(slot);

        let mut combined: Vec<(u64, FeatureObservation)> = tracks.cam0;
        combined.extend(tracks.cam1);
        let gyro_rot_prev_curr = if frame_count > 0 {
            process.window.slots()[frame_count - 1]
                .preint
                .as_ref()
                .map(|p| p.delta_q.clone())
                .unwrap_or_else(SO3::identity)
        } else {
            SO3::identity()
        };
        let margin = process
            .features
            .add_frame(frame_count, &combined, &gyro_rot_prev_curr);

        match process.state {
            EstimatorState::Initial => {
                self.try_initialize(&mut process, &config, t, margin);
            }
            EstimatorState::NonLinear => {
                self.optimize_and_slide(&mut process, &config, margin);
            }
        }

        if let Some(newest) = process.window.newest() {
            let mut latest = self.latest.lock().unwrap();
            latest.t = newest.t;
            latest.pose = newest.pose.clone();
            latest.vel = newest.vel;
            latest.bias = newest.bias;
        }
    }

    /// §4.D bootstrap: gyro-bias solve, linear visual-inertial alignment,
    /// gravity refinement, then realign the whole window to the gravity
    /// frame with frame-0 yaw zeroed. Falls back to staying in `Initial` on
    /// any rejection (§7 `Condition::InitRejected`).
    fn try_initialize(&self, process: &mut ProcessState, config: &EstimatorConfig, t: dtype, _margin: MarginType) {
        process.all_frames.insert(AllFrameEntry {
            t,
            pose: None,
            is_keyframe: true,
            preint_from_prev: process.window.newest().and_then(|s| s.preint.clone()),
            raw_from_prev: Vec::new(),
        });

        if process.window.len() <= config.window_size {
            return;
        }

        let preints: Vec<ImuPreintegrator> = process
            .window
            .slots()
            .iter()
            .filter_map(|s| s.preint.clone())
            .collect();

        if preints.len() + 1 != process.window.len() {
            info!("{}", Condition::InitRejected);
            return;
        }

        if !init::sufficient_imu_excitation(&preints) {
            info!("{}", Condition::InitRejected);
            return;
        }

        // §4.D steps 2-4: real monocular SfM, not the IMU's own propagated
        // poses — those are exactly what this bootstrap is meant to
        // cross-check against, so feeding them back in would make
        // `solve_gyro_bias`/`linear_alignment` circular.
        let cam0_tracks = init::sfm::collect_cam0_tracks(process.features.landmarks());
        let Some(sfm_poses) = init::bootstrap_monocular_poses(process.window.len(), &cam0_tracks) else {
            info!("{}", Condition::InitRejected);
            return;
        };
        let rotations: Vec<SO3> = sfm_poses.iter().map(|p| p.rot.clone()).collect();

        let Some(bg) = init::solve_gyro_bias(&rotations, &preints) else {
            info!("{}", Condition::InitRejected);
            return;
        };
        for slot in process.window.slots_mut() {
            slot.bias.gyro = bg;
        }

        let tic = config.tic_ric.first().map(|e| e.trans).unwrap_or_else(Vector3::zeros);

        let Some((velocities, gravity, scale)) = init::linear_alignment(&sfm_poses, &preints, tic) else {
            info!("{}", Condition::InitRejected);
            return;
        };
        let Some((velocities, gravity, scale)) =
            init::refine_gravity(&sfm_poses, &preints, tic, gravity, config.gravity_norm)
                .map(|(v, g, _)| (v, g, scale))
        else {
            info!("{}", Condition::InitRejected);
            return;
        };

        let mut poses = sfm_poses;
        let mut velocities = velocities;
        init::apply_scale_and_align(&mut poses, &mut velocities, tic, scale, gravity);

        for (slot, (pose, vel)) in process.window.slots_mut().iter_mut().zip(poses.into_iter().zip(velocities)) {
            slot.pose = pose;
            slot.vel = vel;
        }
        process.gravity = Vector3::new(0.0, 0.0, -config.gravity_norm);

        process.features.triangulate(
            |idx| process.window.slots().get(idx).map(|s| s.pose.clone()),
            &process.extrinsics,
        );

        process.state = EstimatorState::NonLinear;
        info!("initialization accepted after {} frames", process.window.len());
    }

    /// §4.E: assemble factors, solve, marginalize, slide the window.
    fn optimize_and_slide(&self, process: &mut ProcessState, config: &EstimatorConfig, margin: MarginType) {
        process.features.triangulate(
            |idx| process.window.slots().get(idx).map(|s| s.pose.clone()),
            &process.extrinsics,
        );

        let mut registry = Registry::new();
        for (idx, slot) in process.window.slots().iter().enumerate() {
            registry.insert_pose(idx, slot.pose.clone());
            registry.insert_speed_bias(idx, slot.vel, slot.bias);
            if let Some(preint) = &slot.preint {
                registry.insert_imu_preint(idx, preint.clone());
            }
        }
        for (cam, ext) in process.extrinsics.iter().enumerate() {
            registry.insert_extrinsic(cam, ext.body_t_cam.clone());
        }
        for lm in process.features.landmarks() {
            if let Some(depth) = lm.inverse_depth {
                registry.insert_inverse_depth(lm.id, depth);
            }
        }
        registry.set_time_offset(process.td);
        registry.snapshot_linearization_point();

        let mut fixed: HashSet<ParamBlock> = HashSet::new();
        if !config.use_imu {
            fixed.insert(ParamBlock::Pose(0));
        }
        let window_full = process.window.is_full();
        let first_speed = process.window.slots().first().map(|s| s.vel.norm()).unwrap_or(0.0);
        if !config.estimate_extrinsic || !window_full || first_speed <= 0.2 {
            for cam in 0..process.extrinsics.len() {
                fixed.insert(ParamBlock::Extrinsic(cam));
            }
        }
        if !config.estimate_td || !window_full || first_speed <= 0.2 {
            fixed.insert(ParamBlock::TimeOffset);
        }

        let mut factors = Vec::new();
        if let Some(prior) = process.prior.take() {
            factors.push(Factor::Prior(prior));
        }
        for i in 0..process.window.len().saturating_sub(1) {
            if let Some(preint) = &process.window.slots()[i].preint {
                if preint.is_valid() {
                    factors.push(Factor::Imu(ImuFactor::new(i, i + 1, process.gravity)));
                }
            }
        }
        let info_scale = config.focal_length / 1.5;
        for lm in process.features.landmarks() {
            if lm.inverse_depth.is_none() || lm.observations.len() < 2 {
                continue;
            }
            let host = lm.observations[0];
            for obs in lm.observations.iter().skip(1) {
                if obs.frame == host.frame {
                    factors.push(Factor::ProjOneFrameTwoCam(ProjOneFrameTwoCam {
                        frame: host.frame,
                        cam_i: host.camera,
                        cam_j: obs.camera,
                        landmark: lm.id,
                        pt_i: host.point,
                        pt_j: obs.point,
                        vel_i: host.velocity,
                        vel_j: obs.velocity,
                        td0: process.td,
                        info_scale,
                    }));
                } else if obs.camera == host.camera {
                    factors.push(Factor::ProjTwoFrameOneCam(ProjTwoFrameOneCam {
                        frame_i: host.frame,
                        frame_j: obs.frame,
                        cam: host.camera,
                        landmark: lm.id,
                        pt_i: host.point,
                        pt_j: obs.point,
                        vel_i: host.velocity,
                        vel_j: obs.velocity,
                        td0: process.td,
                        info_scale,
                    }));
                } else {
                    factors.push(Factor::ProjTwoFrameTwoCam(ProjTwoFrameTwoCam {
                        frame_i: host.frame,
                        frame_j: obs.frame,
                        cam_i: host.camera,
                        cam_j: obs.camera,
                        landmark: lm.id,
                        pt_i: host.point,
                        pt_j: obs.point,
                        vel_i: host.velocity,
                        vel_j: obs.velocity,
                        td0: process.td,
                        info_scale,
                    }));
                }
            }
        }

        let mut params = OptParams {
            max_iterations: config.num_iterations,
            wall_clock_budget: config.solver_time,
            ..Default::default()
        };
        if margin == MarginType::MarginOld {
            params.wall_clock_budget *= 4.0 / 5.0;
        }

        if let Err(e) = optimizer::optimize(&factors, &mut registry, &fixed, &params) {
            warn!("optimizer: {:?}", e);
        }

        let old_frame0_yaw = process.window.oldest().map(|s| s.pose.rot.log().z).unwrap_or(0.0);
        let old_frame0_trans = process.window.oldest().map(|s| s.pose.trans).unwrap_or_else(Vector3::zeros);

        for (idx, slot) in process.window.slots_mut().iter_mut().enumerate() {
            if let Some(pose) = registry.pose(idx) {
                slot.pose = pose;
            }
            if let Some(sb) = registry.speed_bias(idx) {
                slot.vel = sb.vel;
                slot.bias = sb.bias;
            }
        }
        for (cam, ext) in process.extrinsics.iter_mut().enumerate() {
            if let Some(pose) = registry.extrinsic(cam) {
                ext.body_t_cam = pose;
            }
        }
        for lm in process.features.landmarks_mut() {
            if let Some(depth) = registry.inverse_depth(lm.id) {
                lm.inverse_depth = Some(depth);
            }
        }
        if let Some(td) = registry.time_offset() {
            process.td = td;
        }

        fix_yaw_gauge(process, old_frame0_yaw, old_frame0_trans);

        if let Some(newest) = process.window.newest() {
            let newest_pose = newest.pose.clone();
            let newest_bias = newest.bias;
            let tripped = process.last_solved.as_ref().is_some_and(|prev| {
                failure_detection(
                    config,
                    process.features.last_track_count(),
                    &newest_bias,
                    &newest_pose,
                    prev,
                )
            });
            if tripped {
                warn!("{}", Condition::Divergence);
                clear_process_state(process);
                return;
            }
            process.last_solved = Some((newest_pose, newest_bias));
        }

        let errors = reprojection_errors(process, config.focal_length);
        let dropped = process
            .features
            .remove_outliers(|id| errors.get(&id).copied(), config.outlier_reprojection_px);
        if !dropped.is_empty() {
            info!("{}: dropped {} outlier landmarks", Condition::LandmarkOutlier, dropped.len());
        }

        self.marginalize_and_slide(process, margin, &registry, &factors);
    }

    fn marginalize_and_slide(
        &self,
        process: &mut ProcessState,
        margin: MarginType,
        registry: &Registry,
        factors: &[Factor],
    ) {
        let new_ext = process.extrinsics.clone();
        match margin {
            MarginType::MarginOld => {
                let mut drop_blocks = vec![ParamBlock::Pose(0), ParamBlock::SpeedBias(0)];
                for lm in process.features.landmarks() {
                    if lm.start_frame == 0 && lm.inverse_depth.is_some() {
                        drop_blocks.push(ParamBlock::InverseDepth(lm.id));
                    }
                }
                let keep_blocks: Vec<ParamBlock> = registry
                    .all_blocks()
                    .filter(|b| !drop_blocks.contains(b))
                    .collect();
                process.prior = optimizer::marginalize_blocks(MarginalizationInput {
                    factors,
                    registry,
                    drop_blocks,
                    keep_blocks,
                });

                if process.window.len() > 1 {
                    let old_host = process.window.oldest().unwrap().pose.clone();
                    let removed = process.window.remove_oldest();
                    let new_host = process
                        .window
                        .oldest()
                        .map(|s| s.pose.clone())
                        .unwrap_or(old_host.clone());
                    let ext0 = new_ext.first().cloned().unwrap_or(Extrinsic::fixed(SE3::identity()));
                    process.features.margin_old(&old_host, &new_host, &ext0);
                    drop(removed);
                }
            }
            MarginType::MarginSecondNew => {
                if process.window.len() > 1 {
                    let second_newest = process.window.len() - 2;
                    process.window.remove_second_newest();
                    process.features.margin_second_new(second_newest);
                }
            }
        }

        if let Some(oldest) = process.window.oldest() {
            process.all_frames.prune_older_than(oldest.t);
        }
    }
}

/// Shared body of `clear_state`/the failure-reset path: everything that
/// lives on `ProcessState` gets dropped back to a fresh `Initial` estimator.
/// Split out so `optimize_and_slide` can call it while it already holds the
/// `process` lock, without re-entering `Estimator::clear_state`'s own lock.
fn clear_process_state(process: &mut ProcessState) {
    process.state = EstimatorState::Initial;
    process.window.clear();
    process.features.clear();
    process.all_frames.clear();
    process.prior = None;
    process.last_imu_t = None;
    process.image_counter = 0;
    process.last_solved = None;
}

/// §4.G `failureDetection`: `estimator.cpp` only ever reaches two of its
/// enumerated checks (accel/gyro bias magnitude; the rest are dead code
/// behind an unconditional early return and commented-out `return true`s).
/// Per spec.md §9's open-question resolution, all four are kept available
/// behind `failure_detection_enabled` rather than invented or dropped.
fn failure_detection(
    config: &EstimatorConfig,
    track_count: usize,
    newest_bias: &ImuBias,
    newest_pose: &SE3,
    prev: &(SE3, ImuBias),
) -> bool {
    if !config.failure_detection_enabled {
        return false;
    }
    if track_count < 2 {
        warn!("failure_detection: only {track_count} tracks");
    }
    if newest_bias.accel.norm() > config.failure_max_accel_bias {
        warn!("failure_detection: accel bias {} too large", newest_bias.accel.norm());
        return true;
    }
    if newest_bias.gyro.norm() > config.failure_max_gyro_bias {
        warn!("failure_detection: gyro bias {} too large", newest_bias.gyro.norm());
        return true;
    }
    let (prev_pose, _) = prev;
    if (newest_pose.trans - prev_pose.trans).norm() > config.failure_max_translation_per_step {
        warn!("failure_detection: translation jump too large");
        return true;
    }
    let delta = newest_pose.rot.compose(&prev_pose.rot.inverse());
    let delta_angle_deg = delta.log().norm().to_degrees();
    if delta_angle_deg > config.failure_max_z_rotation_deg {
        warn!("failure_detection: rotation jump {delta_angle_deg} deg too large");
        return true;
    }
    false
}

/// First-frame `R_0`: align the mean measured-gravity direction with
/// world `+z`, with zero yaw (§4.G).
fn initial_pose_from_gravity_alignment(samples: &[RawImuSample]) -> SE3 {
    if samples.is_empty() {
        return SE3::identity();
    }
    let mean: Vector3 = samples.iter().map(|s| s.accel).sum::<Vector3>() / samples.len() as dtype;
    let norm = mean.norm();
    if norm < 1e-6 {
        return SE3::identity();
    }
    let g_dir = mean / norm;
    let z = Vector3::new(0.0, 0.0, 1.0);
    let axis = g_dir.cross(&z);
    let axis_norm = axis.norm();
    let rot = if axis_norm < 1e-8 {
        SO3::identity()
    } else {
        let angle = g_dir.dot(&z).clamp(-1.0, 1.0).acos();
        SO3::exp(axis / axis_norm * angle)
    };
    SE3::from_rot_trans(rot, Vector3::zeros())
}

/// Undo any drift the solve introduced in the fixed yaw-gauge direction:
/// rotate/translate the whole window so frame 0's yaw and position match
/// what they were before this solve (§4.E step 5).
fn fix_yaw_gauge(process: &mut ProcessState, old_yaw: dtype, old_trans: Vector3) {
    let Some(new_frame0) = process.window.oldest() else {
        return;
    };
    let new_yaw = new_frame0.pose.rot.log().z;
    let mut delta_yaw = old_yaw - new_yaw;
    // Guard against the gimbal-lock ambiguity near +-90 deg pitch, where a
    // yaw correction is not well defined; skip the correction rather than
    // apply a garbage rotation.
    if new_frame0.pose.rot.to_matrix()[(2, 2)].abs() < 1e-3 {
        delta_yaw = 0.0;
    }
    let correction = SO3::exp(Vector3::new(0.0, 0.0, delta_yaw));
    let new_trans = new_frame0.pose.trans;

    for slot in process.window.slots_mut() {
        slot.pose.trans = correction.apply(&(slot.pose.trans - new_trans)) + old_trans;
        slot.pose.rot = correction.compose(&slot.pose.rot);
        slot.vel = correction.apply(&slot.vel);
    }
}

/// Average reprojection error in pixels of every solved landmark's
/// non-host observations against the anchor-frame-triangulated point
/// (§4.B, §8's outlier threshold), used to feed
/// `FeatureManager::remove_outliers`.
fn reprojection_errors(process: &ProcessState, focal_length: dtype) -> HashMap<LandmarkId, dtype> {
    let mut errors = HashMap::new();
    for lm in process.features.landmarks() {
        let Some(depth) = lm.inverse_depth else {
            continue;
        };
        let Some(host) = lm.observations.first() else {
            continue;
        };
        let Some(host_pose) = process.window.slots().get(host.frame) else {
            continue;
        };
        let Some(host_ext) = process.extrinsics.get(host.camera) else {
            continue;
        };
        let host_cam = host_pose.pose.compose(&host_ext.body_t_cam);
        let p_host = Vector3::new(host.point.x, host.point.y, 1.0) / depth;
        let p_world = host_cam.apply(&p_host);

        let mut total = 0.0;
        let mut n = 0usize;
        for obs in lm.observations.iter().skip(1) {
            let Some(slot) = process.window.slots().get(obs.frame) else {
                continue;
            };
            let Some(ext) = process.extrinsics.get(obs.camera) else {
                continue;
            };
            let cam = slot.pose.compose(&ext.body_t_cam);
            let p_cam = cam.inverse().apply(&p_world);
            if p_cam.z <= 1e-6 {
                continue;
            }
            let proj = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
            total += (proj - obs.point).norm() * focal_length;
            n += 1;
        }
        if n > 0 {
            errors.insert(lm.id, total / n as dtype);
        }
    }
    errors
}

#[cfg(test)]
mod failure_detection_tests {
    use super::failure_detection;
    use crate::config::EstimatorConfig;
    use crate::linalg::Vector3;
    use crate::variables::{ImuBias, SE3};

    fn config(enabled: bool) -> EstimatorConfig {
        EstimatorConfig {
            failure_detection_enabled: enabled,
            ..EstimatorConfig::default()
        }
    }

    #[test]
    fn disabled_by_default_never_trips() {
        let prev = (SE3::identity(), ImuBias::zero());
        let huge_bias = ImuBias {
            gyro: Vector3::new(10.0, 0.0, 0.0),
            accel: Vector3::new(10.0, 0.0, 0.0),
        };
        assert!(!failure_detection(
            &config(false),
            10,
            &huge_bias,
            &SE3::identity(),
            &prev,
        ));
    }

    #[test]
    fn enabled_trips_on_accel_bias_norm() {
        let prev = (SE3::identity(), ImuBias::zero());
        let bias = ImuBias {
            gyro: Vector3::zeros(),
            accel: Vector3::new(3.0, 0.0, 0.0),
        };
        assert!(failure_detection(
            &config(true),
            10,
            &bias,
            &SE3::identity(),
            &prev,
        ));
    }

    #[test]
    fn enabled_trips_on_translation_jump() {
        let prev = (SE3::identity(), ImuBias::zero());
        let jumped = SE3::from_rot_trans(crate::variables::SO3::identity(), Vector3::new(50.0, 0.0, 0.0));
        assert!(failure_detection(&config(true), 10, &ImuBias::zero(), &jumped, &prev));
    }

    #[test]
    fn enabled_stays_quiet_within_thresholds() {
        let prev = (SE3::identity(), ImuBias::zero());
        let moved = SE3::from_rot_trans(crate::variables::SO3::identity(), Vector3::new(0.1, 0.0, 0.0));
        assert!(!failure_detection(
            &config(true),
            10,
            &ImuBias::zero(),
            &moved,
            &prev,
        ));
    }
}
