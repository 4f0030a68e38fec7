//! A stationary IMU feed (zero angular rate, specific force exactly
//! cancelling gravity) must leave the fast-forward prediction at rest: this
//! exercises `Estimator::input_imu`'s propagation step directly, without
//! needing the bootstrap or optimizer to succeed.
use vio_estimator::config::EstimatorConfig;
use vio_estimator::dtype;
use vio_estimator::linalg::Vector3;
use vio_estimator::Estimator;

fn single_threaded_config() -> EstimatorConfig {
    EstimatorConfig {
        multiple_thread: false,
        ..EstimatorConfig::default()
    }
}

#[test]
fn stationary_accel_leaves_velocity_and_position_at_rest() {
    let config = single_threaded_config();
    let gravity_norm = config.gravity_norm;
    let est = Estimator::new(config);

    let dt = 0.005;
    let accel = Vector3::new(0.0, 0.0, gravity_norm);
    for i in 1..=200 {
        est.input_imu(i as dtype * dt, Vector3::zeros(), accel);
    }

    let (t, pose, vel) = est.latest_pose();
    assert!((t - 200.0 * dt).abs() < 1e-9);
    assert!(pose.trans.norm() < 1e-6, "position drifted: {:?}", pose.trans);
    assert!(vel.norm() < 1e-6, "velocity drifted: {:?}", vel);
    assert!(pose.rot.log().norm() < 1e-9, "rotation drifted while gyro was zero");
}

#[test]
fn pure_yaw_rotation_integrates_without_affecting_position() {
    let est = Estimator::new(single_threaded_config());
    let gravity_norm = est.config().gravity_norm;

    let dt = 0.01;
    let yaw_rate = 0.2; // rad/s about the body z axis
    let accel = Vector3::new(0.0, 0.0, gravity_norm);
    for i in 1..=100 {
        est.input_imu(i as dtype * dt, Vector3::new(0.0, 0.0, yaw_rate), accel);
    }

    let (_, pose, vel) = est.latest_pose();
    // Specific force stays aligned with the rotation axis, so gravity still
    // cancels exactly regardless of accumulated yaw.
    assert!(pose.trans.norm() < 1e-6, "position drifted under pure yaw: {:?}", pose.trans);
    assert!(vel.norm() < 1e-6, "velocity drifted under pure yaw: {:?}", vel);

    let expected_yaw = yaw_rate * 100.0 * dt;
    assert!((pose.rot.log().z - expected_yaw).abs() < 1e-3);
}
