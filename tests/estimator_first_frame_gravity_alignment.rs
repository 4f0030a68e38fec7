//! The very first window slot's attitude comes from aligning the mean
//! measured specific force to world `+z` with zero yaw (§4.G). Feeding a
//! perfectly upright stationary IMU burst ahead of the first image should
//! leave that slot's rotation at identity; this exercises `process_image`'s
//! first-frame branch through the public `input_imu`/`input_image` API
//! without requiring the sliding-window bootstrap to converge.
use vio_estimator::config::EstimatorConfig;
use vio_estimator::containers::FeatureObservation;
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
fn upright_stationary_burst_yields_identity_first_pose() {
    let config = single_threaded_config();
    let gravity_norm = config.gravity_norm;
    let est = Estimator::new(config);

    // Ten IMU samples strictly before the first image timestamp, all
    // measuring specific force straight up along the body z axis.
    for i in 1..=10 {
        est.input_imu(i as dtype * 0.005, Vector3::zeros(), Vector3::new(0.0, 0.0, gravity_norm));
    }

    let empty: Vec<(u64, FeatureObservation)> = Vec::new();
    est.input_image(0.05, empty, Vec::new());

    let (t, pose, _) = est.latest_pose();
    assert_eq!(t, 0.05);
    assert!(
        pose.rot.log().norm() < 1e-9,
        "first frame should be level when the measured gravity direction is already +z: {:?}",
        pose.rot.log()
    );
    assert_eq!(pose.trans, Vector3::zeros());
}
