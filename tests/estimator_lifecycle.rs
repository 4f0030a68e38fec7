//! Black-box tests of `Estimator`'s public lifecycle: construction defaults,
//! out-of-order IMU rejection, and state reset on `clear_state`/
//! `change_sensor_type` (§4.G, §7).
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
fn fresh_estimator_reports_identity_at_time_zero() {
    let est = Estimator::new(single_threaded_config());
    let (t, pose, vel) = est.latest_pose();
    assert_eq!(t, 0.0);
    assert_eq!(pose.trans, Vector3::zeros());
    assert_eq!(vel, Vector3::zeros());
}

#[test]
fn out_of_order_imu_sample_is_dropped() {
    let est = Estimator::new(single_threaded_config());
    est.input_imu(0.10, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81007));
    let (t_after_first, _, _) = est.latest_pose();
    assert_eq!(t_after_first, 0.10);

    // A sample timestamped before the last one must be ignored rather than
    // rewinding the fast-forward clock.
    est.input_imu(0.05, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81007));
    let (t_after_stale, _, _) = est.latest_pose();
    assert_eq!(t_after_stale, t_after_first);
}

#[test]
fn clear_state_resets_latest_pose_and_clock() {
    let est = Estimator::new(single_threaded_config());
    for i in 1..=20 {
        est.input_imu(i as dtype * 0.01, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81007));
    }
    let (t_before, _, _) = est.latest_pose();
    assert!(t_before > 0.0);

    est.clear_state();

    let (t_after, pose, vel) = est.latest_pose();
    assert_eq!(t_after, 0.0);
    assert_eq!(pose.trans, Vector3::zeros());
    assert_eq!(vel, Vector3::zeros());
}

#[test]
fn change_sensor_type_updates_config_and_resets_state() {
    let est = Estimator::new(single_threaded_config());
    assert!(!est.config().stereo);

    est.input_imu(0.01, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81007));
    est.change_sensor_type(true, false);

    let config = est.config();
    assert!(config.stereo);
    assert!(!config.use_imu);

    let (t, _, _) = est.latest_pose();
    assert_eq!(t, 0.0);
}

#[test]
fn empty_feature_tracks_do_not_panic_before_window_is_full() {
    let est = Estimator::new(single_threaded_config());
    for i in 0..5 {
        let t = i as dtype * 0.1;
        for k in 0..5 {
            est.input_imu(t + k as dtype * 0.02, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81007));
        }
        let empty: Vec<(u64, FeatureObservation)> = Vec::new();
        est.input_image(t, empty.clone(), Vec::new());
    }
    let (t, pose, _) = est.latest_pose();
    assert!(t > 0.0);
    assert!(pose.trans.iter().all(|x| x.is_finite()));
}
