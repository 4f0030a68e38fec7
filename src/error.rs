//! Non-throwing conditions the estimator logs and exposes for testing.
//!
//! None of these are ever returned as an `Err` that aborts a public-API
//! call (§7): `Estimator::input_image`/`input_imu` always return `()`. They
//! exist so callers (and tests) can observe *why* a tick produced no new
//! odometry without the estimator panicking or erroring out.
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// No IMU sample at or past `t + td` yet; the image is still queued.
    Waiting,
    /// The IMU and image streams disagree badly enough (e.g. a large gap,
    /// or samples arriving out of order) that this tick was dropped.
    DataSkew,
    /// An initialisation attempt (§4.D) did not meet its acceptance
    /// criteria and `solver_flag` stays `INITIAL`.
    InitRejected,
    /// The failure-detection hook (§4.G) tripped and the estimator reset.
    Divergence,
    /// A landmark's average reprojection error exceeded the 3px threshold
    /// and it was dropped from the optimisation (§4.B).
    LandmarkOutlier,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Condition::Waiting => "waiting for IMU data",
            Condition::DataSkew => "image/IMU stream skew",
            Condition::InitRejected => "initialisation rejected",
            Condition::Divergence => "divergence detected",
            Condition::LandmarkOutlier => "landmark outlier",
        };
        write!(f, "{s}")
    }
}
