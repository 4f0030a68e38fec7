//! Sliding-window visual-inertial odometry state estimator core.
//!
//! This crate is the back-end of a VIO pipeline: it turns synchronized IMU
//! samples and tracked image features into a metric, gravity-aligned pose
//! trajectory. It owns the sliding window of poses/velocities/biases, the
//! IMU pre-integration factors, the reprojection factors, the monocular and
//! stereo initialization pipelines, and the nonlinear least-squares
//! optimizer that ties them together. Front-end feature tracking, camera
//! calibration, transport and visualization are out of scope; see
//! [`estimator::Estimator`] for the entry point a host process drives.
#[allow(non_camel_case_types)]
#[cfg(not(feature = "f32"))]
pub type dtype = f64;

#[cfg(feature = "f32")]
pub type dtype = f32;

pub mod config;
pub mod containers;
pub mod error;
pub mod estimator;
pub mod feature;
pub mod init;
pub mod linalg;
pub mod noise;
pub mod optimizer;
pub mod preintegration;
pub mod residuals;
pub mod robust;
pub mod variables;

pub use config::EstimatorConfig;
pub use error::Condition;
pub use estimator::Estimator;
