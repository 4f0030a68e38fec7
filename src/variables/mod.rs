//! Manifold (Lie group) variable types used throughout the estimator.
//!
//! Every state held in the sliding window — poses, velocities, biases,
//! extrinsics — is either a plain Euclidean vector or one of the two Lie
//! groups here: [`SO3`] (rotation) and [`SE3`] (pose). Both implement
//! [`Manifold`], the tangent-space retraction (`oplus`/`ominus`) the
//! optimizer needs to apply an update step without renormalizing quaternions
//! by hand after every iteration.
use crate::linalg::{VectorViewX, VectorX};

mod so3;
pub use so3::SO3;

mod se3;
pub use se3::SE3;

mod imu_bias;
pub use imu_bias::{ImuBias, SpeedBias};

/// A point on a manifold with a tangent space, i.e. something the optimizer
/// can perturb with a small update vector without leaving the manifold.
pub trait Manifold: Clone {
    /// Tangent space dimension (3 for `SO3`, 6 for `SE3`, matches vector
    /// length for plain Euclidean variables).
    fn dim(&self) -> usize;

    /// Identity element.
    fn identity() -> Self;

    /// Retract: apply tangent-space update `delta` to `self`.
    fn oplus(&self, delta: VectorViewX<'_>) -> Self
    where
        Self: Sized;

    /// Local coordinates of `other` relative to `self`, i.e. the inverse of
    /// `oplus`: `self.oplus(self.ominus(other)) == other`.
    fn ominus(&self, other: &Self) -> VectorX
    where
        Self: Sized;
}
