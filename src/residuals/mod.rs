//! The closed set of residual factors the optimizer assembles into its
//! normal equations.
//!
//! Factors are a plain tagged enum rather than an open trait hierarchy:
//! there are exactly five kinds of factor in this estimator (§4.C), so a
//! `match` over a closed set is simpler than a generic dispatch mechanism
//! and keeps every Jacobian's shape visible at the call site.
use crate::dtype;
use crate::linalg::{MatrixX, VectorX};
use crate::robust::RobustCost;

mod imu;
pub use imu::ImuFactor;

mod projection;
pub use projection::{ProjOneFrameTwoCam, ProjTwoFrameOneCam, ProjTwoFrameTwoCam};

mod prior;
pub use prior::PriorFactor;

/// A handle to one tangent-space block in the optimizer's global parameter
/// vector. The optimizer resolves these to column offsets when it builds
/// the sparse system; factors never compute offsets themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamBlock {
    /// Pose of window slot `idx`, 6-dim tangent.
    Pose(usize),
    /// Velocity + bias of window slot `idx`, 9-dim tangent.
    SpeedBias(usize),
    /// Camera extrinsic `cam`, 6-dim tangent.
    Extrinsic(usize),
    /// Inverse depth of landmark with this id, 1-dim.
    InverseDepth(u64),
    /// Scalar camera-IMU time offset, 1-dim.
    TimeOffset,
}

impl ParamBlock {
    pub fn tangent_dim(&self) -> usize {
        match self {
            ParamBlock::Pose(_) => 6,
            ParamBlock::SpeedBias(_) => 9,
            ParamBlock::Extrinsic(_) => 6,
            ParamBlock::InverseDepth(_) => 1,
            ParamBlock::TimeOffset => 1,
        }
    }
}

/// A linearized factor: whitened+robust-weighted residual, and the
/// Jacobian of that whitened residual with respect to each of `blocks`'
/// tangent spaces, in the same order.
pub struct Linearization {
    pub blocks: Vec<ParamBlock>,
    pub residual: VectorX,
    /// One Jacobian block per entry in `blocks`, same row count as
    /// `residual`.
    pub jacobians: Vec<MatrixX>,
    /// `rho(||r||^2)`, the scalar cost this factor contributes, used for
    /// the optimizer's step-acceptance test.
    pub cost: dtype,
}

/// Apply a robust kernel's weight to an already-whitened residual and its
/// Jacobians, and report the scalar cost.
fn apply_robust_weight<R: RobustCost>(
    robust: &R,
    mut residual: VectorX,
    mut jacobians: Vec<MatrixX>,
) -> (VectorX, Vec<MatrixX>, dtype) {
    let d2 = residual.norm_squared();
    let cost = robust.loss(d2);
    let sqrt_w = robust.weight(d2).sqrt();
    if (sqrt_w - 1.0).abs() > 1e-12 {
        residual *= sqrt_w;
        for j in jacobians.iter_mut() {
            *j *= sqrt_w;
        }
    }
    (residual, jacobians, cost)
}

/// The closed set of residual factors this estimator's optimizer knows how
/// to linearize.
pub enum Factor {
    Imu(ImuFactor),
    ProjTwoFrameOneCam(ProjTwoFrameOneCam),
    ProjTwoFrameTwoCam(ProjTwoFrameTwoCam),
    ProjOneFrameTwoCam(ProjOneFrameTwoCam),
    Prior(PriorFactor),
}

impl Factor {
    pub fn blocks(&self) -> Vec<ParamBlock> {
        match self {
            Factor::Imu(f) => f.blocks(),
            Factor::ProjTwoFrameOneCam(f) => f.blocks(),
            Factor::ProjTwoFrameTwoCam(f) => f.blocks(),
            Factor::ProjOneFrameTwoCam(f) => f.blocks(),
            Factor::Prior(f) => f.blocks(),
        }
    }
}
