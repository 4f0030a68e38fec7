//! Current-value storage for every [`ParamBlock`] the optimizer can touch.
//!
//! The optimizer never borrows the `Window`/`FeatureManager`/`Extrinsic`
//! list directly — `Estimator` populates a `Registry` snapshot before each
//! `optimize()` call and copies the result back afterwards. This mirrors
//! the teacher's `Values` container (a flat, type-erased map from key to
//! current estimate) simplified to this crate's small closed set of
//! variable kinds instead of a generic `dyn Variable` store.
use std::collections::{HashMap, HashSet};

use crate::dtype;
use crate::linalg::VectorX;
use crate::preintegration::ImuPreintegrator;
use crate::residuals::ParamBlock;
use crate::variables::{ImuBias, Manifold, SE3, SpeedBias};

/// One block's current value, boxed into a single enum so `Registry` can
/// keep a uniform map instead of five parallel ones when it needs to carry
/// a linearization-point snapshot around for the marginalization prior.
#[derive(Clone)]
pub enum ParamValue {
    Pose(SE3),
    SpeedBias(SpeedBias),
    Extrinsic(SE3),
    InverseDepth(dtype),
    TimeOffset(dtype),
}

impl ParamValue {
    fn oplus(&self, delta: &VectorX) -> Self {
        match self {
            ParamValue::Pose(p) => ParamValue::Pose(p.oplus(delta.as_view())),
            ParamValue::SpeedBias(sb) => ParamValue::SpeedBias(sb.oplus(delta.as_view())),
            ParamValue::Extrinsic(p) => ParamValue::Extrinsic(p.oplus(delta.as_view())),
            ParamValue::InverseDepth(d) => ParamValue::InverseDepth(d + delta[0]),
            ParamValue::TimeOffset(t) => ParamValue::TimeOffset(t + delta[0]),
        }
    }

    /// Tangent delta from `self` to `other` (`self.oplus(self.tangent_to(other)) == other`).
    fn tangent_to(&self, other: &Self) -> Option<VectorX> {
        match (self, other) {
            (ParamValue::Pose(a), ParamValue::Pose(b)) => Some(a.ominus(b)),
            (ParamValue::SpeedBias(a), ParamValue::SpeedBias(b)) => Some(a.ominus(b)),
            (ParamValue::Extrinsic(a), ParamValue::Extrinsic(b)) => Some(a.ominus(b)),
            (ParamValue::InverseDepth(a), ParamValue::InverseDepth(b)) => {
                Some(VectorX::from_row_slice(&[b - a]))
            }
            (ParamValue::TimeOffset(a), ParamValue::TimeOffset(b)) => {
                Some(VectorX::from_row_slice(&[b - a]))
            }
            _ => None,
        }
    }
}

#[derive(Default, Clone)]
pub struct Registry {
    values: HashMap<ParamBlock, ParamValue>,
    /// Value each block held when the current marginalization prior (if
    /// any) was built; `None` until `snapshot_linearization_point` is
    /// called, and only consulted by the `Prior` factor.
    linearization_point: HashMap<ParamBlock, ParamValue>,
    imu_preints: HashMap<usize, ImuPreintegrator>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn insert_pose(&mut self, frame: usize, pose: SE3) {
        self.values.insert(ParamBlock::Pose(frame), ParamValue::Pose(pose));
    }

    pub fn insert_speed_bias(&mut self, frame: usize, vel: crate::linalg::Vector3, bias: ImuBias) {
        self.values.insert(
            ParamBlock::SpeedBias(frame),
            ParamValue::SpeedBias(SpeedBias::new(vel, bias)),
        );
    }

    pub fn insert_extrinsic(&mut self, cam: usize, body_t_cam: SE3) {
        self.values
            .insert(ParamBlock::Extrinsic(cam), ParamValue::Extrinsic(body_t_cam));
    }

    pub fn insert_inverse_depth(&mut self, landmark: u64, inv_depth: dtype) {
        self.values.insert(
            ParamBlock::InverseDepth(landmark),
            ParamValue::InverseDepth(inv_depth),
        );
    }

    pub fn set_time_offset(&mut self, td: dtype) {
        self.values.insert(ParamBlock::TimeOffset, ParamValue::TimeOffset(td));
    }

    /// Pre-integration between window slot `frame` and `frame + 1`; fixed
    /// data the optimizer linearizes against but never perturbs.
    pub fn insert_imu_preint(&mut self, frame: usize, preint: ImuPreintegrator) {
        self.imu_preints.insert(frame, preint);
    }

    pub fn imu_preint(&self, frame: usize) -> Option<&ImuPreintegrator> {
        self.imu_preints.get(&frame)
    }

    /// Freeze the current values as the linearization point a `Prior`
    /// factor was built against, so `tangent_delta_from_linearization_point`
    /// has something to measure against on every later call.
    pub fn snapshot_linearization_point(&mut self) {
        self.linearization_point = self.values.clone();
    }

    pub fn tangent_delta_from_linearization_point(&self, block: ParamBlock) -> Option<VectorX> {
        let x0 = self.linearization_point.get(&block)?;
        let current = self.values.get(&block)?;
        x0.tangent_to(current)
    }

    pub fn pose(&self, frame: usize) -> Option<SE3> {
        match self.values.get(&ParamBlock::Pose(frame))? {
            ParamValue::Pose(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn speed_bias(&self, frame: usize) -> Option<SpeedBias> {
        match self.values.get(&ParamBlock::SpeedBias(frame))? {
            ParamValue::SpeedBias(sb) => Some(*sb),
            _ => None,
        }
    }

    pub fn extrinsic(&self, cam: usize) -> Option<SE3> {
        match self.values.get(&ParamBlock::Extrinsic(cam))? {
            ParamValue::Extrinsic(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn inverse_depth(&self, landmark: u64) -> Option<dtype> {
        match self.values.get(&ParamBlock::InverseDepth(landmark))? {
            ParamValue::InverseDepth(d) => Some(*d),
            _ => None,
        }
    }

    pub fn time_offset(&self) -> Option<dtype> {
        match self.values.get(&ParamBlock::TimeOffset)? {
            ParamValue::TimeOffset(t) => Some(*t),
            _ => None,
        }
    }

    pub fn value(&self, block: ParamBlock) -> Option<&ParamValue> {
        self.values.get(&block)
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = ParamBlock> + '_ {
        self.values.keys().copied()
    }

    /// Assign each non-fixed block a contiguous column offset into the
    /// optimizer's dense parameter vector, in an arbitrary but stable order
    /// (`HashMap` iteration order is stable within one run).
    pub fn free_offsets(&self, fixed: &HashSet<ParamBlock>) -> HashMap<ParamBlock, usize> {
        let mut offsets = HashMap::new();
        let mut next = 0;
        for block in self.values.keys() {
            if fixed.contains(block) {
                continue;
            }
            offsets.insert(*block, next);
            next += block.tangent_dim();
        }
        offsets
    }

    /// Apply a full solved step to every free block at once.
    pub fn apply_step(&mut self, offsets: &HashMap<ParamBlock, usize>, dx: &VectorX) {
        for (block, &off) in offsets {
            let dim = block.tangent_dim();
            let delta = dx.rows(off, dim).clone_owned();
            if let Some(v) = self.values.get(block) {
                let updated = v.oplus(&delta);
                self.values.insert(*block, updated);
            }
        }
    }
}
