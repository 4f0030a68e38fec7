use std::collections::BTreeMap;

use crate::containers::RawImuSample;
use crate::dtype;
use crate::preintegration::ImuPreintegrator;
use crate::variables::SE3;

/// Every image received while the estimator is still in its `Initial`
/// phase (not just the keyframes kept in the window), needed by the §4.D
/// initializer to run global SfM over the full set of received frames
/// before the window is populated.
#[derive(Clone, Debug)]
pub struct AllFrameEntry {
    pub t: dtype,
    /// Pose guess from SfM/PnP, filled in once the initializer resolves it.
    pub pose: Option<SE3>,
    pub is_keyframe: bool,
    pub preint_from_prev: Option<ImuPreintegrator>,
    pub raw_from_prev: Vec<RawImuSample>,
}

/// Timestamp-ordered map of every received frame. Bounded in practice: once
/// `NonLinear` state is reached, entries older than the oldest window slot
/// are pruned on every `MarginOld` slide (see `DESIGN.md`'s resolution of
/// the corresponding open question), so this never grows without bound in
/// steady-state tracking.
#[derive(Default)]
pub struct AllFrame {
    frames: BTreeMap<u64, AllFrameEntry>,
}

fn key(t: dtype) -> u64 {
    (t * 1e9) as u64
}

impl AllFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: AllFrameEntry) {
        self.frames.insert(key(entry.t), entry);
    }

    pub fn get(&self, t: dtype) -> Option<&AllFrameEntry> {
        self.frames.get(&key(t))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllFrameEntry> {
        self.frames.values()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drop every entry older than `oldest_kept`, called after a
    /// `MarginOld` slide once the window is initialized.
    pub fn prune_older_than(&mut self, oldest_kept: dtype) {
        self.frames.retain(|_, v| v.t >= oldest_kept);
    }
}
