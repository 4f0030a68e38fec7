use crate::dtype;
use crate::linalg::Vector3;
use crate::preintegration::ImuPreintegrator;
use crate::variables::{ImuBias, SE3};

/// Number of past keyframes retained besides the newest; the window holds
/// `WINDOW_SIZE + 1` slots total, matching VINS-style estimators.
pub const WINDOW_SIZE: usize = 10;

/// A single raw IMU sample, buffered per-slot so `repropagate` can redo
/// pre-integration from scratch after a bias update without drift.
#[derive(Clone, Copy, Debug)]
pub struct RawImuSample {
    pub t: dtype,
    pub gyro: Vector3,
    pub accel: Vector3,
}

/// One pose/velocity/bias state in the sliding window.
#[derive(Clone, Debug)]
pub struct WindowSlot {
    pub t: dtype,
    pub pose: SE3,
    pub vel: Vector3,
    pub bias: ImuBias,
    /// Pre-integration of IMU samples between this slot and the next one.
    /// `None` for the newest slot (nothing has accumulated into it yet).
    pub preint: Option<ImuPreintegrator>,
    /// Raw IMU samples backing `preint`, kept so `repropagate` can redo the
    /// integration bit-for-bit after a bias correction.
    pub raw: Vec<RawImuSample>,
}

impl WindowSlot {
    pub fn new(t: dtype, pose: SE3, vel: Vector3, bias: ImuBias) -> Self {
        WindowSlot {
            t,
            pose,
            vel,
            bias,
            preint: None,
            raw: Vec::new(),
        }
    }
}

/// The fixed-capacity sliding window of keyframe states.
///
/// Indices are plain array offsets, not arbitrary long-lived keys — the
/// estimator never holds a handle into the window across a slide, it always
/// re-resolves positions by index each iteration. This sidesteps the cyclic
/// `Rc<RefCell<_>>` graph a naive pose-graph-of-objects design would need.
pub struct Window {
    slots: Vec<WindowSlot>,
}

impl Window {
    pub fn new() -> Self {
        Window { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() > WINDOW_SIZE
    }

    pub fn slots(&self) -> &[WindowSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [WindowSlot] {
        &mut self.slots
    }

    pub fn push_back(&mut self, slot: WindowSlot) {
        self.slots.push(slot);
    }

    pub fn newest(&self) -> Option<&WindowSlot> {
        self.slots.last()
    }

    pub fn newest_mut(&mut self) -> Option<&mut WindowSlot> {
        self.slots.last_mut()
    }

    pub fn oldest(&self) -> Option<&WindowSlot> {
        self.slots.first()
    }

    /// Drop the oldest slot (`MARGIN_OLD`), shifting everyone else down.
    pub fn remove_oldest(&mut self) -> WindowSlot {
        self.slots.remove(0)
    }

    /// Drop the second-newest slot (`MARGIN_SECOND_NEW`), merging its
    /// pre-integration into the newest slot's.
    pub fn remove_second_newest(&mut self) -> WindowSlot {
        let idx = self.slots.len() - 2;
        self.slots.remove(idx)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new()
    }
}
