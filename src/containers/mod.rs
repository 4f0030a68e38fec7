//! Data model: the sliding window, the landmark store, and the all-frame
//! map used during initialization.
mod window;
pub use window::{RawImuSample, Window, WindowSlot, WINDOW_SIZE};

mod landmark;
pub use landmark::{FeatureObservation, Landmark, LandmarkId, SolveStatus};

mod all_frame;
pub use all_frame::{AllFrame, AllFrameEntry};

use crate::variables::SE3;

/// Per-camera body-to-camera extrinsic, plus whether the optimizer is
/// allowed to update it (`ESTIMATE_EXTRINSIC` in spec terms).
#[derive(Clone, Copy, Debug)]
pub enum ExtrinsicMode {
    /// Extrinsic is known exactly; never touched by the optimizer.
    Fixed,
    /// Extrinsic is approximately known; optimized starting from the given
    /// initial guess.
    Refine,
    /// Extrinsic is unknown; calibrated from scratch, using identity as the
    /// starting guess.
    Calibrate,
}

#[derive(Clone, Debug)]
pub struct Extrinsic {
    pub body_t_cam: SE3,
    pub mode: ExtrinsicMode,
}

impl Extrinsic {
    pub fn fixed(body_t_cam: SE3) -> Self {
        Extrinsic {
            body_t_cam,
            mode: ExtrinsicMode::Fixed,
        }
    }
}
