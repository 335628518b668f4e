//! Per-frame sensor input.

use nalgebra::UnitQuaternion;

use super::camera::Intrinsics;
use super::image::{DepthImage, RgbaImage};

/// An inertial measurement attached to a frame.
#[derive(Debug, Clone, Copy)]
pub struct ImuMeasurement {
    /// Device orientation at capture time.
    pub orientation: UnitQuaternion<f32>,
}

/// One synchronized RGB + depth observation, ready for tracking and fusion.
///
/// Built and refreshed by a [`ViewBuilder`](crate::engine::ViewBuilder);
/// the scheduler treats it as read-only for the rest of the frame.
#[derive(Debug, Clone)]
pub struct View {
    /// Colour image.
    pub rgb: RgbaImage,
    /// Metric depth image, in meters; `0.0` marks invalid samples.
    pub depth: DepthImage,
    /// Depth camera intrinsics.
    pub intrinsics: Intrinsics,
    /// Inertial measurement for this frame, when available.
    pub imu: Option<ImuMeasurement>,
}

impl View {
    /// Create a view from already-converted images.
    pub fn new(rgb: RgbaImage, depth: DepthImage, intrinsics: Intrinsics) -> Self {
        Self {
            rgb,
            depth,
            intrinsics,
            imu: None,
        }
    }
}
