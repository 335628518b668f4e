//! Pin-hole camera intrinsics.

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Pin-hole intrinsics for a single camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length along x, in pixels.
    pub fx: f32,
    /// Focal length along y, in pixels.
    pub fy: f32,
    /// Principal point x, in pixels.
    pub cx: f32,
    /// Principal point y, in pixels.
    pub cy: f32,
}

impl Intrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Project a camera-space point onto the image plane.
    ///
    /// Returns `None` for points at or behind the camera.
    #[inline]
    pub fn project(&self, p: &Point3<f32>) -> Option<Vector2<f32>> {
        if p.z < 1e-6 {
            return None;
        }
        Some(Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Back-project a pixel at a given depth into camera space.
    #[inline]
    pub fn back_project(&self, x: f32, y: f32, z: f32) -> Point3<f32> {
        Point3::new(z * (x - self.cx) / self.fx, z * (y - self.cy) / self.fy, z)
    }

    /// Intrinsics rescaled for a subsampled image.
    pub fn subsampled(&self, factor: f32) -> Self {
        Self {
            fx: self.fx / factor,
            fy: self.fy / factor,
            cx: self.cx / factor,
            cy: self.cy / factor,
        }
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        // Typical 640x480 structured-light depth sensor.
        Self::new(525.0, 525.0, 319.5, 239.5)
    }
}
