//! SE(3) pose conventions and helpers.
//!
//! Camera poses follow the depth-camera convention: a [`Pose`] maps
//! world (map-frame) coordinates into camera coordinates. The inverse
//! therefore maps camera rays back into the map, which is what the
//! raycaster consumes.
//!
//! Inter-map transforms use the same type: `T(from, to)` maps a point
//! expressed in map `from` into map `to`. Composing along a graph path
//! is plain isometry multiplication.

use nalgebra::{Isometry3, UnitQuaternion, Vector3};

/// A rigid transform in 3D, used both for camera poses (world-to-camera)
/// and for inter-map transforms.
pub type Pose = Isometry3<f32>;

/// Translation distance between two poses, in meters.
#[inline]
pub fn translation_between(a: &Pose, b: &Pose) -> f32 {
    (a.translation.vector - b.translation.vector).norm()
}

/// Rotation angle between two poses, in radians.
#[inline]
pub fn rotation_between(a: &Pose, b: &Pose) -> f32 {
    a.rotation.angle_to(&b.rotation)
}

/// Relative pose of `b` with respect to `a`: the transform that maps
/// `b`-frame coordinates into `a`-frame coordinates when both poses are
/// expressed in a common frame.
#[inline]
pub fn relative(a: &Pose, b: &Pose) -> Pose {
    a.inverse() * b
}

/// Rotate a direction vector by the rotation part of a pose.
#[inline]
pub fn rotate(pose: &Pose, dir: &Vector3<f32>) -> Vector3<f32> {
    pose.rotation * dir
}

/// Align a quaternion's sign with a reference so that component-wise
/// averaging stays on the same hemisphere.
pub fn align_quaternion(q: &UnitQuaternion<f32>, reference: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    if q.coords.dot(&reference.coords) < 0.0 {
        UnitQuaternion::new_unchecked(-q.into_inner())
    } else {
        *q
    }
}
