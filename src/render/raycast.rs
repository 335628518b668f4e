//! TSDF ray-marching.
//!
//! Each ray walks the voxel volume with an adaptive step length driven
//! by a five-state machine:
//!
//! - `SearchBlockCoarse`: unallocated space; jump a whole block per step.
//! - `SearchBlockFine`: just entered an allocated block; take one
//!   truncation-distance step back so the surface cannot be overshot.
//! - `SearchSurface`: inside allocated space on the positive side; step
//!   by the read SDF value scaled to voxel units.
//! - `WrongSide`: the ray started behind a surface; step forward until
//!   the SDF turns positive again.
//! - `BehindSurface`: terminal; a sign change was crossed.
//!
//! Near the zero crossing (SDF in `[-0.1, 0]`) the nearest-voxel read is
//! upgraded to a trilinear read before the sign test, and the final hit
//! is refined by one SDF-proportional back-step.

use nalgebra::{Vector3, Vector4};

use crate::core::camera::Intrinsics;
use crate::core::pose::Pose;
use crate::scene::hash::VoxelBlockHash;
use crate::scene::voxel::BLOCK_SIDE;

/// Ray-march state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RayState {
    SearchBlockCoarse,
    SearchBlockFine,
    SearchSurface,
    WrongSide,
    BehindSurface,
}

/// Result of marching one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    /// Surface point in voxel coordinates (valid only when `found`).
    pub point: Vector3<f32>,
    /// Whether a zero crossing was reached within the search range.
    pub found: bool,
}

impl RaycastHit {
    /// Pack as `(x, y, z, found)` with `found` encoded in `w`.
    pub fn to_vector(&self) -> Vector4<f32> {
        Vector4::new(
            self.point.x,
            self.point.y,
            self.point.z,
            if self.found { 1.0 } else { 0.0 },
        )
    }
}

/// March the ray through pixel `(x, y)` to the first zero crossing.
///
/// `inv_pose` is the camera-to-world transform of the map being
/// rendered; `z_range` is the per-pixel search interval from the
/// expected-depth image, in camera-space meters.
pub fn cast_ray(
    scene: &VoxelBlockHash,
    x: usize,
    y: usize,
    inv_pose: &Pose,
    intrinsics: &Intrinsics,
    z_range: [f32; 2],
) -> RaycastHit {
    let miss = RaycastHit {
        point: Vector3::zeros(),
        found: false,
    };
    if z_range[0] >= z_range[1] {
        // Untouched expected-range pixel: nothing projects here.
        return miss;
    }

    let one_over_voxel = 1.0 / scene.voxel_size();
    let step_scale = scene.mu() * one_over_voxel;

    let cam_start = intrinsics.back_project(x as f32, y as f32, z_range[0]);
    let cam_end = intrinsics.back_project(x as f32, y as f32, z_range[1]);

    let mut total_length = cam_start.coords.norm() * one_over_voxel;
    let total_length_max = cam_end.coords.norm() * one_over_voxel;

    let start = inv_pose.transform_point(&cam_start).coords * one_over_voxel;
    let end = inv_pose.transform_point(&cam_end).coords * one_over_voxel;

    let mut direction = end - start;
    let norm = direction.norm();
    if norm < 1e-6 {
        return miss;
    }
    direction /= norm;

    let mut point = start;

    let (mut sdf, mut hash_found) = scene.read_sdf(&point);
    let mut state = if !hash_found {
        RayState::SearchBlockCoarse
    } else if sdf <= 0.0 {
        RayState::WrongSide
    } else {
        RayState::SearchSurface
    };

    while state != RayState::BehindSurface {
        // Pick the next step length; entering or leaving allocated space
        // also moves the state machine.
        let step = if !hash_found {
            match state {
                RayState::SearchBlockCoarse => BLOCK_SIDE as f32,
                RayState::SearchBlockFine => step_scale,
                _ => {
                    state = RayState::SearchBlockCoarse;
                    BLOCK_SIDE as f32
                }
            }
        } else {
            match state {
                RayState::SearchBlockCoarse => {
                    state = RayState::SearchBlockFine;
                    step_scale - BLOCK_SIDE as f32
                }
                RayState::WrongSide => (sdf * step_scale).min(-1.0),
                RayState::SearchBlockFine => {
                    state = RayState::SearchSurface;
                    (sdf * step_scale).max(1.0)
                }
                _ => (sdf * step_scale).max(1.0),
            }
        };

        point += direction * step;
        total_length += step;
        if total_length > total_length_max {
            return miss;
        }

        let read = scene.read_sdf(&point);
        sdf = read.0;
        hash_found = read.1;
        if (-0.1..=0.0).contains(&sdf) {
            let refined = scene.read_sdf_interpolated(&point);
            sdf = refined.0;
            hash_found = refined.1;
        }

        if sdf <= 0.0 {
            state = if state == RayState::SearchBlockFine {
                RayState::WrongSide
            } else {
                RayState::BehindSurface
            };
        } else if state == RayState::WrongSide {
            state = RayState::SearchSurface;
        }
    }

    // One proportional back-step pins the zero crossing.
    point += direction * (sdf * step_scale);
    RaycastHit { point, found: true }
}

/// Surface normal and light angle at a raycast hit.
///
/// Returns `None` when the gradient degenerates or the surface faces
/// away from the light, matching the renderer's rejection rule.
pub fn normal_and_angle(
    scene: &VoxelBlockHash,
    point: &Vector3<f32>,
    light: &Vector3<f32>,
) -> Option<(Vector3<f32>, f32)> {
    let normal = scene.normal_from_sdf(point)?;
    let angle = normal.dot(light);
    if angle > 0.0 {
        Some((normal, angle))
    } else {
        None
    }
}

/// Grey shading from a light angle.
pub fn shade_grey(angle: f32) -> [u8; 4] {
    let v = ((0.8 * angle + 0.2) * 255.0) as u8;
    [v, v, v, 255]
}

/// Colour-mapped normal visualisation.
pub fn shade_normal(normal: &Vector3<f32>) -> [u8; 4] {
    [
        ((0.3 + (normal.x + 1.0) * 0.35) * 255.0) as u8,
        ((0.3 + (normal.y + 1.0) * 0.35) * 255.0) as u8,
        ((0.3 + (normal.z + 1.0) * 0.35) * 255.0) as u8,
        255,
    ]
}

/// Confidence shading from the integration weight under the hit.
pub fn shade_confidence(scene: &VoxelBlockHash, point: &Vector3<f32>, angle: f32) -> [u8; 4] {
    let weight = scene
        .voxel(
            point.x.round() as i32,
            point.y.round() as i32,
            point.z.round() as i32,
        )
        .map_or(0, |v| v.weight);
    let confidence = weight as f32 / u8::MAX as f32;
    let shade = 0.8 * angle + 0.2;
    [
        ((1.0 - confidence) * shade * 255.0) as u8,
        (confidence * shade * 255.0) as u8,
        0,
        255,
    ]
}

/// Volume-colour shading from the trilinear colour read.
pub fn shade_colour(scene: &VoxelBlockHash, point: &Vector3<f32>) -> [u8; 4] {
    match scene.read_colour_interpolated(point) {
        Some(c) => [
            (c.x * 255.0) as u8,
            (c.y * 255.0) as u8,
            (c.z * 255.0) as u8,
            255,
        ],
        None => [0, 0, 0, 255],
    }
}
