//! Per-map render caches.

use nalgebra::Vector4;

use crate::core::image::{Image, ImageSize, RgbaImage};
use crate::core::pose::Pose;
use crate::scene::voxel::BlockCoord;

use super::block::{FAR_AWAY, MINMAX_SUBSAMPLE, VERY_CLOSE};

/// Render-side state of one local map: the expected-depth image that
/// accelerates raycasting, the cached raycast, the ICP reference maps
/// the tracker aligns against, and the visible-block list maintained by
/// the mapper.
#[derive(Debug, Clone)]
pub struct RenderState {
    /// Per-pixel `(z_min, z_max)` search range, at [`MINMAX_SUBSAMPLE`]
    /// resolution.
    pub expected_range: Image<[f32; 2]>,

    /// Last raycast: voxel-space surface point per pixel, `w > 0` where
    /// a surface was found.
    pub raycast_result: Image<Vector4<f32>>,

    /// Shaded rendering of the last raycast.
    pub raycast_image: RgbaImage,

    /// ICP reference points in meters, `w = -1` where invalid.
    pub points_map: Image<Vector4<f32>>,

    /// ICP reference normals, `w = -1` where invalid.
    pub normals_map: Image<Vector4<f32>>,

    /// Blocks currently visible from the tracked pose.
    pub visible_blocks: Vec<BlockCoord>,

    /// Pose at which `raycast_result` was generated, if any.
    pub raycast_pose: Option<Pose>,
}

impl RenderState {
    /// Allocate render state for a tracked-image size.
    pub fn new(size: ImageSize) -> Self {
        let miss = Vector4::new(0.0, 0.0, 0.0, -1.0);
        Self {
            expected_range: Image::filled(
                size.subsampled(MINMAX_SUBSAMPLE),
                [FAR_AWAY, VERY_CLOSE],
            ),
            raycast_result: Image::filled(size, Vector4::zeros()),
            raycast_image: Image::new(size),
            points_map: Image::filled(size, miss),
            normals_map: Image::filled(size, miss),
            visible_blocks: Vec::new(),
            raycast_pose: None,
        }
    }

    /// Tracked-image size this state serves.
    pub fn image_size(&self) -> ImageSize {
        self.raycast_result.size()
    }

    /// Reset the expected-range image to the empty `(far, close)` state.
    pub fn clear_expected_range(&mut self) {
        self.expected_range.fill([FAR_AWAY, VERY_CLOSE]);
    }
}
