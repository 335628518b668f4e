//! Scene visualisation: expected-depth creation, full-image raycasts,
//! ICP reference maps, and shaded renderings of one or many maps.

use nalgebra::{Vector3, Vector4};

use crate::core::camera::Intrinsics;
use crate::core::image::{ImageSize, RgbaImage};
use crate::core::pose::Pose;
use crate::scene::hash::VoxelBlockHash;
use crate::scene::voxel::BlockCoord;

use super::block::{
    create_rendering_blocks, fill_expected_range, project_block, RenderingBlock, MINMAX_SUBSAMPLE,
};
use super::raycast::{self, cast_ray, RaycastHit};
use super::state::RenderState;

/// What a scene render colours its pixels with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    /// Grey shading from the surface angle.
    Shaded,
    /// Colour read from the volume.
    ColourFromVolume,
    /// Normal-vector visualisation.
    ColourFromNormal,
    /// Integration-weight visualisation.
    ColourFromConfidence,
}

/// Stateless renderer over voxel scenes.
#[derive(Debug, Default)]
pub struct VisualisationEngine;

impl VisualisationEngine {
    /// Create a visualisation engine.
    pub fn new() -> Self {
        Self
    }

    /// Blocks whose projection intersects the image from `pose`.
    pub fn find_visible_blocks(
        &self,
        scene: &VoxelBlockHash,
        pose: &Pose,
        intrinsics: &Intrinsics,
        image_size: ImageSize,
    ) -> Vec<BlockCoord> {
        scene
            .allocated_blocks()
            .filter(|&coord| {
                project_block(coord, pose, intrinsics, image_size, scene.voxel_size()).is_some()
            })
            .collect()
    }

    /// Rebuild the expected-depth image from the visible-block list.
    pub fn create_expected_depths(
        &self,
        scene: &VoxelBlockHash,
        pose: &Pose,
        intrinsics: &Intrinsics,
        state: &mut RenderState,
    ) {
        state.clear_expected_range();

        let image_size = state.image_size();
        let mut blocks: Vec<RenderingBlock> = Vec::new();
        for &coord in &state.visible_blocks {
            let Some(projected) =
                project_block(coord, pose, intrinsics, image_size, scene.voxel_size())
            else {
                continue;
            };
            create_rendering_blocks(&mut blocks, &projected);
        }

        fill_expected_range(&mut state.expected_range, &blocks);
    }

    /// Raycast every pixel, refreshing the cached raycast result.
    pub fn raycast(
        &self,
        scene: &VoxelBlockHash,
        pose: &Pose,
        intrinsics: &Intrinsics,
        state: &mut RenderState,
    ) {
        let inv_pose = pose.inverse();
        let size = state.image_size();

        for y in 0..size.height {
            for x in 0..size.width {
                let range = state
                    .expected_range
                    .at(x / MINMAX_SUBSAMPLE, y / MINMAX_SUBSAMPLE);
                let hit = cast_ray(scene, x, y, &inv_pose, intrinsics, range);
                *state.raycast_result.at_mut(x, y) = hit.to_vector();
            }
        }
        state.raycast_pose = Some(*pose);
    }

    /// Raycast and fill the ICP reference maps (points, normals, shaded
    /// image) consumed by the tracker.
    pub fn create_icp_maps(
        &self,
        scene: &VoxelBlockHash,
        pose: &Pose,
        intrinsics: &Intrinsics,
        state: &mut RenderState,
    ) {
        self.raycast(scene, pose, intrinsics, state);

        let light = Self::light_towards_camera(pose);
        let voxel_size = scene.voxel_size();
        let size = state.image_size();
        let miss = Vector4::new(0.0, 0.0, 0.0, -1.0);

        for y in 0..size.height {
            for x in 0..size.width {
                let cast = state.raycast_result.at(x, y);
                let hit = RaycastHit {
                    point: cast.xyz(),
                    found: cast.w > 0.0,
                };

                let surface = hit
                    .found
                    .then(|| raycast::normal_and_angle(scene, &hit.point, &light))
                    .flatten();

                match surface {
                    Some((normal, angle)) => {
                        *state.points_map.at_mut(x, y) = Vector4::new(
                            hit.point.x * voxel_size,
                            hit.point.y * voxel_size,
                            hit.point.z * voxel_size,
                            1.0,
                        );
                        *state.normals_map.at_mut(x, y) =
                            Vector4::new(normal.x, normal.y, normal.z, 0.0);
                        *state.raycast_image.at_mut(x, y) = raycast::shade_grey(angle);
                    }
                    None => {
                        *state.points_map.at_mut(x, y) = miss;
                        *state.normals_map.at_mut(x, y) = miss;
                        *state.raycast_image.at_mut(x, y) = [0, 0, 0, 255];
                    }
                }
            }
        }
    }

    /// Render one scene from an arbitrary pose into a fresh image.
    pub fn render_image(
        &self,
        scene: &VoxelBlockHash,
        pose: &Pose,
        intrinsics: &Intrinsics,
        image_size: ImageSize,
        source: RenderSource,
    ) -> RgbaImage {
        let mut state = RenderState::new(image_size);
        state.visible_blocks = self.find_visible_blocks(scene, pose, intrinsics, image_size);
        self.create_expected_depths(scene, pose, intrinsics, &mut state);
        self.raycast(scene, pose, intrinsics, &mut state);

        let mut out = RgbaImage::new(image_size);
        let light = Self::light_towards_camera(pose);
        for y in 0..image_size.height {
            for x in 0..image_size.width {
                let cast = state.raycast_result.at(x, y);
                if cast.w > 0.0 {
                    *out.at_mut(x, y) = Self::shade(scene, &cast.xyz(), &light, source);
                }
            }
        }
        out
    }

    /// Render several maps into one image, keeping the nearest surface
    /// per pixel. Each entry pairs a scene with the world-to-camera pose
    /// expressed in that scene's own frame.
    pub fn render_composite(
        &self,
        scenes: &[(&VoxelBlockHash, Pose)],
        intrinsics: &Intrinsics,
        image_size: ImageSize,
        source: RenderSource,
    ) -> RgbaImage {
        let mut out = RgbaImage::new(image_size);
        let mut best_depth = vec![f32::INFINITY; image_size.area()];

        for (scene, pose) in scenes {
            let mut state = RenderState::new(image_size);
            state.visible_blocks =
                self.find_visible_blocks(scene, pose, intrinsics, image_size);
            self.create_expected_depths(scene, pose, intrinsics, &mut state);
            self.raycast(scene, pose, intrinsics, &mut state);

            let light = Self::light_towards_camera(pose);
            let voxel_size = scene.voxel_size();
            for y in 0..image_size.height {
                for x in 0..image_size.width {
                    let cast = state.raycast_result.at(x, y);
                    if cast.w <= 0.0 {
                        continue;
                    }
                    let camera_point = pose.transform_point(
                        &nalgebra::Point3::from(cast.xyz() * voxel_size),
                    );
                    let idx = y * image_size.width + x;
                    if camera_point.z < best_depth[idx] {
                        best_depth[idx] = camera_point.z;
                        *out.at_mut(x, y) = Self::shade(scene, &cast.xyz(), &light, source);
                    }
                }
            }
        }
        out
    }

    fn shade(
        scene: &VoxelBlockHash,
        point: &Vector3<f32>,
        light: &Vector3<f32>,
        source: RenderSource,
    ) -> [u8; 4] {
        let Some((normal, angle)) = raycast::normal_and_angle(scene, point, light) else {
            return [0, 0, 0, 255];
        };
        match source {
            RenderSource::Shaded => raycast::shade_grey(angle),
            RenderSource::ColourFromVolume => raycast::shade_colour(scene, point),
            RenderSource::ColourFromNormal => raycast::shade_normal(&normal),
            RenderSource::ColourFromConfidence => {
                raycast::shade_confidence(scene, point, angle)
            }
        }
    }

    /// Light direction pointing from the scene toward the camera.
    fn light_towards_camera(pose: &Pose) -> Vector3<f32> {
        -(pose.inverse().rotation * Vector3::z())
    }
}
