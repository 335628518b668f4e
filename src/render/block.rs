//! Rendering-block construction.
//!
//! Allocated voxel blocks are projected into a subsampled screen grid
//! and split into small tiles, each carrying the block's camera-space
//! depth range. Scattering those ranges into the expected-depth image
//! gives the ray-marcher a tight per-pixel search interval instead of
//! the full frustum.

use nalgebra::Point3;

use crate::core::camera::Intrinsics;
use crate::core::image::{Image, ImageSize};
use crate::core::pose::Pose;
use crate::scene::voxel::{BlockCoord, BLOCK_SIDE};

/// Rendering-block tile edge, in subsampled pixels.
pub const RENDERING_BLOCK_SIZE: usize = 16;

/// Hard cap on rendering blocks per frame.
pub const MAX_RENDERING_BLOCKS: usize = 262_144;

/// Subsampling factor of the expected-depth image.
pub const MINMAX_SUBSAMPLE: usize = 4;

/// Near clamp for depth ranges, meters.
pub const VERY_CLOSE: f32 = 0.05;

/// Depth value representing "nothing here", meters.
pub const FAR_AWAY: f32 = 999_999.9;

/// A screen-space tile with a shared depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderingBlock {
    /// Inclusive upper-left corner, subsampled pixels.
    pub upper_left: (i32, i32),
    /// Inclusive lower-right corner, subsampled pixels.
    pub lower_right: (i32, i32),
    /// Camera-space `(z_min, z_max)` of the source voxel block.
    pub z_range: (f32, f32),
}

/// Projection of one voxel block: bounding box in the subsampled image
/// plus depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBlock {
    /// Inclusive upper-left corner, subsampled pixels.
    pub upper_left: (i32, i32),
    /// Inclusive lower-right corner, subsampled pixels.
    pub lower_right: (i32, i32),
    /// Camera-space `(z_min, z_max)`.
    pub z_range: (f32, f32),
}

/// Project a voxel block's 8 corners through `pose` (world-to-camera)
/// and the intrinsics into the subsampled image.
///
/// Returns `None` when the block is entirely behind the near plane or
/// its bounding box misses the image.
pub fn project_block(
    block: BlockCoord,
    pose: &Pose,
    intrinsics: &Intrinsics,
    image_size: ImageSize,
    voxel_size: f32,
) -> Option<ProjectedBlock> {
    let sub_size = image_size.subsampled(MINMAX_SUBSAMPLE);
    let mut upper_left = (sub_size.width as i32 - 1, sub_size.height as i32 - 1);
    let mut lower_right = (-1, -1);
    let mut z_range = (FAR_AWAY, VERY_CLOSE);

    let block_edge = BLOCK_SIDE as f32 * voxel_size;
    for corner in 0..8 {
        let offset = (
            (corner & 1) as f32,
            ((corner >> 1) & 1) as f32,
            ((corner >> 2) & 1) as f32,
        );
        let world = Point3::new(
            (block.x as f32 + offset.0) * block_edge,
            (block.y as f32 + offset.1) * block_edge,
            (block.z as f32 + offset.2) * block_edge,
        );
        let camera = pose.transform_point(&world);
        let Some(pixel) = intrinsics.project(&camera) else {
            continue;
        };

        let sx = pixel.x / MINMAX_SUBSAMPLE as f32;
        let sy = pixel.y / MINMAX_SUBSAMPLE as f32;

        upper_left.0 = upper_left.0.min(sx.floor() as i32);
        upper_left.1 = upper_left.1.min(sy.floor() as i32);
        lower_right.0 = lower_right.0.max(sx.ceil() as i32);
        lower_right.1 = lower_right.1.max(sy.ceil() as i32);
        z_range.0 = z_range.0.min(camera.z);
        z_range.1 = z_range.1.max(camera.z);
    }

    // Respect image bounds, then reject degenerate boxes and blocks
    // entirely inside the near clamp.
    upper_left.0 = upper_left.0.max(0);
    upper_left.1 = upper_left.1.max(0);
    lower_right.0 = lower_right.0.min(sub_size.width as i32 - 1);
    lower_right.1 = lower_right.1.min(sub_size.height as i32 - 1);
    if upper_left.0 > lower_right.0 || upper_left.1 > lower_right.1 {
        return None;
    }
    if z_range.1 < VERY_CLOSE {
        return None;
    }
    z_range.0 = z_range.0.max(VERY_CLOSE);

    Some(ProjectedBlock {
        upper_left,
        lower_right,
        z_range,
    })
}

/// Split a projected block into 16x16 tiles and append them to `out`.
///
/// Emission stops silently at [`MAX_RENDERING_BLOCKS`]; the caller
/// degrades to a sparser expected-depth image.
pub fn create_rendering_blocks(out: &mut Vec<RenderingBlock>, projected: &ProjectedBlock) {
    let size = RENDERING_BLOCK_SIZE as i32;
    let width = projected.lower_right.0 - projected.upper_left.0 + 1;
    let height = projected.lower_right.1 - projected.upper_left.1 + 1;
    let tiles_x = (width + size - 1) / size;
    let tiles_y = (height + size - 1) / size;

    for by in 0..tiles_y {
        for bx in 0..tiles_x {
            if out.len() >= MAX_RENDERING_BLOCKS {
                return;
            }
            let upper_left = (
                projected.upper_left.0 + bx * size,
                projected.upper_left.1 + by * size,
            );
            let lower_right = (
                (upper_left.0 + size - 1).min(projected.lower_right.0),
                (upper_left.1 + size - 1).min(projected.lower_right.1),
            );
            out.push(RenderingBlock {
                upper_left,
                lower_right,
                z_range: projected.z_range,
            });
        }
    }
}

/// Scatter rendering-block depth ranges into the expected-depth image.
pub fn fill_expected_range(image: &mut Image<[f32; 2]>, blocks: &[RenderingBlock]) {
    let size = image.size();
    for block in blocks {
        for y in block.upper_left.1..=block.lower_right.1 {
            if y < 0 || y as usize >= size.height {
                continue;
            }
            for x in block.upper_left.0..=block.lower_right.0 {
                if x < 0 || x as usize >= size.width {
                    continue;
                }
                let pixel = image.at_mut(x as usize, y as usize);
                pixel[0] = pixel[0].min(block.z_range.0);
                pixel[1] = pixel[1].max(block.z_range.1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageSize;

    fn setup() -> (Pose, Intrinsics, ImageSize) {
        (
            Pose::identity(),
            Intrinsics::new(525.0, 525.0, 319.5, 239.5),
            ImageSize::new(640, 480),
        )
    }

    #[test]
    fn test_block_in_front_projects() {
        let (pose, k, size) = setup();
        // Block straddling the optical axis, one meter out.
        let block = BlockCoord::new(0, 0, 25); // 25 * 8 * 0.005 = 1.0m
        let projected =
            project_block(block, &pose, &k, size, 0.005).expect("block should project");

        assert!(projected.z_range.0 >= VERY_CLOSE);
        assert!(projected.z_range.1 >= projected.z_range.0);
        assert!(projected.upper_left.0 <= projected.lower_right.0);
    }

    #[test]
    fn test_block_behind_camera_is_rejected() {
        let (pose, k, size) = setup();
        let block = BlockCoord::new(0, 0, -30);
        assert!(project_block(block, &pose, &k, size, 0.005).is_none());
    }

    #[test]
    fn test_tiling_covers_bbox_and_respects_cap() {
        let projected = ProjectedBlock {
            upper_left: (0, 0),
            lower_right: (33, 17),
            z_range: (0.5, 1.5),
        };

        let mut out = Vec::new();
        create_rendering_blocks(&mut out, &projected);

        // 34x18 pixels -> 3x2 tiles of 16x16.
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|b| b.z_range == (0.5, 1.5)));
        assert!(out.iter().all(|b| b.lower_right.0 <= 33 && b.lower_right.1 <= 17));

        let mut capped = vec![
            RenderingBlock {
                upper_left: (0, 0),
                lower_right: (0, 0),
                z_range: (0.5, 1.5),
            };
            MAX_RENDERING_BLOCKS
        ];
        create_rendering_blocks(&mut capped, &projected);
        assert_eq!(capped.len(), MAX_RENDERING_BLOCKS);
    }

    #[test]
    fn test_fill_expected_range_takes_extremes() {
        let mut image: Image<[f32; 2]> =
            Image::filled(ImageSize::new(8, 8), [FAR_AWAY, VERY_CLOSE]);

        let blocks = [
            RenderingBlock {
                upper_left: (1, 1),
                lower_right: (2, 2),
                z_range: (1.0, 2.0),
            },
            RenderingBlock {
                upper_left: (2, 2),
                lower_right: (3, 3),
                z_range: (0.5, 1.2),
            },
        ];
        fill_expected_range(&mut image, &blocks);

        assert_eq!(image.at(1, 1), [1.0, 2.0]);
        assert_eq!(image.at(2, 2), [0.5, 2.0]);
        assert_eq!(image.at(5, 5), [FAR_AWAY, VERY_CLOSE]);
    }
}
