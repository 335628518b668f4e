//! The local-map record.

use crate::config::SceneConfig;
use crate::core::image::ImageSize;
use crate::render::state::RenderState;
use crate::tracking::TrackingState;

use super::hash::VoxelBlockHash;

/// One volumetric submap with its own coordinate frame.
///
/// A local map owns its TSDF volume, the camera tracking state within
/// its frame, and the render-side caches the tracker and visualiser
/// work from. The [`SceneManager`](super::manager::SceneManager) is the
/// sole owner of every record; everything else refers to maps by index.
#[derive(Debug, Clone)]
pub struct LocalMap {
    /// The TSDF volume.
    pub scene: VoxelBlockHash,
    /// Camera tracking state in this map's frame.
    pub tracking: TrackingState,
    /// Render caches for this map.
    pub render: RenderState,
}

impl LocalMap {
    /// Create an empty local map for a given tracked-image size.
    pub fn new(config: &SceneConfig, tracked_size: ImageSize) -> Self {
        Self {
            scene: VoxelBlockHash::new(config),
            tracking: TrackingState::new(),
            render: RenderState::new(tracked_size),
        }
    }
}
