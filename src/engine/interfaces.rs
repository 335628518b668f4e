//! External collaborator contracts.
//!
//! The coordinator orchestrates these but does not implement them: image
//! preprocessing, the camera tracker, voxel fusion, descriptor-based
//! relocalization, and the nonlinear graph solver all live behind
//! traits. The test suite ships deterministic doubles.

use crate::core::image::{DepthImage, RawDepthImage, RgbaImage};
use crate::core::pose::Pose;
use crate::core::view::{ImuMeasurement, View};
use crate::render::state::RenderState;
use crate::scene::hash::VoxelBlockHash;
use crate::scene::relation::RelationConstraint;
use crate::tracking::TrackingState;

use super::pose_db::KeyframeId;

/// Builds and refreshes the per-frame [`View`] from raw sensor images.
///
/// May allocate the view on first call; afterwards it reuses the
/// buffers in place.
pub trait ViewBuilder {
    /// Convert raw images into the tracked view.
    fn update_view(
        &mut self,
        view: &mut Option<View>,
        rgb: &RgbaImage,
        raw_depth: &RawDepthImage,
        use_bilateral_filter: bool,
        imu: Option<ImuMeasurement>,
    );
}

/// Fuses views into a map's TSDF volume.
pub trait DenseMapper {
    /// Allocate and integrate the view at the tracked pose.
    fn process_frame(
        &mut self,
        view: &View,
        tracking: &TrackingState,
        scene: &mut VoxelBlockHash,
        render: &mut RenderState,
    );

    /// Refresh the visible-block list without integrating.
    fn update_visible_list(
        &mut self,
        view: &View,
        tracking: &TrackingState,
        scene: &mut VoxelBlockHash,
        render: &mut RenderState,
    );
}

/// One nearest-neighbour keyframe returned by the relocalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelocalizationHit {
    /// Matched keyframe.
    pub keyframe: KeyframeId,
    /// Descriptor distance; smaller is closer.
    pub distance: f32,
}

/// Relocalizer output for one frame.
#[derive(Debug, Clone, Default)]
pub struct RelocalizerResponse {
    /// Id assigned to this frame if the relocalizer kept it as a new
    /// keyframe.
    pub new_keyframe: Option<KeyframeId>,
    /// Up to `k` nearest stored keyframes with distances.
    pub neighbours: Vec<RelocalizationHit>,
}

/// Image-descriptor keyframe index.
pub trait Relocalizer {
    /// Process one depth frame: possibly store it as a new keyframe,
    /// and return the nearest stored neighbours.
    ///
    /// `primary_tracked` tells the index whether the frame comes from a
    /// confidently tracked pose and is therefore worth keeping.
    fn process_frame(
        &mut self,
        depth: &DepthImage,
        num_neighbours: usize,
        primary_tracked: bool,
    ) -> RelocalizerResponse;
}

/// Nonlinear least-squares solver over the inter-map constraint graph.
///
/// Implementations receive the committed constraints and return one
/// global pose per map index mentioned; the driver folds those back
/// into pairwise edges.
pub trait GraphSolver: Send {
    /// Solve for per-map global poses.
    fn solve(&mut self, num_maps: usize, constraints: &[RelationConstraint])
        -> Vec<(usize, Pose)>;
}
