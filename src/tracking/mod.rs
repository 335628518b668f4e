//! Camera tracking state and the tracking controller.
//!
//! The tracker itself (ICP, photometric, or otherwise) is an external
//! collaborator behind the [`Tracker`] trait; this module owns the state
//! it reads and writes, and the controller that raycasts the reference
//! surface it aligns against.

use log::debug;

use crate::core::camera::Intrinsics;
use crate::core::image::ImageSize;
use crate::core::pose::Pose;
use crate::core::view::View;
use crate::render::engine::VisualisationEngine;
use crate::render::state::RenderState;
use crate::scene::hash::VoxelBlockHash;

/// Outcome of one tracking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerResult {
    /// Pose refined with high confidence; safe to fuse.
    Good,
    /// Pose refined but unreliable; fusion should be suppressed.
    Poor,
    /// Tracking lost; the pose update must be discarded.
    Failed,
}

/// Per-map camera tracking state.
#[derive(Debug, Clone)]
pub struct TrackingState {
    /// Current world-to-camera pose in this map's frame.
    pub pose: Pose,
    /// Frames since the reference raycast was refreshed.
    pub age: u32,
    /// Most recent tracking outcome, `None` before the first attempt.
    pub result: Option<TrackerResult>,
}

impl TrackingState {
    /// Fresh tracking state at the identity pose.
    pub fn new() -> Self {
        Self {
            pose: Pose::identity(),
            age: 0,
            result: None,
        }
    }

    /// Fresh tracking state at a given pose (relocalization hand-off).
    pub fn at_pose(pose: Pose) -> Self {
        Self {
            pose,
            age: 0,
            result: None,
        }
    }
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::new()
    }
}

/// The external camera tracker.
///
/// `track` refines `state.pose` against the view, using the ICP
/// reference maps in `reference`, and must set `state.result`.
pub trait Tracker {
    /// Align the view against the reference surface.
    fn track(&mut self, state: &mut TrackingState, view: &View, reference: &RenderState);
}

/// Sequences the per-map tracking work: the anchoring raycast before
/// tracking, and the tracker dispatch itself.
#[derive(Debug, Default)]
pub struct TrackingController;

impl TrackingController {
    /// Create a tracking controller.
    pub fn new() -> Self {
        Self
    }

    /// Image size the tracker operates on, given the frame's RGB and
    /// depth sizes. Depth drives dense tracking.
    pub fn tracked_image_size(&self, _rgb_size: ImageSize, depth_size: ImageSize) -> ImageSize {
        depth_size
    }

    /// Refresh the reference raycast for a map: rebuild the expected
    /// depths from the visible-block list, then raycast the ICP maps at
    /// the current pose.
    pub fn prepare(
        &self,
        state: &mut TrackingState,
        scene: &VoxelBlockHash,
        intrinsics: &Intrinsics,
        vis: &VisualisationEngine,
        render: &mut RenderState,
    ) {
        vis.create_expected_depths(scene, &state.pose, intrinsics, render);
        vis.create_icp_maps(scene, &state.pose, intrinsics, render);
        state.age = 0;
    }

    /// Run the tracker on one map.
    pub fn track(
        &self,
        tracker: &mut dyn Tracker,
        state: &mut TrackingState,
        view: &View,
        reference: &RenderState,
    ) -> TrackerResult {
        tracker.track(state, view, reference);
        state.age += 1;

        let result = state.result.unwrap_or(TrackerResult::Failed);
        if result == TrackerResult::Failed {
            debug!("tracker reported failure at age {}", state.age);
        }
        result
    }
}
