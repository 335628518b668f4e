//! The multi-map SLAM coordinator.
//!
//! One call to [`MultiMapSlam::process_frame`] runs the whole per-frame
//! pipeline: view building, the todo-list walk over every active map
//! (tracking, fusion, visible-block update, raycast preparation), the
//! relocalizer query, candidate-link management, and the global
//! adjustment hand-off.
//!
//! The todo list is walked by index because it can grow mid-walk: links
//! accepted from relocalizer hits are appended to the current frame,
//! and a primary tracking failure truncates the remainder and appends a
//! fresh terminator, forcing one more relocalizer pass in the same
//! frame. At most one such extra pass happens per frame.

use log::{debug, warn};

use crate::config::{ConfigError, MultiMapConfig};
use crate::core::camera::Intrinsics;
use crate::core::image::{Image, ImageSize, RawDepthImage, RgbaImage};
use crate::core::pose::Pose;
use crate::core::view::{ImuMeasurement, View};
use crate::render::engine::{RenderSource, VisualisationEngine};
use crate::scene::local_map::LocalMap;
use crate::scene::manager::SceneManager;
use crate::tracking::{TrackerResult, TrackingController};

use super::active_maps::{ActiveMapManager, MapRole};
use super::global_adjust::GlobalAdjustmentDriver;
use super::interfaces::{DenseMapper, GraphSolver, Relocalizer, ViewBuilder};
use super::pose_db::PoseDatabase;

/// Visualisation surfaces the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputImage {
    /// The input colour image.
    OriginalRgb,
    /// The input depth, grey-mapped.
    OriginalDepth,
    /// Shaded raycast of the tracked map.
    SceneRaycast,
    /// Normal-coloured raycast of the tracked map.
    ColourFromNormal,
    /// Confidence-coloured raycast of the tracked map.
    ColourFromConfidence,
    /// Shaded free-camera render.
    FreeCameraShaded,
    /// Volume-coloured free-camera render.
    FreeCameraColourFromVolume,
    /// Normal-coloured free-camera render.
    FreeCameraColourFromNormal,
    /// Confidence-coloured free-camera render.
    FreeCameraColourFromConfidence,
    /// No visualisation.
    Unknown,
}

/// One step of the per-frame todo list. `data_id == None` is the
/// terminator that triggers the relocalizer pass.
#[derive(Debug, Clone, Copy)]
struct TodoItem {
    data_id: Option<usize>,
    track: bool,
    fuse: bool,
    prepare: bool,
    preprepare: bool,
}

impl TodoItem {
    fn work(data_id: usize, track: bool, fuse: bool, prepare: bool) -> Self {
        Self {
            data_id: Some(data_id),
            track,
            fuse,
            prepare,
            preprepare: false,
        }
    }

    fn terminator() -> Self {
        Self {
            data_id: None,
            track: false,
            fuse: false,
            prepare: false,
            preprepare: false,
        }
    }
}

/// Summary of one processed frame.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    /// The primary map after the frame, if any.
    pub primary_scene: Option<usize>,
    /// Tracking outcome on the primary, if it was tracked.
    pub primary_result: Option<TrackerResult>,
    /// Candidate links opened this frame.
    pub links_opened: usize,
    /// Whether a new local map was spawned.
    pub new_map_started: bool,
    /// Whether an inter-map edge was committed.
    pub edge_established: bool,
    /// Whether a global-adjustment solve was started.
    pub adjustment_started: bool,
}

/// Engine status snapshot.
#[derive(Debug, Clone)]
pub struct MultiMapStatus {
    /// Number of local maps.
    pub num_scenes: usize,
    /// Number of committed inter-map relations.
    pub num_relations: usize,
    /// Current primary map, if any.
    pub primary_scene: Option<usize>,
    /// Live active-map entries.
    pub num_active_entries: usize,
    /// Frames processed since construction or reset.
    pub frames_processed: u64,
}

/// The multi-map dense SLAM engine.
pub struct MultiMapSlam {
    config: MultiMapConfig,

    scenes: SceneManager,
    active: ActiveMapManager,
    pose_db: PoseDatabase,
    adjustment: GlobalAdjustmentDriver,

    vis: VisualisationEngine,
    controller: TrackingController,

    view_builder: Box<dyn ViewBuilder>,
    tracker: Box<dyn crate::tracking::Tracker>,
    mapper: Box<dyn DenseMapper>,
    relocalizer: Box<dyn Relocalizer>,

    view: Option<View>,
    intrinsics: Intrinsics,

    freeview_pose: Pose,
    freeview_scene: Option<usize>,

    schedule_adjustment: bool,
    frames_processed: u64,
}

impl MultiMapSlam {
    /// Build the engine around its external collaborators. Local map 0
    /// is created immediately and starts as the primary.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MultiMapConfig,
        rgb_size: ImageSize,
        depth_size: ImageSize,
        view_builder: Box<dyn ViewBuilder>,
        tracker: Box<dyn crate::tracking::Tracker>,
        mapper: Box<dyn DenseMapper>,
        relocalizer: Box<dyn Relocalizer>,
        solver: Box<dyn GraphSolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let controller = TrackingController::new();
        let tracked_size = controller.tracked_image_size(rgb_size, depth_size);

        let mut scenes = SceneManager::new(config.scene.clone(), tracked_size);
        let mut active = ActiveMapManager::new(config.active.clone());
        active.initiate_new_scene(&mut scenes, true, None);

        let adjustment = if config.adjustment.run_in_background {
            GlobalAdjustmentDriver::new_background(solver)
        } else {
            GlobalAdjustmentDriver::new_inline(solver)
        };

        Ok(Self {
            config,
            scenes,
            active,
            pose_db: PoseDatabase::new(),
            adjustment,
            vis: VisualisationEngine::new(),
            controller,
            view_builder,
            tracker,
            mapper,
            relocalizer,
            view: None,
            intrinsics: Intrinsics::default(),
            freeview_pose: Pose::identity(),
            freeview_scene: Some(0),
            schedule_adjustment: false,
            frames_processed: 0,
        })
    }

    /// The scene collection.
    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    /// The active-map state machine.
    pub fn active_maps(&self) -> &ActiveMapManager {
        &self.active
    }

    /// The keyframe pose database.
    pub fn pose_database(&self) -> &PoseDatabase {
        &self.pose_db
    }

    /// Current status snapshot.
    pub fn status(&self) -> MultiMapStatus {
        MultiMapStatus {
            num_scenes: self.scenes.num_scenes(),
            num_relations: self.scenes.num_relations(),
            primary_scene: self.active.primary_scene_idx(),
            num_active_entries: self.active.entries().iter().filter(|e| e.is_live()).count(),
            frames_processed: self.frames_processed,
        }
    }

    /// Process one synchronized RGB + depth frame.
    ///
    /// Never fails: tracker, relocalizer, and optimizer setbacks degrade
    /// to "no progress this frame" and are reported in the result.
    pub fn process_frame(
        &mut self,
        rgb: &RgbaImage,
        raw_depth: &RawDepthImage,
        imu: Option<ImuMeasurement>,
    ) -> FrameResult {
        self.view_builder.update_view(
            &mut self.view,
            rgb,
            raw_depth,
            self.config.use_bilateral_filter,
            imu,
        );
        let Some(view) = self.view.take() else {
            warn!("view builder produced no view; skipping frame");
            return FrameResult::default();
        };
        self.intrinsics = view.intrinsics;

        let mut result = FrameResult::default();

        // Steps 2-4: primary first, then the other live entries, then
        // the terminator.
        let mut todo: Vec<TodoItem> = Vec::new();
        let mut primary_data = self.active.primary_data_idx();
        if let Some(data) = primary_data {
            todo.push(TodoItem::work(data, true, true, true));
        }
        for (data, entry) in self.active.entries().iter().enumerate() {
            if !entry.is_live() || Some(data) == primary_data {
                continue;
            }
            todo.push(TodoItem::work(data, true, entry.role == MapRole::New, true));
        }
        todo.push(TodoItem::terminator());

        // Step 5: walk the list; it may grow while we walk it.
        let mut primary_tracked_good = false;
        let mut truncated_after_failure = false;
        let mut i = 0;
        while i < todo.len() {
            let item = todo[i];
            let Some(data_id) = item.data_id else {
                self.run_relocalizer(
                    &view,
                    &mut todo,
                    primary_data,
                    primary_tracked_good,
                    &mut result,
                );
                i += 1;
                continue;
            };

            let scene_idx = self.active.scene_of(data_id);
            if item.preprepare {
                self.update_visible(&view, scene_idx);
                self.prepare_map(&view, scene_idx);
            }

            let mut fuse = item.fuse;
            let mut prepare = item.prepare;

            if item.track {
                let is_primary = Some(data_id) == primary_data;
                let outcome = self.track_map(&view, scene_idx, is_primary);

                if outcome != TrackerResult::Good {
                    fuse = false;
                }
                if outcome == TrackerResult::Failed {
                    prepare = false;
                }
                if is_primary {
                    primary_tracked_good = outcome == TrackerResult::Good;
                    result.primary_result = Some(outcome);
                    if outcome == TrackerResult::Failed {
                        primary_data = None;
                        if !truncated_after_failure {
                            // Force an immediate second relocalizer pass
                            // within this frame.
                            truncated_after_failure = true;
                            todo.truncate(i + 1);
                            todo.push(TodoItem::terminator());
                        }
                    }
                }
                self.active.record_tracking_result(
                    &self.scenes,
                    data_id,
                    outcome,
                    primary_tracked_good,
                );
            }

            if fuse {
                self.fuse_map(&view, scene_idx);
            } else if prepare {
                self.update_visible(&view, scene_idx);
            }
            if prepare {
                self.prepare_map(&view, scene_idx);
            }

            i += 1;
        }

        // Spawn a fresh map once the primary outgrows its block budget.
        if let Some(p_scene) = primary_data.map(|d| self.active.scene_of(d)) {
            if primary_tracked_good
                && !self.active.has_new_entry()
                && self.scenes.get(p_scene).scene.num_blocks()
                    > self.config.active.max_blocks_per_map
            {
                debug!("primary map {p_scene} is over its block budget");
                result.new_map_started = self.start_new_local_map().is_some();
            }
        }

        // Steps 6-8: lifecycle maintenance, then the adjustment hand-off.
        let established = self.active.maintain_active_data(&mut self.scenes);
        result.edge_established = established;
        self.schedule_adjustment |= established;

        if self.schedule_adjustment && self.adjustment.update_measurements(&self.scenes) {
            self.adjustment.wakeup();
            self.schedule_adjustment = false;
            result.adjustment_started = true;
        }
        self.adjustment.retrieve_new_estimates(&mut self.scenes);

        result.primary_scene = self.active.primary_scene_idx();
        self.frames_processed += 1;
        self.view = Some(view);
        result
    }

    /// Start a fresh local map at the current camera pose, linked to
    /// the primary.
    ///
    /// The relation between the two maps is exactly known at this
    /// moment: the new map's frame is the primary's current camera
    /// pose. Returns the new map's index, or `None` without a tracked
    /// primary to hand over from.
    pub fn start_new_local_map(&mut self) -> Option<usize> {
        let p_scene = self.active.primary_scene_idx()?;
        let data = self
            .active
            .initiate_new_scene(&mut self.scenes, false, Some(p_scene));
        let new_scene = self.active.scene_of(data);
        let to_primary = self.scenes.get(p_scene).tracking.pose.inverse();
        self.scenes
            .set_relation(new_scene, p_scene, &to_primary, self.config.active.n_overlap);
        debug!("spawned local map {new_scene} off primary {p_scene}");
        Some(new_scene)
    }

    /// Run the relocalizer on the current depth and act on its output:
    /// store a keyframe for a tracked primary, or open candidate links
    /// toward the returned neighbours.
    fn run_relocalizer(
        &mut self,
        view: &View,
        todo: &mut Vec<TodoItem>,
        primary_data: Option<usize>,
        primary_tracked: bool,
        result: &mut FrameResult,
    ) {
        let response = self.relocalizer.process_frame(
            &view.depth,
            self.config.relocalization.num_neighbours,
            primary_tracked,
        );

        let primary_scene = primary_data.map(|d| self.active.scene_of(d));
        if let (Some(id), Some(p_scene)) = (response.new_keyframe, primary_scene) {
            let pose = self.scenes.get(p_scene).tracking.pose;
            self.pose_db.store_pose(id, pose, p_scene);
            return;
        }

        for hit in &response.neighbours {
            if hit.distance > self.config.relocalization.max_link_distance {
                continue;
            }
            let Some(entry) = self.pose_db.retrieve_pose(hit.keyframe) else {
                continue;
            };
            let accepted = self.active.initiate_new_link(
                &mut self.scenes,
                entry.scene,
                entry.pose,
                primary_scene.is_none(),
            );
            if let Some(data) = accepted {
                let mut item = TodoItem::work(data, true, false, true);
                item.preprepare = true;
                todo.push(item);
                result.links_opened += 1;
            }
        }
    }

    /// Track one map, with the non-primary POOR downgrade and the
    /// FAILED pose rollback.
    fn track_map(&mut self, view: &View, scene_idx: usize, is_primary: bool) -> TrackerResult {
        let map = self.scenes.get_mut(scene_idx);

        // A map with no content yet has nothing to track against; it
        // bootstraps from its creation pose.
        if map.scene.num_blocks() == 0 && map.render.raycast_pose.is_none() {
            map.tracking.result = Some(TrackerResult::Good);
            return TrackerResult::Good;
        }

        let old_pose = map.tracking.pose;
        let LocalMap {
            tracking, render, ..
        } = map;
        let mut outcome = self
            .controller
            .track(self.tracker.as_mut(), tracking, view, render);

        if !is_primary && outcome == TrackerResult::Poor {
            outcome = TrackerResult::Failed;
            tracking.result = Some(TrackerResult::Failed);
        }
        if outcome == TrackerResult::Failed {
            tracking.pose = old_pose;
        }
        outcome
    }

    fn fuse_map(&mut self, view: &View, scene_idx: usize) {
        let LocalMap {
            scene,
            tracking,
            render,
            ..
        } = self.scenes.get_mut(scene_idx);
        self.mapper.process_frame(view, tracking, scene, render);
    }

    fn update_visible(&mut self, view: &View, scene_idx: usize) {
        let LocalMap {
            scene,
            tracking,
            render,
            ..
        } = self.scenes.get_mut(scene_idx);
        self.mapper.update_visible_list(view, tracking, scene, render);
    }

    fn prepare_map(&mut self, view: &View, scene_idx: usize) {
        let LocalMap {
            scene,
            tracking,
            render,
            ..
        } = self.scenes.get_mut(scene_idx);
        self.controller
            .prepare(tracking, scene, &view.intrinsics, &self.vis, render);
    }

    /// The free-camera pose, expressed in the free-view map's frame.
    pub fn freeview_pose(&self) -> Pose {
        self.freeview_pose
    }

    /// Set the free-camera pose.
    pub fn set_freeview_pose(&mut self, pose: Pose) {
        self.freeview_pose = pose;
    }

    /// The map the free camera is anchored to; `None` composites every
    /// map.
    pub fn freeview_scene(&self) -> Option<usize> {
        self.freeview_scene
    }

    /// Re-anchor the free camera to another map, post-multiplying the
    /// pose by the inverse relative transform so the rendered geometry
    /// stays put.
    pub fn change_freeview_scene(&mut self, new_scene: Option<usize>) {
        let transform = match (self.freeview_scene, new_scene) {
            (Some(from), Some(to)) => self.scenes.find_transform(from, to),
            _ => Pose::identity(),
        };
        self.freeview_pose *= transform.inverse();
        self.freeview_scene = new_scene;
    }

    /// Render a visualisation surface.
    pub fn get_image(&self, kind: OutputImage) -> RgbaImage {
        let size = self.scenes.tracked_size();
        match kind {
            OutputImage::OriginalRgb => self
                .view
                .as_ref()
                .map(|v| v.rgb.clone())
                .unwrap_or_else(|| RgbaImage::new(size)),
            OutputImage::OriginalDepth => self
                .view
                .as_ref()
                .map(|v| depth_to_grey(&v.depth))
                .unwrap_or_else(|| RgbaImage::new(size)),
            OutputImage::SceneRaycast => self.render_tracked(RenderSource::Shaded),
            OutputImage::ColourFromNormal => self.render_tracked(RenderSource::ColourFromNormal),
            OutputImage::ColourFromConfidence => {
                self.render_tracked(RenderSource::ColourFromConfidence)
            }
            OutputImage::FreeCameraShaded => self.render_freeview(RenderSource::Shaded),
            OutputImage::FreeCameraColourFromVolume => {
                self.render_freeview(RenderSource::ColourFromVolume)
            }
            OutputImage::FreeCameraColourFromNormal => {
                self.render_freeview(RenderSource::ColourFromNormal)
            }
            OutputImage::FreeCameraColourFromConfidence => {
                self.render_freeview(RenderSource::ColourFromConfidence)
            }
            OutputImage::Unknown => RgbaImage::new(size),
        }
    }

    fn render_tracked(&self, source: RenderSource) -> RgbaImage {
        let scene_idx = self.active.best_visualisation_scene_idx();
        let map = self.scenes.get(scene_idx);
        self.vis.render_image(
            &map.scene,
            &map.tracking.pose,
            &self.intrinsics,
            self.scenes.tracked_size(),
            source,
        )
    }

    fn render_freeview(&self, source: RenderSource) -> RgbaImage {
        let size = self.scenes.tracked_size();
        match self.freeview_scene {
            Some(idx) => self.vis.render_image(
                &self.scenes.get(idx).scene,
                &self.freeview_pose,
                &self.intrinsics,
                size,
                source,
            ),
            None => {
                // Composite every map, anchoring the pose in map 0's
                // frame.
                let mut per_scene = Vec::with_capacity(self.scenes.num_scenes());
                for idx in 0..self.scenes.num_scenes() {
                    let pose = self.freeview_pose * self.scenes.find_transform(idx, 0);
                    per_scene.push((&self.scenes.get(idx).scene, pose));
                }
                self.vis
                    .render_composite(&per_scene, &self.intrinsics, size, source)
            }
        }
    }

    /// Discard all maps and state, recreating the bootstrap primary.
    pub fn reset(&mut self) {
        let tracked_size = self.scenes.tracked_size();
        self.scenes = SceneManager::new(self.config.scene.clone(), tracked_size);
        self.active = ActiveMapManager::new(self.config.active.clone());
        self.active.initiate_new_scene(&mut self.scenes, true, None);
        self.pose_db = PoseDatabase::new();
        self.view = None;
        self.freeview_pose = Pose::identity();
        self.freeview_scene = Some(0);
        self.schedule_adjustment = false;
        self.frames_processed = 0;
    }
}

/// Grey-map a depth image for display.
fn depth_to_grey(depth: &Image<f32>) -> RgbaImage {
    const MAX_DISPLAY_DEPTH: f32 = 4.0;
    let size = depth.size();
    let mut out = RgbaImage::new(size);
    for y in 0..size.height {
        for x in 0..size.width {
            let d = depth.at(x, y);
            if d > 0.0 {
                let v = ((1.0 - (d / MAX_DISPLAY_DEPTH).min(1.0)) * 255.0) as u8;
                *out.at_mut(x, y) = [v, v, v, 255];
            }
        }
    }
    out
}
