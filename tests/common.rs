//! Shared test rig: a synthetic wavy-wall world plus deterministic
//! doubles for the external collaborators (view builder, tracker,
//! mapper, relocalizer, solver).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nalgebra::{Translation3, UnitQuaternion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ghana_slam::core::view::{ImuMeasurement, View};
use ghana_slam::core::{DepthImage, ImageSize, Intrinsics, Pose, RawDepthImage, RgbaImage};
use ghana_slam::engine::{
    DenseMapper, GraphSolver, KeyframeId, RelocalizationHit, Relocalizer, RelocalizerResponse,
    ViewBuilder,
};
use ghana_slam::render::RenderState;
use ghana_slam::scene::{RelationConstraint, VoxelBlockHash};
use ghana_slam::tracking::{Tracker, TrackerResult, TrackingState};
use ghana_slam::{FrameResult, MultiMapConfig, MultiMapSlam};

/// Test image size, kept small so fusion stays cheap.
pub const TEST_SIZE: ImageSize = ImageSize {
    width: 64,
    height: 48,
};

/// Intrinsics matching [`TEST_SIZE`].
pub fn test_intrinsics() -> Intrinsics {
    Intrinsics::new(60.0, 60.0, 31.5, 23.5)
}

/// World-to-camera pose of a camera at `(x, 0, 0)` looking along +z.
pub fn camera_at(x: f32) -> Pose {
    Pose::from_parts(Translation3::new(-x, 0.0, 0.0), UnitQuaternion::identity())
}

/// Depth of the synthetic wavy wall at a world x coordinate.
fn wall_depth(x_world: f32) -> f32 {
    2.0 + 0.5 * (1.5 * x_world).sin()
}

/// Render the synthetic world as an RGB + raw-depth frame for a camera
/// at `(cam_x, 0, 0)`, with mild sensor noise.
///
/// The noise seed derives from the camera position, so revisiting a
/// place reproduces the same frame and descriptor distances stay
/// meaningful.
pub fn synthetic_frame(cam_x: f32) -> (RgbaImage, RawDepthImage) {
    let k = test_intrinsics();
    let mut rng = StdRng::seed_from_u64(cam_x.to_bits() as u64);
    let rgb = RgbaImage::filled(TEST_SIZE, [128, 128, 128, 255]);
    let mut raw = RawDepthImage::new(TEST_SIZE);
    for y in 0..TEST_SIZE.height {
        for x in 0..TEST_SIZE.width {
            let x_world = cam_x + (x as f32 - k.cx) / k.fx * 2.0;
            let depth = wall_depth(x_world) + rng.gen_range(-0.002..0.002);
            *raw.at_mut(x, y) = (depth * 1000.0) as u16;
        }
    }
    (rgb, raw)
}

/// View builder double: converts millimeter depth to meters.
pub struct MetricViewBuilder {
    intrinsics: Intrinsics,
}

impl MetricViewBuilder {
    pub fn new(intrinsics: Intrinsics) -> Self {
        Self { intrinsics }
    }
}

impl ViewBuilder for MetricViewBuilder {
    fn update_view(
        &mut self,
        view: &mut Option<View>,
        rgb: &RgbaImage,
        raw_depth: &RawDepthImage,
        _use_bilateral_filter: bool,
        imu: Option<ImuMeasurement>,
    ) {
        let size = raw_depth.size();
        let mut depth = DepthImage::new(size);
        for y in 0..size.height {
            for x in 0..size.width {
                *depth.at_mut(x, y) = raw_depth.at(x, y) as f32 / 1000.0;
            }
        }
        let mut built = View::new(rgb.clone(), depth, self.intrinsics);
        built.imu = imu;
        *view = Some(built);
    }
}

/// What the scripted tracker should do on its next calls.
#[derive(Debug, Clone)]
pub struct TrackerPlan {
    pub result: TrackerResult,
    pub pose: Option<Pose>,
}

/// Tracker double driven by a shared plan.
pub struct ScriptedTracker {
    plan: Arc<Mutex<TrackerPlan>>,
}

impl Tracker for ScriptedTracker {
    fn track(&mut self, state: &mut TrackingState, _view: &View, _reference: &RenderState) {
        let plan = self.plan.lock().unwrap();
        if let Some(pose) = plan.pose {
            state.pose = pose;
        }
        state.result = Some(plan.result);
    }
}

/// Dense mapper double: integrates a TSDF band along each sampled depth
/// ray and keeps the visible list in sync. Counts fusion calls.
pub struct BandFusionMapper {
    fusion_calls: Arc<AtomicUsize>,
}

impl BandFusionMapper {
    const PIXEL_STEP: usize = 2;
}

impl DenseMapper for BandFusionMapper {
    fn process_frame(
        &mut self,
        view: &View,
        tracking: &TrackingState,
        scene: &mut VoxelBlockHash,
        render: &mut RenderState,
    ) {
        self.fusion_calls.fetch_add(1, Ordering::SeqCst);

        let to_map = tracking.pose.inverse();
        let k = view.intrinsics;
        let voxel_size = scene.voxel_size();
        let mu = scene.mu();
        let size = view.depth.size();

        for y in (0..size.height).step_by(Self::PIXEL_STEP) {
            for x in (0..size.width).step_by(Self::PIXEL_STEP) {
                let depth = view.depth.at(x, y);
                if depth <= 0.0 {
                    continue;
                }
                // Write the truncation band around the surface sample.
                let mut offset = -mu;
                while offset <= mu {
                    let z = depth + offset;
                    let cam = k.back_project(x as f32, y as f32, z);
                    let map = to_map.transform_point(&cam);
                    let vx = (map.x / voxel_size).round() as i32;
                    let vy = (map.y / voxel_size).round() as i32;
                    let vz = (map.z / voxel_size).round() as i32;

                    let sdf = ((-offset) / mu).clamp(-1.0, 1.0);
                    let voxel = scene.voxel_mut(vx, vy, vz);
                    if voxel.weight == 0 {
                        voxel.sdf = sdf;
                    } else {
                        let w = voxel.weight as f32;
                        voxel.sdf = (voxel.sdf * w + sdf) / (w + 1.0);
                    }
                    voxel.weight = voxel.weight.saturating_add(1);
                    voxel.colour = [128, 128, 128];
                    voxel.colour_weight = voxel.colour_weight.saturating_add(1);

                    offset += voxel_size * 0.5;
                }
            }
        }

        render.visible_blocks = scene.allocated_blocks().collect();
    }

    fn update_visible_list(
        &mut self,
        _view: &View,
        _tracking: &TrackingState,
        scene: &mut VoxelBlockHash,
        render: &mut RenderState,
    ) {
        render.visible_blocks = scene.allocated_blocks().collect();
    }
}

/// Relocalizer double: nearest-neighbour over downsampled depth
/// signatures, harvesting a keyframe whenever a tracked frame sits far
/// enough from every stored one.
pub struct DepthGridRelocalizer {
    keyframes: Vec<(KeyframeId, Vec<f32>)>,
    harvest_threshold: f32,
    next_id: usize,
}

impl DepthGridRelocalizer {
    const GRID: usize = 8;

    pub fn new(harvest_threshold: f32) -> Self {
        Self {
            keyframes: Vec::new(),
            harvest_threshold,
            next_id: 0,
        }
    }

    fn signature(depth: &DepthImage) -> Vec<f32> {
        let size = depth.size();
        let mut sig = Vec::with_capacity(Self::GRID * Self::GRID);
        for gy in 0..Self::GRID {
            for gx in 0..Self::GRID {
                let x0 = gx * size.width / Self::GRID;
                let x1 = (gx + 1) * size.width / Self::GRID;
                let y0 = gy * size.height / Self::GRID;
                let y1 = (gy + 1) * size.height / Self::GRID;
                let mut sum = 0.0;
                let mut n = 0;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += depth.at(x, y);
                        n += 1;
                    }
                }
                sig.push(if n > 0 { sum / n as f32 } else { 0.0 });
            }
        }
        sig
    }

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        if n == 0 {
            return f32::INFINITY;
        }
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .sum::<f32>()
            / n as f32
    }
}

impl Relocalizer for DepthGridRelocalizer {
    fn process_frame(
        &mut self,
        depth: &DepthImage,
        num_neighbours: usize,
        primary_tracked: bool,
    ) -> RelocalizerResponse {
        let sig = Self::signature(depth);

        let mut hits: Vec<RelocalizationHit> = self
            .keyframes
            .iter()
            .map(|(id, stored)| RelocalizationHit {
                keyframe: *id,
                distance: Self::distance(&sig, stored),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(num_neighbours);

        let min_distance = hits
            .first()
            .map(|h| h.distance)
            .unwrap_or(f32::INFINITY);
        let new_keyframe = if primary_tracked && min_distance > self.harvest_threshold {
            let id = KeyframeId(self.next_id);
            self.next_id += 1;
            self.keyframes.push((id, sig));
            Some(id)
        } else {
            None
        };

        RelocalizerResponse {
            new_keyframe,
            neighbours: hits,
        }
    }
}

/// Graph solver double: anchors map 0 and walks the constraint graph
/// breadth-first. Counts solve invocations.
pub struct AnchoredBfsSolver {
    runs: Arc<AtomicUsize>,
}

impl GraphSolver for AnchoredBfsSolver {
    fn solve(
        &mut self,
        num_maps: usize,
        constraints: &[RelationConstraint],
    ) -> Vec<(usize, Pose)> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let mut poses: HashMap<usize, Pose> = HashMap::new();
        poses.insert(0, Pose::identity());
        let mut frontier = vec![0usize];
        while let Some(current) = frontier.pop() {
            let current_pose = poses[&current];
            for c in constraints {
                // x_to = T x_from, so P_from = P_to * T.
                if c.from == current && !poses.contains_key(&c.to) && c.to < num_maps {
                    poses.insert(c.to, current_pose * c.transform.inverse());
                    frontier.push(c.to);
                } else if c.to == current && !poses.contains_key(&c.from) && c.from < num_maps {
                    poses.insert(c.from, current_pose * c.transform);
                    frontier.push(c.from);
                }
            }
        }
        poses.into_iter().collect()
    }
}

/// A fully wired engine plus the handles the tests steer it with.
pub struct TestRig {
    pub slam: MultiMapSlam,
    pub plan: Arc<Mutex<TrackerPlan>>,
    pub fusion_calls: Arc<AtomicUsize>,
    pub solver_runs: Arc<AtomicUsize>,
}

impl TestRig {
    /// Build a rig over the default configuration, adjusted by `tweak`.
    pub fn new(tweak: impl FnOnce(&mut MultiMapConfig)) -> Self {
        let mut config = MultiMapConfig::default();
        // Coarser voxels keep the synthetic fusion light.
        config.scene.voxel_size = 0.02;
        config.scene.mu = 0.08;
        tweak(&mut config);

        let plan = Arc::new(Mutex::new(TrackerPlan {
            result: TrackerResult::Good,
            pose: None,
        }));
        let fusion_calls = Arc::new(AtomicUsize::new(0));
        let solver_runs = Arc::new(AtomicUsize::new(0));

        let slam = MultiMapSlam::new(
            config,
            TEST_SIZE,
            TEST_SIZE,
            Box::new(MetricViewBuilder::new(test_intrinsics())),
            Box::new(ScriptedTracker {
                plan: Arc::clone(&plan),
            }),
            Box::new(BandFusionMapper {
                fusion_calls: Arc::clone(&fusion_calls),
            }),
            Box::new(DepthGridRelocalizer::new(0.02)),
            Box::new(AnchoredBfsSolver {
                runs: Arc::clone(&solver_runs),
            }),
        )
        .expect("default test configuration must validate");

        Self {
            slam,
            plan,
            fusion_calls,
            solver_runs,
        }
    }

    /// Process one frame of the synthetic world from `(cam_x, 0, 0)`,
    /// with the tracker scripted to `result`.
    pub fn drive(&mut self, cam_x: f32, result: TrackerResult) -> FrameResult {
        {
            let mut plan = self.plan.lock().unwrap();
            plan.result = result;
            plan.pose = Some(camera_at(cam_x));
        }
        let (rgb, raw) = synthetic_frame(cam_x);
        self.slam.process_frame(&rgb, &raw, None)
    }

    pub fn fusion_count(&self) -> usize {
        self.fusion_calls.load(Ordering::SeqCst)
    }

    pub fn solver_run_count(&self) -> usize {
        self.solver_runs.load(Ordering::SeqCst)
    }
}
