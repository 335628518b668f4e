//! The active-map state machine.
//!
//! Every submap the pipeline currently works on is represented by an
//! entry pairing the map index with a role:
//!
//! - `Primary`: the map being tracked and fused. Unique, and absent
//!   only between a primary tracking failure and the promotion of a
//!   relocalization candidate.
//! - `New`: a freshly spawned map still proving itself; fused like the
//!   primary.
//! - `LoopClosure`: an existing map the relocalizer suggested overlaps
//!   the primary; tracked to accumulate an inter-map constraint.
//! - `Relocalization`: an existing map the camera may have returned to
//!   after tracking failure; tracked to win back the primary role.
//!
//! Candidates live inside a bounded trial window. They either graduate
//! (edge committed, possibly promoted) or retire.

use log::{debug, info, warn};

use crate::config::ActiveMapConfig;
use crate::core::pose::Pose;
use crate::scene::manager::SceneManager;
use crate::scene::relation::MapRelation;
use crate::tracking::{TrackerResult, TrackingState};

/// Role of an active-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRole {
    /// The tracked-and-fused map.
    Primary,
    /// A freshly spawned map.
    New,
    /// A loop-closure candidate.
    LoopClosure,
    /// A relocalization candidate.
    Relocalization,
}

/// One active-map record.
#[derive(Debug)]
pub struct ActiveEntry {
    /// Index of the map in the scene manager.
    pub scene: usize,
    /// Current role.
    pub role: MapRole,
    /// Accumulated constraint toward `target`.
    constraint: MapRelation,
    /// The primary map the constraint is measured against.
    target: Option<usize>,
    /// Frames this entry tracked with a GOOD result.
    good_frames: usize,
    /// Frames since the entry was created.
    frames: usize,
    /// Marked for removal at the next maintenance pass.
    retired: bool,
}

impl ActiveEntry {
    fn new(scene: usize, role: MapRole, target: Option<usize>) -> Self {
        Self {
            scene,
            role,
            constraint: MapRelation::new(),
            target,
            good_frames: 0,
            frames: 0,
            retired: false,
        }
    }

    /// Whether this entry still participates in the per-frame walk.
    pub fn is_live(&self) -> bool {
        !self.retired
    }
}

/// State machine over the set of active submaps.
#[derive(Debug)]
pub struct ActiveMapManager {
    entries: Vec<ActiveEntry>,
    config: ActiveMapConfig,
}

impl ActiveMapManager {
    /// Create an empty manager.
    pub fn new(config: ActiveMapConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ActiveMapConfig {
        &self.config
    }

    /// All entries, live and retired. Entry indices are the data ids
    /// used by the per-frame todo list; they stay valid within a frame
    /// and are compacted by [`maintain_active_data`](Self::maintain_active_data).
    pub fn entries(&self) -> &[ActiveEntry] {
        &self.entries
    }

    /// Map index of an entry.
    pub fn scene_of(&self, data_id: usize) -> usize {
        self.entries[data_id].scene
    }

    /// Role of an entry.
    pub fn role_of(&self, data_id: usize) -> MapRole {
        self.entries[data_id].role
    }

    /// Data id of the live primary entry, if one exists.
    pub fn primary_data_idx(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.role == MapRole::Primary && e.is_live())
    }

    /// Map index of the live primary, if one exists.
    pub fn primary_scene_idx(&self) -> Option<usize> {
        self.primary_data_idx().map(|idx| self.entries[idx].scene)
    }

    /// Whether a NEW map is currently proving itself.
    pub fn has_new_entry(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.role == MapRole::New && e.is_live())
    }

    /// The map best suited for visualisation: the primary if present,
    /// otherwise the strongest relocalization candidate, otherwise the
    /// bootstrap map.
    pub fn best_visualisation_scene_idx(&self) -> usize {
        if let Some(scene) = self.primary_scene_idx() {
            return scene;
        }
        self.entries
            .iter()
            .filter(|e| e.role == MapRole::Relocalization && e.is_live())
            .max_by_key(|e| e.good_frames)
            .map(|e| e.scene)
            .unwrap_or(0)
    }

    /// Create a brand-new local map and register it as `Primary` (the
    /// bootstrap call) or `New`. For non-primary maps, `link_to` names
    /// the map whose hand-over the new map is for.
    pub fn initiate_new_scene(
        &mut self,
        scenes: &mut SceneManager,
        primary: bool,
        link_to: Option<usize>,
    ) -> usize {
        let scene = scenes.new_scene();
        let role = if primary { MapRole::Primary } else { MapRole::New };
        debug!("local map {scene} enters as {role:?}");
        self.entries.push(ActiveEntry::new(scene, role, link_to));
        self.entries.len() - 1
    }

    /// Open a candidate link to an existing map at a relocalizer-provided
    /// pose.
    ///
    /// The role is `Relocalization` when no primary exists and
    /// `make_primary_if_none` is set, `LoopClosure` otherwise. Duplicate
    /// `(map, role)` pairs and links to the primary's own map are
    /// rejected.
    pub fn initiate_new_link(
        &mut self,
        scenes: &mut SceneManager,
        scene: usize,
        pose: Pose,
        make_primary_if_none: bool,
    ) -> Option<usize> {
        let primary_scene = self.primary_scene_idx();
        let role = if primary_scene.is_none() && make_primary_if_none {
            MapRole::Relocalization
        } else {
            MapRole::LoopClosure
        };

        if primary_scene == Some(scene) {
            return None;
        }
        if self
            .entries
            .iter()
            .any(|e| e.is_live() && e.scene == scene && e.role == role)
        {
            return None;
        }

        scenes.get_mut(scene).tracking = TrackingState::at_pose(pose);
        info!("opening {role:?} candidate on map {scene}");
        self.entries.push(ActiveEntry::new(scene, role, None));
        Some(self.entries.len() - 1)
    }

    /// Record one frame's tracking outcome for an entry.
    ///
    /// For candidates that tracked GOOD while the primary also tracked,
    /// one relative-transform sample is accumulated toward the eventual
    /// inter-map edge.
    pub fn record_tracking_result(
        &mut self,
        scenes: &SceneManager,
        data_id: usize,
        result: TrackerResult,
        primary_tracked: bool,
    ) {
        let primary_scene = self.primary_scene_idx();
        let entry = &mut self.entries[data_id];
        entry.frames += 1;

        match entry.role {
            MapRole::Primary => {
                if result == TrackerResult::Failed {
                    warn!("primary map {} lost tracking", entry.scene);
                    entry.retired = true;
                }
            }
            MapRole::New | MapRole::LoopClosure | MapRole::Relocalization => {
                if result != TrackerResult::Good {
                    return;
                }
                entry.good_frames += 1;

                let accumulates = entry.role != MapRole::New
                    || self.config.new_maps_track_as_candidates;
                let Some(p_scene) = primary_scene else {
                    return;
                };
                if !primary_tracked || !accumulates || p_scene == entry.scene {
                    return;
                }
                if *entry.target.get_or_insert(p_scene) != p_scene {
                    // The primary changed mid-trial; samples against the
                    // old target no longer compose.
                    return;
                }

                // Both maps saw the same camera this frame, so the
                // relative transform candidate->primary is observable.
                let sample = scenes.get(p_scene).tracking.pose.inverse()
                    * scenes.get(entry.scene).tracking.pose;
                entry.constraint.add_sample(&sample);
            }
        }
    }

    /// Run the lifecycle transitions: commit matured constraints,
    /// promote candidates, retire failures, drop retired entries.
    ///
    /// Returns `true` iff an inter-map edge was newly established, the
    /// signal that global adjustment should be scheduled.
    pub fn maintain_active_data(&mut self, scenes: &mut SceneManager) -> bool {
        let mut edge_established = false;
        let n_overlap = self.config.n_overlap;
        let has_primary = self.primary_data_idx().is_some();

        for idx in 0..self.entries.len() {
            if !self.entries[idx].is_live() || self.entries[idx].role == MapRole::Primary {
                continue;
            }

            let (role, scene, target, good_frames, matured) = {
                let e = &self.entries[idx];
                (
                    e.role,
                    e.scene,
                    e.target,
                    e.good_frames,
                    e.constraint.inliers() >= n_overlap,
                )
            };

            // Graduation paths first.
            match role {
                MapRole::LoopClosure if matured => {
                    if let Some(target) = target {
                        let constraint = std::mem::take(&mut self.entries[idx].constraint);
                        scenes.commit_relation(scene, target, constraint);
                        edge_established = true;
                    }
                    info!("loop-closure candidate on map {scene} established an edge");
                    self.entries[idx].retired = true;
                    continue;
                }
                MapRole::Relocalization if !has_primary && good_frames >= n_overlap => {
                    if let (Some(target), true) = (target, matured) {
                        let constraint = std::mem::take(&mut self.entries[idx].constraint);
                        scenes.commit_relation(scene, target, constraint);
                        edge_established = true;
                    }
                    info!("relocalization succeeded; map {scene} is primary again");
                    self.promote(idx);
                    continue;
                }
                MapRole::New if good_frames >= n_overlap => {
                    if let (Some(target), true) = (target, matured) {
                        let constraint = std::mem::take(&mut self.entries[idx].constraint);
                        scenes.commit_relation(scene, target, constraint);
                        edge_established = true;
                    }
                    info!("new map {scene} takes over as primary");
                    self.promote(idx);
                    continue;
                }
                _ => {}
            }

            // Retirement paths.
            let entry = &mut self.entries[idx];
            let inlier_metric = match entry.role {
                MapRole::Relocalization => entry.good_frames,
                _ => entry.constraint.inliers(),
            };
            let out_of_trials =
                entry.frames >= self.config.n_trial_frames && inlier_metric < n_overlap;
            let too_many_outliers = entry.constraint.attempts()
                >= self.config.min_attempts_for_outlier_check
                && entry.constraint.outlier_ratio() > self.config.max_outlier_ratio;
            if out_of_trials || too_many_outliers {
                debug!(
                    "retiring {:?} candidate on map {} ({} inliers in {} frames)",
                    entry.role, entry.scene, inlier_metric, entry.frames
                );
                entry.retired = true;
            }
        }

        self.entries.retain(|e| e.is_live());
        edge_established
    }

    /// Make entry `idx` the primary, retiring the previous primary and
    /// every other relocalization candidate.
    fn promote(&mut self, idx: usize) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if i == idx {
                continue;
            }
            if entry.role == MapRole::Primary || entry.role == MapRole::Relocalization {
                entry.retired = true;
            }
        }
        let entry = &mut self.entries[idx];
        entry.role = MapRole::Primary;
        entry.constraint = MapRelation::new();
        entry.target = None;
        entry.good_frames = 0;
        entry.frames = 0;
    }
}
