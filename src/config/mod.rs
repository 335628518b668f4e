//! Engine configuration.
//!
//! Plain data with serde derives; loading these from files is the host
//! application's concern.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration that cannot drive the pipeline.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The overlap requirement cannot be met inside the trial window.
    #[error("n_overlap ({n_overlap}) must not exceed the trial window ({n_trial_frames})")]
    OverlapExceedsTrials {
        /// Required inlier frames.
        n_overlap: usize,
        /// Trial window length.
        n_trial_frames: usize,
    },

    /// Voxels must have positive extent.
    #[error("voxel size must be positive, got {0}")]
    NonPositiveVoxelSize(f32),

    /// The truncation band must span at least one voxel.
    #[error("truncation distance ({mu}) must exceed the voxel size ({voxel_size})")]
    TruncationTooSmall {
        /// Truncation distance in meters.
        mu: f32,
        /// Voxel size in meters.
        voxel_size: f32,
    },
}

/// Volumetric scene parameters shared by every local map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Voxel edge length in meters.
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f32,

    /// TSDF truncation distance in meters.
    #[serde(default = "default_mu")]
    pub mu: f32,

    /// Whether voxels carry colour.
    #[serde(default = "default_has_colour")]
    pub has_colour: bool,
}

fn default_voxel_size() -> f32 {
    0.005
}

fn default_mu() -> f32 {
    0.02
}

fn default_has_colour() -> bool {
    true
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            voxel_size: default_voxel_size(),
            mu: default_mu(),
            has_colour: default_has_colour(),
        }
    }
}

/// Active-map lifecycle thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMapConfig {
    /// Confirmed-inlier frames required before a candidate commits an
    /// inter-map edge (or a relocalization candidate is promoted).
    #[serde(default = "default_n_overlap")]
    pub n_overlap: usize,

    /// Trial window, in frames, for a non-primary candidate to prove itself.
    #[serde(default = "default_n_trial_frames")]
    pub n_trial_frames: usize,

    /// Outlier ratio above which a candidate is retired early.
    #[serde(default = "default_max_outlier_ratio")]
    pub max_outlier_ratio: f32,

    /// Attempts recorded before the outlier-ratio test applies, so one
    /// early outlier cannot retire a candidate.
    #[serde(default = "default_min_attempts_for_outlier_check")]
    pub min_attempts_for_outlier_check: usize,

    /// Allocated-block budget of the primary map; exceeding it starts a
    /// new local map at the current camera pose.
    #[serde(default = "default_max_blocks_per_map")]
    pub max_blocks_per_map: usize,

    /// When true, NEW maps also run the loop-closure/relocalization
    /// candidate bookkeeping (the original pipeline's fall-through
    /// behaviour). When false, each entry plays exactly one role.
    #[serde(default = "default_new_maps_track_as_candidates")]
    pub new_maps_track_as_candidates: bool,
}

fn default_n_overlap() -> usize {
    10
}

fn default_n_trial_frames() -> usize {
    20
}

fn default_max_outlier_ratio() -> f32 {
    0.5
}

fn default_min_attempts_for_outlier_check() -> usize {
    5
}

fn default_max_blocks_per_map() -> usize {
    4096
}

fn default_new_maps_track_as_candidates() -> bool {
    true
}

impl Default for ActiveMapConfig {
    fn default() -> Self {
        Self {
            n_overlap: default_n_overlap(),
            n_trial_frames: default_n_trial_frames(),
            max_outlier_ratio: default_max_outlier_ratio(),
            min_attempts_for_outlier_check: default_min_attempts_for_outlier_check(),
            max_blocks_per_map: default_max_blocks_per_map(),
            new_maps_track_as_candidates: default_new_maps_track_as_candidates(),
        }
    }
}

/// Relocalization query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocalizationConfig {
    /// Nearest keyframe neighbours requested per query.
    #[serde(default = "default_num_neighbours")]
    pub num_neighbours: usize,

    /// Maximum descriptor distance at which a neighbour is worth a link
    /// attempt.
    #[serde(default = "default_max_link_distance")]
    pub max_link_distance: f32,
}

fn default_num_neighbours() -> usize {
    3
}

fn default_max_link_distance() -> f32 {
    0.1
}

impl Default for RelocalizationConfig {
    fn default() -> Self {
        Self {
            num_neighbours: default_num_neighbours(),
            max_link_distance: default_max_link_distance(),
        }
    }
}

/// Global-adjustment driver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAdjustmentConfig {
    /// Run the solver on a background worker thread instead of inline.
    #[serde(default = "default_run_in_background")]
    pub run_in_background: bool,
}

fn default_run_in_background() -> bool {
    false
}

impl Default for GlobalAdjustmentConfig {
    fn default() -> Self {
        Self {
            run_in_background: default_run_in_background(),
        }
    }
}

/// Top-level configuration for the multi-map engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiMapConfig {
    /// Scene parameters.
    #[serde(default)]
    pub scene: SceneConfig,

    /// Active-map lifecycle thresholds.
    #[serde(default)]
    pub active: ActiveMapConfig,

    /// Relocalization parameters.
    #[serde(default)]
    pub relocalization: RelocalizationConfig,

    /// Global-adjustment parameters.
    #[serde(default)]
    pub adjustment: GlobalAdjustmentConfig,

    /// Ask the view builder for bilateral depth filtering.
    #[serde(default)]
    pub use_bilateral_filter: bool,
}

impl MultiMapConfig {
    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scene.voxel_size <= 0.0 {
            return Err(ConfigError::NonPositiveVoxelSize(self.scene.voxel_size));
        }
        if self.scene.mu <= self.scene.voxel_size {
            return Err(ConfigError::TruncationTooSmall {
                mu: self.scene.mu,
                voxel_size: self.scene.voxel_size,
            });
        }
        if self.active.n_overlap > self.active.n_trial_frames {
            return Err(ConfigError::OverlapExceedsTrials {
                n_overlap: self.active.n_overlap,
                n_trial_frames: self.active.n_trial_frames,
            });
        }
        Ok(())
    }
}
