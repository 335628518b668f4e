//! The per-frame coordinator: active-map lifecycle, keyframe poses,
//! global adjustment, and the scheduler that drives them.

pub mod active_maps;
pub mod global_adjust;
pub mod interfaces;
pub mod multi_slam;
pub mod pose_db;

pub use active_maps::{ActiveEntry, ActiveMapManager, MapRole};
pub use global_adjust::GlobalAdjustmentDriver;
pub use interfaces::{
    DenseMapper, GraphSolver, RelocalizationHit, Relocalizer, RelocalizerResponse, ViewBuilder,
};
pub use multi_slam::{FrameResult, MultiMapSlam, MultiMapStatus, OutputImage};
pub use pose_db::{KeyframeId, PoseDatabase, PoseEntry};
