//! Volumetric scenes: voxel storage, local maps, the map collection,
//! inter-map relations, and the surfel alternative.

pub mod hash;
pub mod local_map;
pub mod manager;
pub mod relation;
pub mod surfel;
pub mod voxel;

pub use hash::VoxelBlockHash;
pub use local_map::LocalMap;
pub use manager::SceneManager;
pub use relation::{MapRelation, RelationConstraint};
pub use surfel::{ColourSurfel, Surfel, SurfelModel, SurfelStore, MAX_SURFEL_COUNT};
pub use voxel::{BlockCoord, Voxel, VoxelBlock, BLOCK_SIDE};
