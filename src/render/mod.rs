//! Raycasting and visualisation of voxel scenes.

pub mod block;
pub mod engine;
pub mod raycast;
pub mod state;

pub use block::{
    RenderingBlock, FAR_AWAY, MAX_RENDERING_BLOCKS, MINMAX_SUBSAMPLE, RENDERING_BLOCK_SIZE,
    VERY_CLOSE,
};
pub use engine::{RenderSource, VisualisationEngine};
pub use raycast::{cast_ray, RaycastHit};
pub use state::RenderState;
