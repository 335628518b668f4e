//! Sparse TSDF volume indexed by voxel-block coordinate.
//!
//! The volume is a hash of 8x8x8 blocks allocated on demand around the
//! observed surface. Readers come in two flavours: a nearest-voxel read
//! used while skipping through space, and a trilinear read used close to
//! the zero crossing where the extra accuracy matters.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::config::SceneConfig;

use super::voxel::{BlockCoord, Voxel, VoxelBlock, BLOCK_SIDE};

/// Sparse voxel-block volume with TSDF read access.
#[derive(Debug, Clone)]
pub struct VoxelBlockHash {
    blocks: HashMap<BlockCoord, VoxelBlock>,
    voxel_size: f32,
    mu: f32,
    has_colour: bool,
}

impl VoxelBlockHash {
    /// Create an empty volume.
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            voxel_size: config.voxel_size,
            mu: config.mu,
            has_colour: config.has_colour,
        }
    }

    /// Voxel edge length in meters.
    #[inline]
    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// Truncation distance in meters.
    #[inline]
    pub fn mu(&self) -> f32 {
        self.mu
    }

    /// Whether this scene stores colour.
    #[inline]
    pub fn has_colour(&self) -> bool {
        self.has_colour
    }

    /// Number of allocated blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Whether a block is allocated.
    #[inline]
    pub fn has_block(&self, coord: BlockCoord) -> bool {
        self.blocks.contains_key(&coord)
    }

    /// Borrow a block.
    #[inline]
    pub fn block(&self, coord: BlockCoord) -> Option<&VoxelBlock> {
        self.blocks.get(&coord)
    }

    /// Allocate a block (no-op if present) and borrow it mutably.
    pub fn allocate_block(&mut self, coord: BlockCoord) -> &mut VoxelBlock {
        self.blocks.entry(coord).or_default()
    }

    /// Iterate over allocated block coordinates.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockCoord> + '_ {
        self.blocks.keys().copied()
    }

    /// Drop every block.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Voxel at an integer voxel coordinate, if its block is allocated.
    #[inline]
    pub fn voxel(&self, vx: i32, vy: i32, vz: i32) -> Option<&Voxel> {
        let block = self.blocks.get(&BlockCoord::containing(vx, vy, vz))?;
        Some(block.voxel(
            vx.rem_euclid(BLOCK_SIDE),
            vy.rem_euclid(BLOCK_SIDE),
            vz.rem_euclid(BLOCK_SIDE),
        ))
    }

    /// Mutable voxel at an integer voxel coordinate, allocating its block.
    pub fn voxel_mut(&mut self, vx: i32, vy: i32, vz: i32) -> &mut Voxel {
        self.allocate_block(BlockCoord::containing(vx, vy, vz)).voxel_mut(
            vx.rem_euclid(BLOCK_SIDE),
            vy.rem_euclid(BLOCK_SIDE),
            vz.rem_euclid(BLOCK_SIDE),
        )
    }

    /// Nearest-voxel SDF read at a voxel-space position.
    ///
    /// Returns the normalized SDF and whether the containing block is
    /// allocated; unallocated space reads as `1.0`.
    pub fn read_sdf(&self, p: &Vector3<f32>) -> (f32, bool) {
        let (vx, vy, vz) = (
            p.x.round() as i32,
            p.y.round() as i32,
            p.z.round() as i32,
        );
        match self.voxel(vx, vy, vz) {
            Some(v) => (v.sdf, true),
            None => (1.0, false),
        }
    }

    /// Trilinearly interpolated SDF read at a voxel-space position.
    ///
    /// Missing neighbours contribute the unobserved value `1.0`; the
    /// found flag reports whether the base voxel's block is allocated.
    pub fn read_sdf_interpolated(&self, p: &Vector3<f32>) -> (f32, bool) {
        let base = Vector3::new(p.x.floor(), p.y.floor(), p.z.floor());
        let frac = p - base;
        let (bx, by, bz) = (base.x as i32, base.y as i32, base.z as i32);

        let found = self
            .blocks
            .contains_key(&BlockCoord::containing(bx, by, bz));

        let mut sdf = 0.0;
        for corner in 0..8 {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let value = self
                .voxel(bx + dx, by + dy, bz + dz)
                .map_or(1.0, |v| v.sdf);
            let wx = if dx == 1 { frac.x } else { 1.0 - frac.x };
            let wy = if dy == 1 { frac.y } else { 1.0 - frac.y };
            let wz = if dz == 1 { frac.z } else { 1.0 - frac.z };
            sdf += value * wx * wy * wz;
        }

        (sdf, found)
    }

    /// Trilinearly interpolated colour read, `None` for colourless scenes.
    pub fn read_colour_interpolated(&self, p: &Vector3<f32>) -> Option<Vector3<f32>> {
        if !self.has_colour {
            return None;
        }

        let base = Vector3::new(p.x.floor(), p.y.floor(), p.z.floor());
        let frac = p - base;
        let (bx, by, bz) = (base.x as i32, base.y as i32, base.z as i32);

        let mut colour = Vector3::zeros();
        let mut total_weight = 0.0;
        for corner in 0..8 {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let Some(v) = self.voxel(bx + dx, by + dy, bz + dz) else {
                continue;
            };
            if v.colour_weight == 0 {
                continue;
            }
            let wx = if dx == 1 { frac.x } else { 1.0 - frac.x };
            let wy = if dy == 1 { frac.y } else { 1.0 - frac.y };
            let wz = if dz == 1 { frac.z } else { 1.0 - frac.z };
            let w = wx * wy * wz;
            colour += Vector3::new(
                v.colour[0] as f32,
                v.colour[1] as f32,
                v.colour[2] as f32,
            ) * w;
            total_weight += w;
        }

        if total_weight > 1e-6 {
            Some(colour / (total_weight * 255.0))
        } else {
            None
        }
    }

    /// Surface normal from SDF central differences, `None` where the
    /// gradient degenerates.
    pub fn normal_from_sdf(&self, p: &Vector3<f32>) -> Option<Vector3<f32>> {
        let dx = self.read_sdf_interpolated(&(p + Vector3::new(1.0, 0.0, 0.0))).0
            - self.read_sdf_interpolated(&(p - Vector3::new(1.0, 0.0, 0.0))).0;
        let dy = self.read_sdf_interpolated(&(p + Vector3::new(0.0, 1.0, 0.0))).0
            - self.read_sdf_interpolated(&(p - Vector3::new(0.0, 1.0, 0.0))).0;
        let dz = self.read_sdf_interpolated(&(p + Vector3::new(0.0, 0.0, 1.0))).0
            - self.read_sdf_interpolated(&(p - Vector3::new(0.0, 0.0, 1.0))).0;

        let gradient = Vector3::new(dx, dy, dz);
        let norm = gradient.norm();
        if norm > 1e-6 {
            Some(gradient / norm)
        } else {
            None
        }
    }
}
