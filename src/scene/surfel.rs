//! Append-only surfel storage.
//!
//! The surfel representation is an alternative to the TSDF volume used
//! by the point-based visualiser. Storage is a single fixed-capacity
//! buffer: surfels are allocated in runs, never erased, and obsolescence
//! is expressed through the timestamp field by whoever integrates them.

use nalgebra::Vector3;

/// Hard cap on surfels in one store.
pub const MAX_SURFEL_COUNT: usize = 10_000_000;

/// Capability surface of a surfel type: whether it carries colour, and
/// how to read/write it. Colourless surfels make both operations no-ops.
pub trait SurfelModel: Copy + Default {
    /// Whether this surfel type stores colour.
    const HAS_COLOUR: bool;

    /// The surfel's colour, or black for colourless types.
    fn colour(&self) -> [u8; 3];

    /// Set the surfel's colour; ignored by colourless types.
    fn set_colour(&mut self, colour: [u8; 3]);
}

/// A surfel without colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surfel {
    /// Position in map coordinates, meters.
    pub position: Vector3<f32>,
    /// Unit surface normal.
    pub normal: Vector3<f32>,
    /// Confidence counter.
    pub confidence: f32,
    /// Disk radius in meters.
    pub radius: f32,
    /// Frame index of the last update.
    pub timestamp: i32,
}

impl Default for Surfel {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            normal: Vector3::zeros(),
            confidence: 0.0,
            radius: 0.0,
            timestamp: 0,
        }
    }
}

impl SurfelModel for Surfel {
    const HAS_COLOUR: bool = false;

    fn colour(&self) -> [u8; 3] {
        [0; 3]
    }

    fn set_colour(&mut self, _colour: [u8; 3]) {}
}

/// A surfel with 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColourSurfel {
    /// The colourless payload.
    pub base: Surfel,
    /// RGB colour.
    pub colour: [u8; 3],
}

impl SurfelModel for ColourSurfel {
    const HAS_COLOUR: bool = true;

    fn colour(&self) -> [u8; 3] {
        self.colour
    }

    fn set_colour(&mut self, colour: [u8; 3]) {
        self.colour = colour;
    }
}

/// Fixed-capacity append-only surfel buffer.
#[derive(Debug, Clone)]
pub struct SurfelStore<S: SurfelModel> {
    surfels: Vec<S>,
    capacity: usize,
}

impl<S: SurfelModel> SurfelStore<S> {
    /// Create a store with the standard capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_SURFEL_COUNT)
    }

    /// Create a store with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            surfels: Vec::new(),
            capacity,
        }
    }

    /// Append `n` default surfels and return the new run for
    /// initialisation, or `None` if the cap would be exceeded.
    pub fn allocate(&mut self, n: usize) -> Option<&mut [S]> {
        if self.surfels.len() + n > self.capacity {
            return None;
        }
        let start = self.surfels.len();
        self.surfels.resize(start + n, S::default());
        Some(&mut self.surfels[start..])
    }

    /// Number of live surfels.
    #[inline]
    pub fn len(&self) -> usize {
        self.surfels.len()
    }

    /// Whether the store is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.surfels.is_empty()
    }

    /// Maximum surfel count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All live surfels.
    #[inline]
    pub fn surfels(&self) -> &[S] {
        &self.surfels
    }

    /// Discard every surfel. The only operation that shrinks the store.
    pub fn reset(&mut self) {
        self.surfels.clear();
    }
}

impl<S: SurfelModel> Default for SurfelStore<S> {
    fn default() -> Self {
        Self::new()
    }
}
