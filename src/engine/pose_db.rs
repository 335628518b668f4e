//! Keyframe pose database.
//!
//! The relocalizer assigns dense non-negative keyframe ids; each id
//! binds a camera pose to the local map it was tracked in, so a
//! nearest-neighbour hit can be turned back into a link attempt.

use crate::core::pose::Pose;

/// Opaque relocalizer-assigned keyframe identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyframeId(pub usize);

impl std::fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keyframe({})", self.0)
    }
}

/// A stored keyframe pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEntry {
    /// Local map the pose is expressed in.
    pub scene: usize,
    /// World-to-camera pose in that map's frame.
    pub pose: Pose,
}

/// Dense keyframe-id-indexed pose store.
#[derive(Debug, Default)]
pub struct PoseDatabase {
    entries: Vec<Option<PoseEntry>>,
}

impl PoseDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pose under a keyframe id. Overwrites idempotently.
    pub fn store_pose(&mut self, id: KeyframeId, pose: Pose, scene: usize) {
        if id.0 >= self.entries.len() {
            self.entries.resize(id.0 + 1, None);
        }
        self.entries[id.0] = Some(PoseEntry { scene, pose });
    }

    /// Retrieve the entry for a keyframe id.
    #[inline]
    pub fn retrieve_pose(&self, id: KeyframeId) -> Option<PoseEntry> {
        self.entries.get(id.0).copied().flatten()
    }

    /// Number of stored keyframes.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Whether no keyframes are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
