//! # ghana-slam
//!
//! A multi-map dense SLAM coordinator. The engine ingests synchronized
//! RGB + depth frames (optionally with inertial measurements) and
//! maintains a collection of partially overlapping volumetric local
//! maps whose pairwise rigid transforms are refined by a background
//! graph solve.
//!
//! ## Overview
//!
//! Per frame, the coordinator decides for each active map whether to
//! track the camera against it, fuse the observation into it, and
//! refresh its raycast for the next frame; detects tracking failure and
//! recovers through keyframe relocalization; opens and retires
//! candidate links between maps; and schedules batches of inter-map
//! pose relaxation.
//!
//! - [`engine::MultiMapSlam`] - the per-frame scheduler
//! - [`engine::ActiveMapManager`] - the primary/new/candidate state machine
//! - [`scene::SceneManager`] - map ownership and the transform graph
//! - [`render`] - TSDF raycasting and visualisation
//!
//! The tracker, dense mapper, relocalizer, view builder, and graph
//! solver are external collaborators behind the traits in
//! [`engine::interfaces`].
//!
//! ## Coordinate conventions
//!
//! Camera poses are world-to-camera maps in the owning map's frame.
//! `find_transform(from, to)` maps `from`-map coordinates into
//! `to`-map coordinates.

#![warn(missing_docs)]

pub mod config;
pub mod core;
pub mod engine;
pub mod render;
pub mod scene;
pub mod tracking;

pub use self::config::{ConfigError, MultiMapConfig};
pub use self::core::{
    DepthImage, Image, ImageSize, Intrinsics, Pose, RawDepthImage, RgbaImage, View,
};
pub use self::engine::{FrameResult, KeyframeId, MultiMapSlam, OutputImage};
pub use self::scene::{LocalMap, SceneManager, SurfelStore};
pub use self::tracking::{TrackerResult, TrackingState};
